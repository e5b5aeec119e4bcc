use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_fabric::{
    error::Error,
    transport::{TcpTransport, Transport},
    StreamSender,
};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Helper to get a free port
async fn get_listener() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn tcp_transport_writes_unframed_bytes() {
    let (listener, addr) = get_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    client.send(b"hello ").await.unwrap();
    client.send(b"world").await.unwrap();
    client.close().unwrap();

    assert_eq!(server.await.unwrap(), b"hello world");
}

#[tokio::test]
async fn tcp_builder_resolves_host_names() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let _ = listener.accept().await.unwrap();
    });

    let client = TcpTransport::builder()
        .host("localhost", addr.port())
        .family(courier_fabric::AddressFamily::Ipv4)
        .connect_timeout(Duration::from_secs(2))
        .no_delay(true)
        .connect()
        .await
        .unwrap();

    assert_eq!(client.peer_addr().unwrap(), addr);
}

#[tokio::test]
async fn sender_delivers_payloads_in_order_over_tcp() {
    let (listener, addr) = get_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let sender = StreamSender::builder(format!("tcp://{}", addr))
        .connect_timeout(Duration::from_secs(2))
        .no_delay(true)
        .build()
        .unwrap();
    sender.ensure_connected();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    for line in ["first\n", "second\n", "third\n"] {
        let outcomes = outcomes.clone();
        sender.submit(
            line.into(),
            Box::new(move |result| outcomes.lock().push(result)),
        );
    }
    sender.send_async(&b"fourth\n"[..]).await.unwrap();
    sender.flush_async().await.unwrap();

    let outcomes = std::mem::take(&mut *outcomes.lock());
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|result| result.is_ok()));
    sender.close_async().await.unwrap();

    assert_eq!(server.await.unwrap(), b"first\nsecond\nthird\nfourth\n");

    let stats = sender.stats();
    assert_eq!(stats.sent, 4);
    assert!(stats.closed);
}

#[tokio::test]
async fn refused_connection_latches_io_error() {
    let (listener, addr) = get_listener().await;
    drop(listener);

    let sender = StreamSender::new(format!("tcp://{}", addr), Default::default()).unwrap();
    sender.ensure_connected();

    let result = sender.send_async(&b"lost"[..]).await;
    match result {
        Err(Error::Io(_)) => {}
        other => panic!("Expected Io error, got {:?}", other),
    }
    assert!(sender.stats().faulted);
    assert!(sender.flush_async().await.is_err());
}

/// A payload far larger than the socket buffers of a peer that never reads
fn stalled_payload() -> Bytes {
    Bytes::from(vec![0u8; 64 << 20])
}

/// Accept one connection and hold it open without reading
fn hold_connection(listener: TcpListener) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
}

#[tokio::test]
async fn tcp_send_times_out_when_peer_stops_reading() {
    let (listener, addr) = get_listener().await;
    let server = hold_connection(listener);

    let mut client = TcpTransport::builder()
        .address(addr)
        .send_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    match client.send(&stalled_payload()).await {
        Err(Error::Timeout("Send")) => {}
        other => panic!("Expected send timeout, got {:?}", other),
    }
    server.abort();
}

#[tokio::test]
async fn send_timeout_latches_on_sender() {
    let (listener, addr) = get_listener().await;
    let server = hold_connection(listener);

    let sender = StreamSender::builder(format!("tcp://{}", addr))
        .send_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    sender.ensure_connected();

    assert!(matches!(
        sender.send_async(stalled_payload()).await,
        Err(Error::Timeout("Send"))
    ));
    assert!(sender.stats().faulted);
    assert!(matches!(
        sender.send_async(&b"later"[..]).await,
        Err(Error::Timeout("Send"))
    ));
    assert!(matches!(
        sender.flush_async().await,
        Err(Error::Timeout("Send"))
    ));
    assert_eq!(sender.stats().sent, 0);
    server.abort();
}

// Unix Socket Tests

#[cfg(unix)]
#[tokio::test]
async fn unix_transport_writes_unframed_bytes() {
    use courier_fabric::transport::UnixTransport;
    use tokio::net::UnixListener;

    let socket_path = "/tmp/courier_test_unix_transport.sock";
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path).unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let mut client = UnixTransport::connect(socket_path).await.unwrap();
    client.send(b"hello ").await.unwrap();
    client.send(b"unix").await.unwrap();
    client.close().unwrap();

    assert_eq!(server.await.unwrap(), b"hello unix");

    let _ = std::fs::remove_file(socket_path);
}

#[cfg(unix)]
#[tokio::test]
async fn sender_delivers_payloads_over_unix_socket() {
    use tokio::net::UnixListener;

    let socket_path = "/tmp/courier_test_unix_sender.sock";
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path).unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let sender = StreamSender::builder(format!("unix://{}", socket_path))
        .build()
        .unwrap();
    sender.ensure_connected();

    sender.send_async(&b"hello "[..]).await.unwrap();
    sender.send_async(&b"unix"[..]).await.unwrap();
    sender.close_async().await.unwrap();

    assert_eq!(server.await.unwrap(), b"hello unix");

    let _ = std::fs::remove_file(socket_path);
}

#[cfg(unix)]
#[tokio::test]
async fn missing_unix_socket_latches_error() {
    let socket_path = "/tmp/courier_test_unix_missing.sock";
    let _ = std::fs::remove_file(socket_path);

    let sender = StreamSender::builder(format!("unix://{}", socket_path))
        .connect_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    sender.ensure_connected();

    assert!(sender.send_async(&b"lost"[..]).await.is_err());
    assert!(sender.stats().faulted);
}
