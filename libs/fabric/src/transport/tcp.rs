use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::endpoint::AddressFamily;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// TCP transport writing unframed bytes
pub struct TcpTransport {
    stream: TcpStream,
    send_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::builder().address(addr).connect().await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> TcpTransportBuilder {
        TcpTransportBuilder::new()
    }

    /// Get the remote address of this connection
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let send_op = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await?;
            Ok::<(), Error>(())
        };

        if let Some(timeout) = self.send_timeout {
            tokio::time::timeout(timeout, send_op)
                .await
                .map_err(|_| Error::Timeout("Send"))?
        } else {
            send_op.await
        }
    }

    fn close(&mut self) -> Result<()> {
        SockRef::from(&self.stream).shutdown(Shutdown::Both)?;
        Ok(())
    }
}

enum Target {
    Address(SocketAddr),
    Host(String, u16),
}

/// Builder for configuring TCP transport
#[derive(Default)]
pub struct TcpTransportBuilder {
    target: Option<Target>,
    family: AddressFamily,
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    no_delay: bool,
}

impl TcpTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address to connect to
    pub fn address(mut self, addr: SocketAddr) -> Self {
        self.target = Some(Target::Address(addr));
        self
    }

    /// Set a host name (or IP literal) and port, looked up when connecting
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.target = Some(Target::Host(host.into(), port));
        self
    }

    /// Restrict looked-up addresses to one family
    pub fn family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set TCP_NODELAY on the connected socket
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<TcpTransport> {
        let target = self
            .target
            .ok_or_else(|| Error::custom("Address not set"))?;
        let family = self.family;

        let connect_op = async move {
            let candidates: Vec<SocketAddr> = match target {
                Target::Address(addr) => vec![addr],
                Target::Host(host, port) => tokio::net::lookup_host((host.as_str(), port))
                    .await?
                    .filter(|addr| family.admits(&addr.ip()))
                    .collect(),
            };

            let mut last_err = None;
            for addr in candidates {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok::<TcpStream, Error>(stream),
                    Err(e) => {
                        tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }
            Err(match last_err {
                Some(e) => Error::from(e),
                None => Error::invalid_address(format!("no {:?} address found", family)),
            })
        };

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout("Connect"))??
        } else {
            connect_op.await?
        };

        if self.no_delay {
            stream.set_nodelay(true)?;
        }

        Ok(TcpTransport {
            stream,
            send_timeout: self.send_timeout,
        })
    }
}
