use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Result;

pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use self::tcp::{TcpTransport, TcpTransportBuilder};
#[cfg(unix)]
pub use self::unix::{UnixTransport, UnixTransportBuilder};

/// Transport trait for writing raw bytes to a connected stream
///
/// Each transport instance represents a single connection. Bytes are
/// written as-is, without framing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Write all of `bytes` to the stream
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the connection
    ///
    /// Synchronous and best-effort. An error here does not invalidate data
    /// already written.
    fn close(&mut self) -> Result<()>;
}

/// Establishes transports for resolved endpoints
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

/// Connector for TCP and Unix socket endpoints
#[derive(Debug, Clone, Default)]
pub struct SocketConnector {
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    no_delay: bool,
}

impl SocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Disable Nagle's algorithm on TCP connections
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }
}

#[async_trait::async_trait]
impl Connector for SocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        match endpoint {
            Endpoint::Tcp { host, port, family } => {
                let mut builder = TcpTransport::builder()
                    .host(host.clone(), *port)
                    .family(*family)
                    .no_delay(self.no_delay);
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(timeout) = self.send_timeout {
                    builder = builder.send_timeout(timeout);
                }
                Ok(Box::new(builder.connect().await?))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let mut builder = UnixTransport::builder().path(path);
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(timeout) = self.send_timeout {
                    builder = builder.send_timeout(timeout);
                }
                Ok(Box::new(builder.connect().await?))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(crate::error::Error::invalid_address(format!(
                "unix sockets are not supported on this platform: {}",
                path.display()
            ))),
        }
    }
}
