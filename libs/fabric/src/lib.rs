//! Courier Fabric - Ordered payload delivery over stream sockets
//!
//! Provides a [`StreamSender`] that writes opaque byte payloads to a single
//! TCP or Unix socket endpoint, one at a time and in submission order, with
//! a bounded send queue, latched connection errors and drain-based
//! flush/close.
//!
//! # Example
//!
//! ```no_run
//! use courier_fabric::StreamSender;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sender = StreamSender::builder("tcp://127.0.0.1:5140")
//!     .max_queue_depth(1024)
//!     .build()?;
//! sender.ensure_connected();
//!
//! sender.send_async(&b"first line\n"[..]).await?;
//! sender.submit(
//!     "second line\n".into(),
//!     Box::new(|result| {
//!         if let Err(e) = result {
//!             eprintln!("send failed: {}", e);
//!         }
//!     }),
//! );
//!
//! sender.flush_async().await?;
//! sender.close_async().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod sender;
pub mod transport;

// Re-exports for convenience
pub use config::{EvictionPolicy, FaultPolicy, SenderConfig};
pub use courier_core::{Completion, Sender};
pub use endpoint::{AddressFamily, DefaultResolver, Endpoint, Resolve};
pub use error::{Error, Result};
pub use sender::{SenderStats, StreamSender, StreamSenderBuilder};
