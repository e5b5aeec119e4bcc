//! Courier Core - Shared contracts for payload senders
//!
//! Defines the error type reported to completion callbacks and the
//! [`Sender`] lifecycle implemented by concrete transports.

pub mod error;
pub mod sender;

pub use error::{Error, Result};
pub use sender::{Completion, Sender};
