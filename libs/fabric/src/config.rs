//! Configuration for stream senders.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::AddressFamily;

/// What happens to the oldest queued payload when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop it without invoking its callback
    #[default]
    Silent,
    /// Invoke its callback with [`Error::Dropped`](crate::Error::Dropped)
    Notify,
}

/// How a faulted connection may be brought back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// The latched error stays until the connection is closed. Only
    /// `ensure_connected` after a close starts over with a clean slate.
    #[default]
    Sticky,
    /// `ensure_connected` on a faulted connection releases its transport,
    /// clears the latched error and connects again.
    ResetOnReconnect,
}

/// Configuration for a [`StreamSender`](crate::StreamSender)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Maximum number of payloads waiting to be sent; 0 means unbounded
    pub max_queue_depth: usize,

    /// Behavior when a submission overflows `max_queue_depth`
    pub eviction: EvictionPolicy,

    /// Recovery behavior after a transport error
    pub fault_policy: FaultPolicy,

    /// Address family used when resolving the endpoint
    pub address_family: AddressFamily,

    /// Timeout for connection attempts
    pub connect_timeout: Option<Duration>,

    /// Timeout for a single payload write
    pub send_timeout: Option<Duration>,

    /// Set TCP_NODELAY on TCP connections
    pub no_delay: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 0,
            eviction: EvictionPolicy::Silent,
            fault_policy: FaultPolicy::Sticky,
            address_family: AddressFamily::Any,
            connect_timeout: None,
            send_timeout: None,
            no_delay: false,
        }
    }
}

impl SenderConfig {
    /// Configuration with a bounded queue and defaults elsewhere
    pub fn bounded(max_queue_depth: usize) -> Self {
        Self {
            max_queue_depth,
            ..Self::default()
        }
    }
}
