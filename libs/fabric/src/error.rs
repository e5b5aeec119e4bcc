//! Errors surfaced by fabric connections.
//!
//! The type lives in `courier-core` so every sender reports the same
//! outcomes to its completion callbacks.

pub use courier_core::error::{Error, Result};
