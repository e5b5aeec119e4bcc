use bytes::Bytes;

use crate::error::Result;

/// One-shot completion callback.
///
/// Invoked exactly once with `Ok(())` on success or the error that ended
/// the operation.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Lifecycle shared by every payload sender: initialize, send, flush, close.
///
/// None of the methods block on I/O. Outcomes are reported through the
/// completion callbacks, which may run on the caller's stack or later on
/// another thread.
pub trait Sender: Send + Sync {
    /// Start establishing the underlying connection.
    fn initialize(&self);

    /// Queue `payload` for transmission.
    fn send(&self, payload: Bytes, on_complete: Completion);

    /// Report once everything queued so far has been handled.
    fn flush(&self, on_complete: Completion);

    /// Release the underlying connection once pending work has settled.
    fn close(&self, on_complete: Completion);
}
