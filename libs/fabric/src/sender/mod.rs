//! Ordered, single-flight payload delivery over one stream connection.
//!
//! A [`StreamSender`] owns one transport to one endpoint. Payloads are
//! queued in submission order and written one at a time; each submitter
//! is told the outcome exactly once through its completion callback.
//!
//! The first connect or send error latches: every payload still queued,
//! and every payload submitted afterwards, completes with that error
//! without touching the network. Flush and close wait for in-flight work
//! to settle before resolving.
//!
//! Callbacks never run under the connection lock, so they may call back
//! into the sender. They may run on the submitting thread before
//! [`StreamSender::submit`] returns, or on a runtime worker thread. A
//! panicking callback is logged and contained; the others still fire.
//!
//! Whichever thread finds the connection idle runs the dispatch loop until
//! no work is left. That thread may be a submitter: if asynchronous
//! completions keep arriving while it loops, it delivers other submitters'
//! callbacks and issues their sends too, so under sustained load a call to
//! `submit`, `flush` or `close` can take longer than its own enqueue.

mod state;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_core::{Completion, Sender};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::{EvictionPolicy, FaultPolicy, SenderConfig};
use crate::endpoint::{AddressFamily, DefaultResolver, Resolve};
use crate::error::{Error, Result};
use crate::transport::{Connector, SocketConnector};

use self::state::{ConnectionState, Dispatch, Outcome, Phase};

pub use self::state::SenderStats;

/// Handle to a stream connection with a bounded send queue
///
/// Cloning the handle shares the same connection.
#[derive(Clone)]
pub struct StreamSender {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    address: String,
    family: AddressFamily,
    resolver: Arc<dyn Resolve>,
    connector: Arc<dyn Connector>,
    runtime: Handle,
}

impl StreamSender {
    /// Create a sender for `address` with the given configuration
    ///
    /// Must be called from within a tokio runtime; use [`builder`](Self::builder)
    /// to pass a runtime handle explicitly.
    pub fn new(address: impl Into<String>, config: SenderConfig) -> Result<Self> {
        Self::builder(address).config(config).build()
    }

    /// Create a builder for configuring the sender
    pub fn builder(address: impl Into<String>) -> StreamSenderBuilder {
        StreamSenderBuilder::new(address)
    }

    /// The address this sender connects to
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Whether a transport is currently established
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().phase() == Phase::Open
    }

    /// Snapshot of queue depth, state flags and counters
    pub fn stats(&self) -> SenderStats {
        self.shared.state.lock().stats()
    }

    /// Resolve the endpoint and start connecting
    ///
    /// A transport already held is released first. Ignored while another
    /// operation is in flight. Failures surface through later callbacks.
    pub fn connect(&self) {
        let shared = &self.shared;
        shared.with_state(|state| {
            state.connect(shared.resolver.as_ref(), &shared.address, shared.family)
        });
    }

    /// Connect if no transport is held or being established
    ///
    /// After [`close`](Self::close) this starts a fresh connection with no
    /// latched error. On a faulted connection the outcome depends on the
    /// configured [`FaultPolicy`].
    pub fn ensure_connected(&self) {
        let shared = &self.shared;
        shared.with_state(|state| {
            state.ensure_connected(shared.resolver.as_ref(), &shared.address, shared.family)
        });
    }

    /// Queue `payload` for transmission
    ///
    /// Never fails synchronously. `on_complete` may run before this returns.
    /// The caller must not expect a callback for a payload evicted under
    /// [`EvictionPolicy::Silent`].
    pub fn submit(&self, payload: Bytes, on_complete: Completion) {
        self.shared
            .with_state(|state| state.enqueue(payload, on_complete));
    }

    /// Queue `len` bytes of `buf` starting at `offset`
    ///
    /// The view shares `buf`'s allocation. Ranges outside `buf` complete
    /// immediately with an error.
    pub fn submit_range(&self, buf: &Bytes, offset: usize, len: usize, on_complete: Completion) {
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => self.submit(buf.slice(offset..end), on_complete),
            _ => on_complete(Err(Error::custom(format!(
                "range {}+{} out of bounds for {} byte buffer",
                offset,
                len,
                buf.len()
            )))),
        }
    }

    /// Call `on_complete` once every payload queued so far has been handled
    ///
    /// Resolves with the latched error, if any. Concurrent flushes are all
    /// resolved together.
    pub fn flush(&self, on_complete: Completion) {
        self.shared
            .with_state(|state| state.add_flush_waiter(on_complete));
    }

    /// Release the transport once in-flight and queued work has settled
    ///
    /// Resolves with the error from releasing the transport, if any.
    /// Payloads that can no longer be sent complete with
    /// [`Error::ConnectionClosed`].
    pub fn close(&self, on_complete: Completion) {
        self.shared
            .with_state(|state| state.add_close_waiter(on_complete));
    }

    /// Submit `payload` and wait for its outcome
    ///
    /// A payload evicted without notification resolves with
    /// [`Error::Dropped`].
    pub async fn send_async(&self, payload: impl Into<Bytes>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(payload.into(), completion(tx));
        rx.await.unwrap_or(Err(Error::Dropped))
    }

    /// Flush and wait for the outcome
    pub async fn flush_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.flush(completion(tx));
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Close and wait for the transport to be released
    pub async fn close_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.close(completion(tx));
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

fn completion(tx: oneshot::Sender<Result<()>>) -> Completion {
    Box::new(move |result| {
        let _ = tx.send(result);
    })
}

impl Sender for StreamSender {
    fn initialize(&self) {
        self.ensure_connected();
    }

    fn send(&self, payload: Bytes, on_complete: Completion) {
        self.submit(payload, on_complete);
    }

    fn flush(&self, on_complete: Completion) {
        StreamSender::flush(self, on_complete);
    }

    fn close(&self, on_complete: Completion) {
        StreamSender::close(self, on_complete);
    }
}

impl Shared {
    /// Mutate the state, then drive the pipeline unless another thread
    /// already is.
    fn with_state(self: &Arc<Self>, f: impl FnOnce(&mut ConnectionState)) {
        let claimed = {
            let mut state = self.state.lock();
            f(&mut *state);
            !std::mem::replace(&mut state.driving, true)
        };
        if claimed {
            self.drive();
        }
    }

    /// Dispatch loop. Only the thread holding `driving` runs it, so
    /// deliveries leave the outbox in the order they were queued.
    fn drive(self: &Arc<Self>) {
        let _runtime = self.runtime.enter();
        loop {
            let (dispatch, outbox) = {
                let mut state = self.state.lock();
                let dispatch = state.next_step();
                let outbox = state.take_outbox();
                if dispatch.is_none() && outbox.is_empty() {
                    state.driving = false;
                    return;
                }
                (dispatch, outbox)
            };

            for delivery in outbox {
                delivery.deliver();
            }

            if let Some(dispatch) = dispatch {
                if let Some(outcome) = self.issue(dispatch) {
                    self.state.lock().complete(outcome);
                }
            }
        }
    }

    /// Start `dispatch`. Returns its outcome if it completed immediately;
    /// otherwise it finishes on the runtime and re-enters through
    /// [`on_operation_complete`](Self::on_operation_complete).
    fn issue(self: &Arc<Self>, dispatch: Dispatch) -> Option<Outcome> {
        let mut operation: BoxFuture<'static, Outcome> = match dispatch {
            Dispatch::Connect(endpoint) => {
                let connector = Arc::clone(&self.connector);
                async move { Outcome::Connected(connector.connect(&endpoint).await) }.boxed()
            }
            Dispatch::Send(mut transport, payload) => async move {
                let result = transport.send(&payload).await;
                Outcome::Sent(transport, result)
            }
            .boxed(),
        };

        if let Some(outcome) = operation.as_mut().now_or_never() {
            return Some(outcome);
        }

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = operation.await;
            shared.on_operation_complete(outcome);
        });
        None
    }

    fn on_operation_complete(self: &Arc<Self>, outcome: Outcome) {
        self.with_state(|state| state.complete(outcome));
    }
}

/// Builder for configuring a [`StreamSender`]
pub struct StreamSenderBuilder {
    address: String,
    config: SenderConfig,
    resolver: Option<Arc<dyn Resolve>>,
    connector: Option<Arc<dyn Connector>>,
    runtime: Option<Handle>,
}

impl StreamSenderBuilder {
    /// Create a new builder for `address`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            config: SenderConfig::default(),
            resolver: None,
            connector: None,
            runtime: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum queue depth; 0 means unbounded
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.config.max_queue_depth = depth;
        self
    }

    /// Set the queue overflow policy
    pub fn eviction(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction = policy;
        self
    }

    /// Set the recovery policy for faulted connections
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Set the address family used when resolving
    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.config.address_family = family;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = Some(timeout);
        self
    }

    /// Set TCP_NODELAY on TCP connections
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.config.no_delay = no_delay;
        self
    }

    /// Use a custom endpoint resolver
    pub fn resolver(mut self, resolver: impl Resolve + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a custom transport connector
    ///
    /// Timeouts and nodelay settings only apply to the default connector.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Run asynchronous completions on `handle`
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the sender; no connection is attempted yet
    pub fn build(self) -> Result<StreamSender> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };

        let config = self.config;
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(
                SocketConnector::new()
                    .connect_timeout(config.connect_timeout)
                    .send_timeout(config.send_timeout)
                    .no_delay(config.no_delay),
            ),
        };
        let resolver: Arc<dyn Resolve> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DefaultResolver),
        };

        tracing::debug!(
            address = %self.address,
            max_queue_depth = config.max_queue_depth,
            "stream sender created"
        );

        Ok(StreamSender {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::new(&config)),
                address: self.address,
                family: config.address_family,
                resolver,
                connector,
                runtime,
            }),
        })
    }
}
