//! Connection state machine.
//!
//! Everything here runs under the connection lock. Methods never call user
//! code or transport I/O directly: callbacks and transport releases are
//! queued on the outbox and network operations are staged as a
//! [`Dispatch`] for the caller to issue once the lock is dropped.

use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use courier_core::Completion;

use crate::config::{EvictionPolicy, FaultPolicy, SenderConfig};
use crate::endpoint::{AddressFamily, Endpoint, Resolve};
use crate::error::{Error, Result};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Unconnected,
    Connecting,
    Open,
    Closed,
}

struct PendingSend {
    payload: Bytes,
    on_complete: Completion,
}

enum InFlight {
    Connect,
    Send(Completion),
}

/// A network operation to issue outside the lock.
pub(crate) enum Dispatch {
    Connect(Endpoint),
    Send(Box<dyn Transport>, Bytes),
}

/// Result of a dispatched operation.
pub(crate) enum Outcome {
    Connected(Result<Box<dyn Transport>>),
    Sent(Box<dyn Transport>, Result<()>),
}

/// Work to run after the lock is released, in order.
pub(crate) enum Delivery {
    Callback(Completion, Result<()>),
    Release {
        transport: Option<Box<dyn Transport>>,
        waiters: Vec<Completion>,
    },
}

impl Delivery {
    pub(crate) fn deliver(self) {
        match self {
            Delivery::Callback(on_complete, result) => invoke(on_complete, result),
            Delivery::Release { transport, waiters } => {
                let result = match transport {
                    Some(mut transport) => transport.close(),
                    None => Ok(()),
                };
                match &result {
                    Ok(()) => tracing::debug!(waiters = waiters.len(), "transport released"),
                    Err(e) => tracing::warn!(error = %e, "error releasing transport"),
                }
                for waiter in waiters {
                    invoke(waiter, result.clone());
                }
            }
        }
    }
}

/// Run a user callback, containing any panic so the dispatch loop and the
/// deliveries queued behind it carry on.
fn invoke(on_complete: Completion, result: Result<()>) {
    if panic::catch_unwind(AssertUnwindSafe(move || on_complete(result))).is_err() {
        tracing::error!("completion callback panicked");
    }
}

/// Point-in-time view of a sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Payloads waiting for transmission
    pub queued: usize,
    /// Whether a connect or send is outstanding
    pub in_flight: bool,
    /// Whether a transport is established
    pub connected: bool,
    /// Whether an error is latched
    pub faulted: bool,
    /// Whether the connection has been closed
    pub closed: bool,
    /// Payloads written successfully
    pub sent: u64,
    /// Payloads completed with an error
    pub failed: u64,
    /// Payloads evicted by queue overflow
    pub evicted: u64,
}

pub(crate) struct ConnectionState {
    phase: Phase,
    /// Held while connected and idle; lent to the dispatched send otherwise
    transport: Option<Box<dyn Transport>>,
    in_flight: Option<InFlight>,
    staged: Option<Dispatch>,
    latched: Option<Error>,
    queue: VecDeque<PendingSend>,
    max_queue_depth: usize,
    eviction: EvictionPolicy,
    fault_policy: FaultPolicy,
    flush_waiters: Vec<Completion>,
    close_waiters: Vec<Completion>,
    outbox: VecDeque<Delivery>,
    /// Set while some thread owns the dispatch loop
    pub(crate) driving: bool,
    sent: u64,
    failed: u64,
    evicted: u64,
}

impl ConnectionState {
    pub(crate) fn new(config: &SenderConfig) -> Self {
        Self {
            phase: Phase::Unconnected,
            transport: None,
            in_flight: None,
            staged: None,
            latched: None,
            queue: VecDeque::new(),
            max_queue_depth: config.max_queue_depth,
            eviction: config.eviction,
            fault_policy: config.fault_policy,
            flush_waiters: Vec::new(),
            close_waiters: Vec::new(),
            outbox: VecDeque::new(),
            driving: false,
            sent: 0,
            failed: 0,
            evicted: 0,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    fn busy(&self) -> bool {
        self.in_flight.is_some() || self.staged.is_some()
    }

    fn outcome(&self) -> Result<()> {
        match &self.latched {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn latch(&mut self, error: Error) {
        if self.latched.is_none() {
            tracing::warn!(error = %error, queued = self.queue.len(), "connection faulted");
            self.latched = Some(error);
        }
    }

    pub(crate) fn stats(&self) -> SenderStats {
        SenderStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.is_some(),
            connected: self.phase == Phase::Open,
            faulted: self.latched.is_some(),
            closed: self.phase == Phase::Closed,
            sent: self.sent,
            failed: self.failed,
            evicted: self.evicted,
        }
    }

    /// Resolve the endpoint and stage a connect.
    pub(crate) fn connect(&mut self, resolver: &dyn Resolve, address: &str, family: AddressFamily) {
        if self.busy() {
            tracing::warn!(address, "connect ignored while an operation is in flight");
            return;
        }
        if self.phase == Phase::Closed {
            self.reset();
        }
        if let Some(previous) = self.transport.take() {
            self.outbox.push_back(Delivery::Release {
                transport: Some(previous),
                waiters: Vec::new(),
            });
        }

        match resolver.resolve(address, family) {
            Ok(endpoint) => {
                tracing::debug!(%endpoint, "connecting");
                self.phase = Phase::Connecting;
                self.in_flight = Some(InFlight::Connect);
                self.staged = Some(Dispatch::Connect(endpoint));
            }
            Err(e) => {
                self.phase = Phase::Unconnected;
                self.latch(e);
            }
        }
    }

    /// Connect unless a transport is already held or being established.
    pub(crate) fn ensure_connected(
        &mut self,
        resolver: &dyn Resolve,
        address: &str,
        family: AddressFamily,
    ) {
        if self.busy() {
            return;
        }
        match (self.phase, self.latched.is_some(), self.fault_policy) {
            (Phase::Closed, _, _) => self.connect(resolver, address, family),
            (_, true, FaultPolicy::Sticky) => {
                tracing::debug!(address, "connection faulted; close it before reconnecting");
            }
            (_, true, FaultPolicy::ResetOnReconnect) => {
                self.reset();
                self.connect(resolver, address, family);
            }
            (Phase::Unconnected, false, _) => self.connect(resolver, address, family),
            (Phase::Open | Phase::Connecting, false, _) => {}
        }
    }

    fn reset(&mut self) {
        self.latched = None;
        self.phase = Phase::Unconnected;
    }

    pub(crate) fn enqueue(&mut self, payload: Bytes, on_complete: Completion) {
        if self.phase == Phase::Closed {
            self.failed += 1;
            self.outbox
                .push_back(Delivery::Callback(on_complete, Err(Error::ConnectionClosed)));
            return;
        }

        if self.max_queue_depth != 0 {
            while self.queue.len() >= self.max_queue_depth {
                let Some(oldest) = self.queue.pop_front() else {
                    break;
                };
                self.evicted += 1;
                tracing::debug!(
                    bytes = oldest.payload.len(),
                    max_queue_depth = self.max_queue_depth,
                    "send queue full, evicting oldest payload"
                );
                match self.eviction {
                    EvictionPolicy::Silent => drop(oldest),
                    EvictionPolicy::Notify => self
                        .outbox
                        .push_back(Delivery::Callback(oldest.on_complete, Err(Error::Dropped))),
                }
            }
        }

        self.queue.push_back(PendingSend {
            payload,
            on_complete,
        });
    }

    pub(crate) fn add_flush_waiter(&mut self, on_complete: Completion) {
        self.flush_waiters.push(on_complete);
    }

    pub(crate) fn add_close_waiter(&mut self, on_complete: Completion) {
        self.close_waiters.push(on_complete);
    }

    /// Apply the outcome of the operation that was in flight.
    pub(crate) fn complete(&mut self, outcome: Outcome) {
        let in_flight = self.in_flight.take();
        match outcome {
            Outcome::Connected(Ok(transport)) => {
                tracing::debug!(queued = self.queue.len(), "connected");
                self.transport = Some(transport);
                self.phase = Phase::Open;
            }
            Outcome::Connected(Err(e)) => {
                self.phase = Phase::Unconnected;
                self.latch(e);
            }
            Outcome::Sent(transport, result) => {
                self.transport = Some(transport);
                match &result {
                    Ok(()) => self.sent += 1,
                    Err(e) => {
                        self.failed += 1;
                        self.latch(e.clone());
                    }
                }
                if let Some(InFlight::Send(on_complete)) = in_flight {
                    self.outbox.push_back(Delivery::Callback(on_complete, result));
                }
            }
        }
    }

    /// Advance the pipeline by at most one dispatch.
    ///
    /// Returns the operation to issue, if any. Drained payloads, resolved
    /// flushes and a performed close land on the outbox.
    pub(crate) fn next_step(&mut self) -> Option<Dispatch> {
        if let Some(dispatch) = self.staged.take() {
            return Some(dispatch);
        }
        if self.in_flight.is_some() {
            return None;
        }

        if let Some(err) = self.latched.clone() {
            self.fail_queue(err);
        }
        if self.transport.is_none() && !self.close_waiters.is_empty() {
            self.fail_queue(Error::ConnectionClosed);
        }

        if self.queue.is_empty() {
            if !self.flush_waiters.is_empty() {
                let result = self.outcome();
                tracing::debug!(waiters = self.flush_waiters.len(), "flush resolved");
                for waiter in mem::take(&mut self.flush_waiters) {
                    self.outbox.push_back(Delivery::Callback(waiter, result.clone()));
                }
            }
            if !self.close_waiters.is_empty() {
                self.release();
            }
            return None;
        }

        // Payloads wait in the queue until a connect completes.
        let transport = self.transport.take()?;
        let Some(next) = self.queue.pop_front() else {
            self.transport = Some(transport);
            return None;
        };
        self.in_flight = Some(InFlight::Send(next.on_complete));
        Some(Dispatch::Send(transport, next.payload))
    }

    fn fail_queue(&mut self, error: Error) {
        if self.queue.is_empty() {
            return;
        }
        tracing::debug!(count = self.queue.len(), error = %error, "draining send queue");
        for pending in self.queue.drain(..) {
            self.failed += 1;
            self.outbox
                .push_back(Delivery::Callback(pending.on_complete, Err(error.clone())));
        }
    }

    fn release(&mut self) {
        self.phase = Phase::Closed;
        let transport = self.transport.take();
        let waiters = mem::take(&mut self.close_waiters);
        self.outbox.push_back(Delivery::Release { transport, waiters });
    }

    pub(crate) fn take_outbox(&mut self) -> VecDeque<Delivery> {
        mem::take(&mut self.outbox)
    }
}
