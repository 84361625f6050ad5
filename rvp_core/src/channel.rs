use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::{
    error::ChannelError,
    outcome::{Failure, OpKind, Outcome, StateKind},
    pending::{OperationId, PendingOperation, Waiter},
    timer::TimeoutScheduler,
};

/// What a channel is currently holding. A writer and a reader are never
/// stored at the same time: the second one to arrive pairs with the first.
enum ChannelState {
    Standby,
    WriteWaiting {
        payload: Bytes,
        writer: PendingOperation,
    },
    ReadWaiting {
        reader: PendingOperation,
    },
}

impl ChannelState {
    fn kind(&self) -> StateKind {
        match self {
            ChannelState::Standby => StateKind::Standby,
            ChannelState::WriteWaiting { .. } => StateKind::WriteWaiting,
            ChannelState::ReadWaiting { .. } => StateKind::ReadWaiting,
        }
    }

    fn pending_id(&self) -> Option<OperationId> {
        match self {
            ChannelState::Standby => None,
            ChannelState::WriteWaiting { writer, .. } => Some(writer.id()),
            ChannelState::ReadWaiting { reader } => Some(reader.id()),
        }
    }

    fn into_pending(self) -> Option<PendingOperation> {
        match self {
            ChannelState::Standby => None,
            ChannelState::WriteWaiting { writer, .. } => Some(writer),
            ChannelState::ReadWaiting { reader } => Some(reader),
        }
    }
}

struct Inner {
    state: ChannelState,
    timer: TimeoutScheduler,
    next_op: u64,
    closed: bool,
}

impl Inner {
    /// Swap the state for `Standby`. The per-operation timer only runs while
    /// something is waiting, so it goes too.
    fn reset(&mut self) -> ChannelState {
        self.timer.cancel();
        std::mem::replace(&mut self.state, ChannelState::Standby)
    }
}

struct Shared {
    name: Arc<str>,
    operation_timeout: Duration,
    inner: Mutex<Inner>,
}

/// A named rendezvous point handing one payload from a writer to a reader.
///
/// Every operation holds the channel lock for its whole duration, so the
/// state a caller observes and the transition it makes are one atomic step.
/// Handles are cheap to clone and all refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    pub fn new(name: impl Into<Arc<str>>, operation_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                operation_timeout,
                inner: Mutex::new(Inner {
                    state: ChannelState::Standby,
                    timer: TimeoutScheduler::new(),
                    next_op: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn operation_timeout(&self) -> Duration {
        self.shared.operation_timeout
    }

    pub fn state(&self) -> StateKind {
        self.shared.inner.lock().state.kind()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Both handles refer to the same channel instance.
    pub fn same(a: &Channel, b: &Channel) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    /// Offer `payload` to a reader.
    ///
    /// Pairs at once with a waiting reader, otherwise parks until a reader
    /// arrives, the operation timeout passes, or the writer disconnects.
    pub fn write(&self, payload: Bytes) -> Result<Waiter, ChannelError> {
        let mut inner = self.shared.inner.lock();
        let id = self.admit(&mut inner)?;

        let waiter = match std::mem::replace(&mut inner.state, ChannelState::Standby) {
            ChannelState::Standby => {
                debug!(channel = %self.shared.name, op = %id, bytes = payload.len(), "writer waiting");
                self.park(&mut inner, id, OpKind::Write, |writer| {
                    ChannelState::WriteWaiting { payload, writer }
                })
            }
            waiting @ ChannelState::WriteWaiting { .. } => {
                inner.state = waiting;
                debug!(channel = %self.shared.name, "rejected second writer");
                return Err(self.conflict(OpKind::Write));
            }
            ChannelState::ReadWaiting { reader } => {
                inner.timer.cancel();
                let reader_id = reader.id();
                match reader.deliver(payload) {
                    Ok(()) => {
                        debug!(channel = %self.shared.name, writer = %id, reader = %reader_id, "paired");
                        Waiter::ready(id, OpKind::Write, Outcome::Ok)
                    }
                    Err(_) => {
                        debug!(channel = %self.shared.name, reader = %reader_id, "waiting reader already gone");
                        Waiter::ready(id, OpKind::Write, Outcome::PeerDisconnected)
                    }
                }
            }
        };
        Ok(waiter)
    }

    /// Ask for a payload. Mirror image of [`write`](Self::write).
    pub fn read(&self) -> Result<Waiter, ChannelError> {
        let mut inner = self.shared.inner.lock();
        let id = self.admit(&mut inner)?;

        let waiter = match std::mem::replace(&mut inner.state, ChannelState::Standby) {
            ChannelState::Standby => {
                debug!(channel = %self.shared.name, op = %id, "reader waiting");
                self.park(&mut inner, id, OpKind::Read, |reader| {
                    ChannelState::ReadWaiting { reader }
                })
            }
            waiting @ ChannelState::ReadWaiting { .. } => {
                inner.state = waiting;
                debug!(channel = %self.shared.name, "rejected second reader");
                return Err(self.conflict(OpKind::Read));
            }
            ChannelState::WriteWaiting { payload, writer } => {
                inner.timer.cancel();
                let writer_id = writer.id();
                if writer.succeed() {
                    debug!(channel = %self.shared.name, writer = %writer_id, reader = %id, "paired");
                    Waiter::ready(id, OpKind::Read, Outcome::Data(payload))
                } else {
                    debug!(channel = %self.shared.name, writer = %writer_id, "waiting writer already gone");
                    Waiter::ready(id, OpKind::Read, Outcome::PeerDisconnected)
                }
            }
        };
        Ok(waiter)
    }

    /// The caller of operation `id` went away before being resolved.
    ///
    /// Nothing is sent to it; the channel simply returns to standby.
    pub fn disconnect(&self, id: OperationId) {
        let mut inner = self.shared.inner.lock();
        if inner.state.pending_id() != Some(id) {
            trace!(channel = %self.shared.name, op = %id, "disconnect for resolved operation ignored");
            return;
        }
        if let Some(op) = inner.reset().into_pending() {
            debug!(channel = %self.shared.name, op = %id, kind = %op.kind(), "peer disconnected while waiting");
            op.disconnected();
        }
    }

    /// Operation `id` waited too long for its counterpart.
    pub fn expire(&self, id: OperationId) {
        let mut inner = self.shared.inner.lock();
        if inner.state.pending_id() != Some(id) {
            trace!(channel = %self.shared.name, op = %id, "timeout for resolved operation ignored");
            return;
        }
        if let Some(op) = inner.reset().into_pending() {
            let kind = op.kind();
            if op.fail(Failure::Timeout) {
                debug!(channel = %self.shared.name, op = %id, %kind, "timed out");
            } else {
                debug!(channel = %self.shared.name, op = %id, %kind, "timed out after caller left");
            }
        }
    }

    /// Tear the channel down, failing any waiting operation with `Closed`.
    ///
    /// Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        if let Some(op) = inner.reset().into_pending() {
            debug!(channel = %self.shared.name, op = %op.id(), kind = %op.kind(), "failing waiting operation");
            op.fail(Failure::Closed);
        }
        info!(channel = %self.shared.name, "channel closed");
        true
    }

    fn admit(&self, inner: &mut Inner) -> Result<OperationId, ChannelError> {
        if inner.closed {
            return Err(ChannelError::Closed {
                channel: self.shared.name.to_string(),
            });
        }
        inner.next_op += 1;
        Ok(OperationId::new(inner.next_op))
    }

    fn conflict(&self, kind: OpKind) -> ChannelError {
        ChannelError::Conflict {
            channel: self.shared.name.to_string(),
            kind,
        }
    }

    /// Store a new waiting operation and arm its timeout.
    ///
    /// The channel must be in standby when this is called.
    fn park<F>(&self, inner: &mut Inner, id: OperationId, kind: OpKind, build: F) -> Waiter
    where
        F: FnOnce(PendingOperation) -> ChannelState,
    {
        let timeout = self.shared.operation_timeout;
        if timeout.is_zero() {
            debug!(channel = %self.shared.name, op = %id, %kind, "zero operation timeout");
            return Waiter::ready(id, kind, Outcome::Timeout);
        }

        let (op, rx) = PendingOperation::new(id, kind);
        inner.state = build(op);

        let on_expire = self.downgrade();
        inner.timer.arm(timeout, move || {
            if let Some(channel) = upgrade(&on_expire) {
                channel.expire(id);
            }
        });

        let on_disconnect = self.downgrade();
        Waiter::parked(id, rx, move |id| {
            if let Some(channel) = upgrade(&on_disconnect) {
                channel.disconnect(id);
            }
        })
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    #[cfg(test)]
    fn timer_active(&self) -> bool {
        self.shared.inner.lock().timer.is_active()
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<Channel> {
    weak.upgrade().map(|shared| Channel { shared })
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        match &inner.state {
            ChannelState::WriteWaiting { payload, .. } => write!(
                f,
                "Channel '{}' with state: WriteWaiting ({} bytes)",
                self.shared.name,
                payload.len()
            ),
            state => write!(f, "Channel '{}' with state: {}", self.shared.name, state.kind()),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.inner.try_lock().map(|inner| inner.state.kind());
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("state", &state)
            .finish()
    }
}
