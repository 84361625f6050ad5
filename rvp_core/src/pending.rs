use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{
    error::ChannelError,
    outcome::{Failure, OpKind, Outcome},
};

/// Identifies one suspended caller within its channel.
///
/// Timers and disconnect notifications carry the id they were armed for, so
/// a trigger that arrives after the operation was resolved by something else
/// finds a different id (or none) and does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The channel-side half of a suspended write or read.
///
/// Every resolving method takes `self`, so an operation can be resolved at
/// most once.
pub struct PendingOperation {
    id: OperationId,
    kind: OpKind,
    tx: Option<oneshot::Sender<Outcome>>,
}

impl PendingOperation {
    pub fn new(id: OperationId, kind: OpKind) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                kind,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// The waiting caller has gone away.
    pub fn is_disconnected(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Hand `payload` to a waiting reader. Gives the payload back if the
    /// reader is gone.
    pub fn deliver(self, payload: Bytes) -> Result<(), Bytes> {
        let returned = payload.clone();
        self.resolve(Outcome::Data(payload)).map_err(|_| returned)
    }

    /// Tell a waiting writer its payload was picked up.
    pub fn succeed(self) -> bool {
        self.resolve(Outcome::Ok).is_ok()
    }

    pub fn fail(self, failure: Failure) -> bool {
        self.resolve(failure.into()).is_ok()
    }

    /// Drop the operation because its caller vanished. Nothing is sent.
    pub fn disconnected(mut self) {
        self.tx.take();
    }

    fn resolve(mut self, outcome: Outcome) -> Result<(), Outcome> {
        match self.tx.take() {
            Some(tx) => tx.send(outcome),
            None => Err(outcome),
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if !tx.is_closed() {
                tracing::warn!(op = %self.id, kind = %self.kind, "pending operation dropped unresolved");
            }
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

type DisconnectHook = Box<dyn FnOnce(OperationId) + Send + 'static>;

/// The caller-side half: resolves to the operation's outcome.
///
/// Dropping a waiter that was parked on a channel before it produced an
/// outcome notifies the channel that the caller disconnected.
pub struct Waiter {
    id: OperationId,
    rx: oneshot::Receiver<Outcome>,
    on_disconnect: Option<DisconnectHook>,
}

impl Waiter {
    /// A waiter that is already resolved.
    pub(crate) fn ready(id: OperationId, kind: OpKind, outcome: Outcome) -> Self {
        let (op, rx) = PendingOperation::new(id, kind);
        let _ = op.resolve(outcome);
        Self {
            id,
            rx,
            on_disconnect: None,
        }
    }

    pub(crate) fn parked<F>(id: OperationId, rx: oneshot::Receiver<Outcome>, on_disconnect: F) -> Self
    where
        F: FnOnce(OperationId) + Send + 'static,
    {
        Self {
            id,
            rx,
            on_disconnect: Some(Box::new(on_disconnect)),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }
}

impl Future for Waiter {
    type Output = Result<Outcome, ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.on_disconnect = None;
                Poll::Ready(result.map_err(|_| ChannelError::Abandoned))
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(hook) = self.on_disconnect.take() {
            hook(self.id);
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("parked", &self.on_disconnect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use futures::FutureExt;

    use super::*;

    #[test]
    fn test_deliver_returns_payload_when_reader_gone() {
        let (op, rx) = PendingOperation::new(OperationId::new(1), OpKind::Read);
        drop(rx);
        assert!(op.is_disconnected());
        let payload = Bytes::from_static(b"hello");
        assert_eq!(op.deliver(payload.clone()), Err(payload));
    }

    #[tokio::test]
    async fn test_ready_waiter_resolves_immediately() {
        let mut waiter = Waiter::ready(OperationId::new(7), OpKind::Write, Outcome::Ok);
        let outcome = (&mut waiter).now_or_never();
        assert_eq!(outcome, Some(Ok(Outcome::Ok)));
    }

    #[tokio::test]
    async fn test_unresolved_operation_is_abandoned() {
        let (op, rx) = PendingOperation::new(OperationId::new(2), OpKind::Write);
        let waiter = Waiter::parked(op.id(), rx, |_| {});
        drop(op);
        assert_eq!(waiter.await, Err(ChannelError::Abandoned));
    }

    #[test]
    fn test_dropping_parked_waiter_fires_hook_once() {
        let fired = Arc::new(AtomicU64::new(0));
        let (op, rx) = PendingOperation::new(OperationId::new(9), OpKind::Read);
        let seen = fired.clone();
        let waiter = Waiter::parked(op.id(), rx, move |id| {
            seen.store(id.get(), Ordering::SeqCst);
        });
        drop(waiter);
        assert_eq!(fired.load(Ordering::SeqCst), 9);
        assert!(op.is_disconnected());
    }

    #[tokio::test]
    async fn test_resolved_waiter_does_not_fire_hook() {
        let fired = Arc::new(AtomicU64::new(0));
        let (op, rx) = PendingOperation::new(OperationId::new(4), OpKind::Read);
        let seen = fired.clone();
        let waiter = Waiter::parked(op.id(), rx, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(op.fail(Failure::Timeout));
        assert_eq!(waiter.await, Ok(Outcome::Timeout));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
