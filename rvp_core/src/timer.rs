use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle, time::Instant};

/// Result of arming a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    /// The callback will run on a runtime task once the deadline passes.
    Scheduled,
    /// The delay was zero and the callback already ran on the caller's stack.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Armed,
    Fired,
    Cancelled,
}

struct Slot {
    deadline: Instant,
    status: Status,
}

struct Shared {
    slot: Mutex<Slot>,
    reset: Notify,
}

struct Timer {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

/// Holds at most one timer at a time.
///
/// Cancelling is always safe: a timer that already fired or was already
/// cancelled is simply forgotten. Callers that race a timer against another
/// event must make the callback itself tolerate running late.
#[derive(Default)]
pub struct TimeoutScheduler {
    active: Option<Timer>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any active timer with one that calls `on_expire` after `delay`.
    ///
    /// Must be called from within a Tokio runtime unless `delay` is zero.
    pub fn arm<F>(&mut self, delay: Duration, on_expire: F) -> Armed
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        if delay.is_zero() {
            on_expire();
            return Armed::Expired;
        }

        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                deadline: Instant::now() + delay,
                status: Status::Armed,
            }),
            reset: Notify::new(),
        });
        let task = tokio::spawn(run(shared.clone(), on_expire));
        self.active = Some(Timer { shared, task });
        Armed::Scheduled
    }

    /// Move the deadline of the active timer to `delay` from now. Falls back
    /// to [`arm`](Self::arm) when no timer is pending.
    pub fn rearm<F>(&mut self, delay: Duration, on_expire: F) -> Armed
    where
        F: FnOnce() + Send + 'static,
    {
        if !delay.is_zero() {
            if let Some(timer) = &self.active {
                let mut slot = timer.shared.slot.lock();
                if slot.status == Status::Armed {
                    slot.deadline = Instant::now() + delay;
                    drop(slot);
                    timer.shared.reset.notify_one();
                    return Armed::Scheduled;
                }
            }
        }
        self.arm(delay, on_expire)
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.active.take() {
            {
                let mut slot = timer.shared.slot.lock();
                if slot.status == Status::Armed {
                    slot.status = Status::Cancelled;
                }
            }
            timer.task.abort();
        }
    }

    /// A timer is scheduled and has neither fired nor been cancelled.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|timer| timer.shared.slot.lock().status == Status::Armed)
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run<F>(shared: Arc<Shared>, on_expire: F)
where
    F: FnOnce() + Send + 'static,
{
    loop {
        let deadline = {
            let slot = shared.slot.lock();
            if slot.status != Status::Armed {
                return;
            }
            slot.deadline
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = shared.reset.notified() => continue,
        }

        let fire = {
            let mut slot = shared.slot.lock();
            match slot.status {
                Status::Armed if slot.deadline <= Instant::now() => {
                    slot.status = Status::Fired;
                    true
                }
                Status::Armed => false,
                Status::Fired | Status::Cancelled => return,
            }
        };

        if fire {
            on_expire();
            return;
        }
    }
}
