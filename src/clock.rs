//! The scheduler's only two points of contact with wall-clock time and the
//! async runtime, kept behind traits so tests can drive both by hand. The
//! production implementation mirrors `event.rs`'s `Session` timer
//! bookkeeping: a `tokio::spawn`ed sleep whose `JoinHandle` is stashed away
//! and aborted on cancellation, rather than a `DelayQueue` or timer wheel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::trace;

/// Milliseconds since the Unix epoch, the same unit `Priority` uses when a
/// [`crate::scheduler::Scheduler`] interprets it as a deadline.
pub type Millis = i64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Millis;
}

/// A monotonic token identifying one armed timer, returned by
/// [`TimerSource::arm`] and later passed to [`TimerSource::cancel`].
pub type TimerId = u64;

/// Schedules a single deferred callback. A [`crate::scheduler::Scheduler`]
/// only ever has at most one timer armed at a time — it cancels the
/// previous one before arming the next — so implementations do not need to
/// support concurrent timers for the same source.
pub trait TimerSource: Send + Sync {
    /// Arms a timer that fires `fire` after `delay`. `delay` may be zero or
    /// negative (an already-due deadline); implementations fire those as
    /// soon as possible rather than rejecting them.
    fn arm(&self, delay: Duration, fire: Box<dyn FnOnce() + Send>) -> TimerId;

    fn cancel(&self, id: TimerId);
}

/// Reads `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as Millis
    }
}

/// Arms timers with `tokio::time::sleep` on a background task, the same
/// shape as `Session::set_internal`: spawn, hold the `JoinHandle`, `abort`
/// it on cancel.
#[derive(Default)]
pub struct TokioTimerSource {
    next_id: AtomicU64,
    handles: Mutex<std::collections::HashMap<TimerId, JoinHandle<()>>>,
}

impl TokioTimerSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerSource for TokioTimerSource {
    fn arm(&self, delay: Duration, fire: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        self.handles.lock().expect("timer handle table poisoned").insert(id, handle);
        trace!(timer_id = id, delay_ms = delay.as_millis() as u64, "timer armed");
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.handles.lock().expect("timer handle table poisoned").remove(&id) {
            handle.abort();
            trace!(timer_id = id, "timer cancelled");
        }
    }
}

type PendingFire = Box<dyn FnOnce() + Send>;

struct FakeState {
    now: Millis,
    pending: Vec<(TimerId, Millis, Option<PendingFire>)>,
    next_id: u64,
}

/// A clock and timer source under direct test control: `advance` moves
/// time forward and fires anything now due, instead of relying on the
/// passage of real wall-clock time.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClock {
    pub fn new(start: Millis) -> Self {
        Self { state: Arc::new(Mutex::new(FakeState { now: start, pending: Vec::new(), next_id: 0 })) }
    }

    /// Moves the clock forward by `delta`, firing (in deadline order) every
    /// timer whose deadline is now at or before the new time.
    pub fn advance(&self, delta: Duration) {
        let mut due = Vec::new();
        {
            let mut state = self.state.lock().expect("fake clock poisoned");
            state.now += delta.as_millis() as Millis;
            let now = state.now;
            state.pending.retain_mut(|(id, deadline, fire)| {
                if *deadline <= now {
                    if let Some(fire) = fire.take() {
                        due.push((*id, *deadline, fire));
                    }
                    false
                } else {
                    true
                }
            });
        }
        due.sort_by_key(|(_, deadline, _)| *deadline);
        for (_, _, fire) in due {
            fire();
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Millis {
        self.state.lock().expect("fake clock poisoned").now
    }
}

impl TimerSource for FakeClock {
    fn arm(&self, delay: Duration, fire: Box<dyn FnOnce() + Send>) -> TimerId {
        let mut state = self.state.lock().expect("fake clock poisoned");
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.now + delay.as_millis() as Millis;
        state.pending.push((id, deadline, Some(fire)));
        id
    }

    fn cancel(&self, id: TimerId) {
        let mut state = self.state.lock().expect("fake clock poisoned");
        state.pending.retain(|(pending_id, _, _)| *pending_id != id);
    }
}
