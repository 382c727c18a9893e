//! The thread-safe, async-aware facade: a single `Arc<Mutex<..>>` stack of
//! `Stream<Events<PairingHeap>>>` plus one armed timer for the earliest due
//! item. Because the three lower layers already compose synchronously
//! under one lock, a timer firing can simply call the stack's own `poll` in
//! a loop — that call cascades through the event and stream layers on its
//! own, so there is no callback cycle to design around.

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, Millis, SystemClock, TimerId, TimerSource, TokioTimerSource};
use crate::error::{Error, Result};
use crate::events::{Event, Events};
use crate::handle::{Handle, Ref};
use crate::heap::PairingHeap;
use crate::queue::{Polled, Priority, PriorityChange, PriorityQueue};
use crate::stream::{Consumer, Stream};

type Stack<Id, T> = Stream<Id, T, Events<Id, T, PairingHeap<Id, T>>>;

struct Armed {
    id: TimerId,
    deadline: Millis,
}

struct Inner<Id, T, C, TS> {
    stack: Mutex<Stack<Id, T>>,
    clock: C,
    timer_source: TS,
    armed: Mutex<Option<Armed>>,
    running: AtomicBool,
}

/// Priorities are interpreted as millisecond deadlines: an item becomes due
/// once `priority <= clock.now()`. A single timer, rearmed after every
/// mutation, fires `drain` at the next due deadline so callers don't have
/// to poll the scheduler themselves.
pub struct Scheduler<Id, T, C = SystemClock, TS = TokioTimerSource> {
    inner: Arc<Inner<Id, T, C, TS>>,
}

impl<Id, T, C, TS> Clone for Scheduler<Id, T, C, TS> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<Id, T> Scheduler<Id, T, SystemClock, TokioTimerSource>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// A scheduler over the production clock and a `tokio`-backed timer,
    /// already running.
    pub fn new() -> Self {
        SchedulerBuilder::new()
            .clock(SystemClock)
            .timer_source(TokioTimerSource::new())
            .build()
            .expect("default clock and timer source are always valid")
    }
}

impl<Id, T> Default for Scheduler<Id, T, SystemClock, TokioTimerSource>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Id, T, C, TS> Scheduler<Id, T, C, TS>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
    TS: TimerSource + Send + Sync + 'static,
{
    /// Begins timer-driven draining: anything already due is polled (and so
    /// pushed to the stream buffer and reported to listeners) immediately,
    /// and a timer is armed for whatever is next.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.drain();
    }

    /// Stops timer-driven draining. Manual `insert`/`poll`/`remove` keep
    /// working; nothing fires on its own until `start` is called again.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(armed) = self.inner.armed.lock().expect("scheduler armed-timer mutex poisoned").take() {
            self.inner.timer_source.cancel(armed.id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn insert(&self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>> {
        let handle = {
            let mut stack = self.inner.stack.lock().expect("scheduler stack mutex poisoned");
            stack.insert(priority, payload, id)?
        };
        self.reset_timer();
        Ok(handle)
    }

    pub fn peek(&self) -> Option<Handle<Id, T>> {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").peek()
    }

    pub fn peek_priority(&self) -> Option<Priority> {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").peek_priority()
    }

    /// Pops the current minimum regardless of whether it is due yet. Unlike
    /// timer-driven draining, a manual call is unconditional.
    pub fn poll(&self) -> Option<Polled<Id, T>> {
        let result = self.inner.stack.lock().expect("scheduler stack mutex poisoned").poll();
        self.reset_timer();
        result
    }

    pub fn remove(&self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>> {
        let result = self.inner.stack.lock().expect("scheduler stack mutex poisoned").remove(reference)?;
        self.reset_timer();
        Ok(result)
    }

    pub fn set_priority(&self, reference: Ref<Id, T>, new_priority: Priority) -> Result<PriorityChange<Id, T>> {
        let result = self
            .inner
            .stack
            .lock()
            .expect("scheduler stack mutex poisoned")
            .set_priority(reference, new_priority)?;
        self.reset_timer();
        Ok(result)
    }

    pub fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").get(reference)
    }

    pub fn has(&self, reference: Ref<Id, T>) -> bool {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").has(reference)
    }

    pub fn clear(&self) {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").clear();
        self.reset_timer();
    }

    pub fn size(&self) -> usize {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").size()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Registers a listener for a named event (see [`Event::name`]) fired
    /// by mutations this scheduler performs, including ones driven by its
    /// own timer.
    pub fn on(&self, name: &'static str, listener: impl FnMut(&Event<Id, T>) + Send + 'static) -> u64 {
        self.inner
            .stack
            .lock()
            .expect("scheduler stack mutex poisoned")
            .inner_mut()
            .on(name, listener)
    }

    pub fn off(&self, id: u64) -> bool {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").inner_mut().off(id)
    }

    pub fn consumer(&self) -> Consumer<Id, T> {
        self.inner.stack.lock().expect("scheduler stack mutex poisoned").consumer()
    }

    /// A snapshot of every handle currently held, in no particular order.
    pub fn values(&self) -> Vec<Handle<Id, T>> {
        self.inner
            .stack
            .lock()
            .expect("scheduler stack mutex poisoned")
            .inner()
            .inner()
            .iter()
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    fn drain(&self) {
        if !self.inner.running.load(Ordering::SeqCst) {
            // A timer fired just as `stop()` raced it; the timer source
            // does not guarantee `cancel` preempts an in-flight callback.
            warn!("timer fired after scheduler was stopped, ignoring");
            return;
        }
        let now = self.inner.clock.now();
        {
            let mut stack = self.inner.stack.lock().expect("scheduler stack mutex poisoned");
            while matches!(stack.peek_priority(), Some(p) if p <= now) {
                stack.poll();
            }
        }
        self.reset_timer();
    }

    fn reset_timer(&self) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }
        let next = self.inner.stack.lock().expect("scheduler stack mutex poisoned").peek_priority();
        let mut armed = self.inner.armed.lock().expect("scheduler armed-timer mutex poisoned");
        match next {
            None => {
                if let Some(a) = armed.take() {
                    self.inner.timer_source.cancel(a.id);
                }
            }
            Some(deadline) => {
                let needs_rearm = match armed.as_ref() {
                    Some(a) => a.deadline != deadline,
                    None => true,
                };
                if needs_rearm {
                    if let Some(a) = armed.take() {
                        self.inner.timer_source.cancel(a.id);
                    }
                    let now = self.inner.clock.now();
                    let delay = Duration::from_millis((deadline - now).max(0) as u64);
                    let scheduler = self.clone();
                    let id = self.inner.timer_source.arm(
                        delay,
                        Box::new(move || scheduler.drain()),
                    );
                    debug!(deadline, delay_ms = delay.as_millis() as u64, "scheduler timer (re)armed");
                    *armed = Some(Armed { id, deadline });
                }
            }
        }
    }
}

impl<Id, T, C, TS> PriorityQueue<Id, T> for Scheduler<Id, T, C, TS>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
    TS: TimerSource + Send + Sync + 'static,
{
    fn insert(&mut self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>> {
        Scheduler::insert(self, priority, payload, id)
    }

    fn peek(&self) -> Option<Handle<Id, T>> {
        Scheduler::peek(self)
    }

    fn peek_priority(&self) -> Option<Priority> {
        Scheduler::peek_priority(self)
    }

    fn poll(&mut self) -> Option<Polled<Id, T>> {
        Scheduler::poll(self)
    }

    fn remove(&mut self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>> {
        Scheduler::remove(self, reference)
    }

    fn set_priority(&mut self, reference: Ref<Id, T>, new_priority: Priority) -> Result<PriorityChange<Id, T>> {
        Scheduler::set_priority(self, reference, new_priority)
    }

    fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        Scheduler::get(self, reference)
    }

    fn has(&self, reference: Ref<Id, T>) -> bool {
        Scheduler::has(self, reference)
    }

    fn clear(&mut self) {
        Scheduler::clear(self)
    }

    fn size(&self) -> usize {
        Scheduler::size(self)
    }
}

/// Builds a [`Scheduler`] from an explicit clock and timer source, the way
/// `unreplicated.rs`'s replica constructors take their collaborators as
/// explicit arguments rather than reaching for a global default.
pub struct SchedulerBuilder<Id, T, C, TS> {
    clock: Option<C>,
    timer_source: Option<TS>,
    auto_start: bool,
    ready_buffer_capacity: Option<usize>,
    _marker: PhantomData<(Id, T)>,
}

impl<Id, T, C, TS> Default for SchedulerBuilder<Id, T, C, TS> {
    fn default() -> Self {
        Self {
            clock: None,
            timer_source: None,
            auto_start: true,
            ready_buffer_capacity: None,
            _marker: PhantomData,
        }
    }
}

impl<Id, T, C, TS> SchedulerBuilder<Id, T, C, TS>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
    TS: TimerSource + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(mut self, clock: C) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn timer_source(mut self, timer_source: TS) -> Self {
        self.timer_source = Some(timer_source);
        self
    }

    /// Whether `build` leaves the scheduler already running (the default)
    /// or waiting for an explicit `start()` call.
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Bounds the number of drained-but-not-yet-consumed items the stream
    /// layer keeps buffered. `None` (the default) means unbounded.
    pub fn ready_buffer_capacity(mut self, capacity: Option<usize>) -> Self {
        self.ready_buffer_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Scheduler<Id, T, C, TS>> {
        let clock = self
            .clock
            .ok_or_else(|| Error::InvalidConfig("a clock is required to build a scheduler".to_string()))?;
        let timer_source = self
            .timer_source
            .ok_or_else(|| Error::InvalidConfig("a timer source is required to build a scheduler".to_string()))?;
        if self.ready_buffer_capacity == Some(0) {
            return Err(Error::InvalidConfig("ready buffer capacity must be greater than zero".to_string()));
        }
        let scheduler = Scheduler {
            inner: Arc::new(Inner {
                stack: Mutex::new(Stream::with_capacity(Events::new(PairingHeap::new()), self.ready_buffer_capacity)),
                clock,
                timer_source,
                armed: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        };
        if self.auto_start {
            scheduler.start();
        }
        Ok(scheduler)
    }
}
