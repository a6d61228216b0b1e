use chrono::Utc;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Milliseconds on whatever timeline the active [`TimeSource`] reports.
pub type Millis = u64;

/// Gap after which an open typing burst is considered over.
pub const IDLE_THRESHOLD_MS: Millis = 2_000;

/// Source of "now" for the scheduler and everything that reads it
pub trait TimeSource {
    fn now_ms(&self) -> Millis;
}

/// Wall clock in unix milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> Millis {
        Utc::now().timestamp_millis().max(0) as Millis
    }
}

/// Virtual clock shared between a test (or replay driver) and the engine.
///
/// Clones observe the same instant, so the driver keeps one handle and moves
/// time forward while the engine reads it.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Rc<Cell<Millis>>,
}

impl ManualTime {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Millis) {
        self.now.set(self.now.get() + by);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}

/// Deferred work the engine knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Task {
    IdleExpiry,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Cancellable deferred-call queue.
///
/// Nothing fires on its own: the owner drains due tasks with [`Scheduler::pop_due`]
/// whenever its driver gets control, which keeps every handler single-threaded
/// and lets tests step through virtual time.
pub struct Scheduler {
    time: Box<dyn TimeSource>,
    pending: BTreeMap<(Millis, TimerId), Task>,
    deadlines: HashMap<TimerId, Millis>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(time: Box<dyn TimeSource>) -> Self {
        Self {
            time,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn now_ms(&self) -> Millis {
        self.time.now_ms()
    }

    pub fn schedule(&mut self, delay_ms: Millis, task: Task) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let due = self.now_ms().saturating_add(delay_ms);
        self.pending.insert((due, id), task);
        self.deadlines.insert(id, due);
        id
    }

    /// Cancelling a timer that already fired (or never existed) is a no-op.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(due) = self.deadlines.remove(&id) {
            self.pending.remove(&(due, id));
        }
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.pending.keys().next().map(|(due, _)| *due)
    }

    /// Removes and returns the earliest task whose deadline has passed.
    /// Ties fire in scheduling order.
    pub fn pop_due(&mut self) -> Option<(Millis, Task)> {
        let now = self.now_ms();
        let (&(due, id), _) = self.pending.iter().next()?;
        if due > now {
            return None;
        }
        let task = self.pending.remove(&(due, id))?;
        self.deadlines.remove(&id);
        Some((due, task))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now_ms())
            .field("pending", &self.pending)
            .finish()
    }
}

/// Cumulative active typing time.
///
/// A burst opens on the first activity after a pause and closes once no
/// activity arrives for `idle_threshold_ms`. A burst spans from its first to
/// its latest activity, whether open or closed, so active time never runs
/// backwards and the wait before expiry is never counted.
#[derive(Debug)]
pub struct ActiveClock {
    idle_threshold_ms: Millis,
    accumulated_ms: Millis,
    burst_start: Option<Millis>,
    last_activity: Option<Millis>,
    idle_timer: Option<TimerId>,
}

impl ActiveClock {
    pub fn new(idle_threshold_ms: Millis) -> Self {
        Self {
            idle_threshold_ms,
            accumulated_ms: 0,
            burst_start: None,
            last_activity: None,
            idle_timer: None,
        }
    }

    pub fn record_activity(&mut self, scheduler: &mut Scheduler) {
        let now = scheduler.now_ms();
        if self.burst_start.is_none() {
            self.burst_start = Some(now);
        }
        self.last_activity = Some(now);

        if let Some(id) = self.idle_timer.take() {
            scheduler.cancel(id);
        }
        self.idle_timer = Some(scheduler.schedule(self.idle_threshold_ms, Task::IdleExpiry));
    }

    /// Span of the open burst as of `now`, capped at its latest activity
    fn open_span(&self, now: Millis) -> Millis {
        match (self.burst_start, self.last_activity) {
            (Some(start), Some(last)) => last.min(now).saturating_sub(start),
            _ => 0,
        }
    }

    pub fn expire_idle(&mut self) {
        self.idle_timer = None;
        let span = self.open_span(Millis::MAX);
        self.accumulated_ms += span;
        self.burst_start = None;
    }

    pub fn elapsed_active_ms(&self, now: Millis) -> Millis {
        self.accumulated_ms + self.open_span(now)
    }

    /// Closes any open burst right away instead of waiting for the idle timer.
    pub fn finalize(&mut self, scheduler: &mut Scheduler) {
        if let Some(id) = self.idle_timer.take() {
            scheduler.cancel(id);
        }
        self.accumulated_ms += self.open_span(scheduler.now_ms());
        self.burst_start = None;
    }

    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        if let Some(id) = self.idle_timer.take() {
            scheduler.cancel(id);
        }
        self.accumulated_ms = 0;
        self.burst_start = None;
        self.last_activity = None;
    }

    pub fn is_bursting(&self) -> bool {
        self.burst_start.is_some()
    }

    pub fn idle_threshold_ms(&self) -> Millis {
        self.idle_threshold_ms
    }
}

impl Default for ActiveClock {
    fn default() -> Self {
        Self::new(IDLE_THRESHOLD_MS)
    }
}
