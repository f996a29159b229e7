//! Cooperative timer queue.
//!
//! Drivers schedule periodic polls and one-shot timeouts here; the event loop
//! sleeps until [`TimerQueue::next_deadline`] and then calls
//! [`TimerQueue::run_due`]. Callbacks run synchronously on the loop's thread and
//! receive a mutable context, so they can publish through the driver without
//! locking. A callback is never re-entered: a periodic timer is rescheduled only
//! after its callback returns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;

/// Handle returned by [`TimerQueue::add_timer`] and [`TimerQueue::add_periodic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

type Callback<C> = Box<dyn FnMut(&mut C) + Send>;

struct Timer<C> {
    period: Option<Duration>,
    callback: Callback<C>,
}

/// Ordered set of pending timers over a context type `C`.
pub struct TimerQueue<C> {
    next_id: u64,
    pending: BTreeMap<(Instant, TimerId), Timer<C>>,
    deadlines: HashMap<TimerId, Instant>,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TimerQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.pending.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

impl<C> TimerQueue<C> {
    /// Smallest accepted period; shorter periods are raised to this.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// An empty queue.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    fn insert(&mut self, at: Instant, timer: Timer<C>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert((at, id), timer);
        self.deadlines.insert(id, at);
        id
    }

    /// Run `callback` once, `delay` from now.
    pub fn add_timer(&mut self, delay: Duration, callback: impl FnMut(&mut C) + Send + 'static) -> TimerId {
        let id = self.insert(
            Instant::now() + delay,
            Timer {
                period: None,
                callback: Box::new(callback),
            },
        );
        trace!(?id, ?delay, "timer added");
        id
    }

    /// Run `callback` every `period`, starting one period from now.
    pub fn add_periodic(&mut self, period: Duration, callback: impl FnMut(&mut C) + Send + 'static) -> TimerId {
        let period = period.max(Self::MIN_PERIOD);
        let id = self.insert(
            Instant::now() + period,
            Timer {
                period: Some(period),
                callback: Box::new(callback),
            },
        );
        trace!(?id, ?period, "periodic timer added");
        id
    }

    /// Cancel a timer. Returns `false` if it already fired or never existed.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(at) => self.pending.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    /// When the earliest timer is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// Number of scheduled timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no timers are scheduled.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fire every timer due at `now`, in deadline order. Returns how many ran.
    ///
    /// A periodic timer fires at most once per call even if several periods
    /// elapsed; its next deadline is one period after the missed one, or after
    /// `now` if that is already past.
    pub fn run_due(&mut self, now: Instant, ctx: &mut C) -> usize {
        let mut fired = 0;
        loop {
            let key = match self.pending.keys().next() {
                Some(&(at, id)) if at <= now => (at, id),
                _ => break,
            };
            let Some(mut timer) = self.pending.remove(&key) else {
                break;
            };
            let (at, id) = key;
            self.deadlines.remove(&id);

            (timer.callback)(ctx);
            fired += 1;

            if let Some(period) = timer.period {
                let mut next = at + period;
                if next <= now {
                    next = now + period;
                }
                self.pending.insert((next, id), timer);
                self.deadlines.insert(id, next);
            }
        }
        fired
    }
}
