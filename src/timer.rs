//! Cancellable delayed callbacks.
//!
//! [`Timer`] is the delay primitive consumed by
//! [`Promise::timeout`](crate::Promise::timeout). [`TimerQueue`] is the bundled
//! implementation: a cooperative, single-threaded queue driven by a virtual
//! clock. Nothing fires until the owner advances it, so every callback runs
//! on a later turn than the one that scheduled it.
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    fmt,
    rc::Rc,
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Schedules one-shot callbacks and cancels them before they fire.
///
/// [`TimerQueue`] only advances when its owner drives it. Hosts that need
/// timeouts measured in wall-clock time supply their own implementation
/// backed by their event loop.
pub trait Timer {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId;

    /// Returns `false` if the timer already fired or was already cancelled.
    fn cancel(&self, id: TimerId) -> bool;

    /// Returns a callback that cancels `id` when invoked. Promises hold on
    /// to it while a timeout is outstanding.
    fn canceller(&self, id: TimerId) -> Box<dyn FnOnce()>
    where
        Self: Clone + 'static,
    {
        let timer = self.clone();
        Box::new(move || {
            timer.cancel(id);
        })
    }
}

/// A scheduled wake-up, ordered so that `BinaryHeap` pops the earliest
/// deadline first and breaks ties by scheduling order.
#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Duration,
    id: TimerId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    now: Duration,
    next_id: u64,
    heap: BinaryHeap<TimerEntry>,
    // Cancelled ids are removed here and skipped lazily when their heap entry
    // surfaces.
    tasks: HashMap<TimerId, Box<dyn FnOnce()>>,
}

impl QueueState {
    fn pop_due(&mut self, limit: Option<Duration>) -> Option<(TimerId, Box<dyn FnOnce()>)> {
        while let Some(entry) = self.heap.peek() {
            if limit.is_some_and(|limit| entry.deadline > limit) {
                return None;
            }
            let TimerEntry { deadline, id } = self.heap.pop()?;
            if let Some(task) = self.tasks.remove(&id) {
                self.now = self.now.max(deadline);
                return Some((id, task));
            }
        }
        None
    }

    // Drops heap entries whose task was cancelled, once they outnumber the
    // live ones.
    fn compact(&mut self) {
        if self.heap.len() > 2 * self.tasks.len() {
            let tasks = &self.tasks;
            self.heap.retain(|entry| tasks.contains_key(&entry.id));
        }
    }
}

/// A virtual-clock timer queue.
///
/// Clones share the same queue. Callbacks run with no internal borrow held,
/// so they may schedule or cancel other timers. Deadlines and the clock
/// saturate at `Duration::MAX` rather than overflowing.
///
/// Dropping the last handle drops every unfired task with it.
///
/// # Examples
///
/// ```
/// use settle::{Timer, TimerQueue};
/// use std::{cell::Cell, rc::Rc, time::Duration};
///
/// let queue = TimerQueue::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// queue.schedule(Duration::from_millis(20), Box::new(move || flag.set(true)));
///
/// queue.advance(Duration::from_millis(10));
/// assert!(!fired.get());
/// queue.advance(Duration::from_millis(10));
/// assert!(fired.get());
/// ```
#[derive(Clone, Default)]
pub struct TimerQueue {
    state: Rc<RefCell<QueueState>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue whose clock starts at `origin` instead of zero.
    pub fn starting_at(origin: Duration) -> Self {
        let queue = Self::new();
        queue.state.borrow_mut().now = origin;
        queue
    }

    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of timers still waiting to fire.
    pub fn len(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves the clock forward by `by`, firing every timer that falls due, in
    /// deadline order. Returns how many fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut fired = 0;
        loop {
            let due = self.state.borrow_mut().pop_due(Some(target));
            let Some((id, task)) = due else { break };
            tracing::trace!(timer = %id, "firing timer");
            task();
            fired += 1;
        }
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(target);
        fired
    }

    /// Jumps the clock to the next deadline and fires that one timer.
    /// Returns `false` if nothing was scheduled.
    pub fn turn(&self) -> bool {
        let due = self.state.borrow_mut().pop_due(None);
        match due {
            Some((id, task)) => {
                tracing::trace!(timer = %id, "firing timer");
                task();
                true
            }
            None => false,
        }
    }

    /// Fires timers until none remain, including ones scheduled by the
    /// callbacks themselves.
    pub fn run(&self) -> usize {
        let mut fired = 0;
        while self.turn() {
            fired += 1;
        }
        fired
    }
}

impl Timer for TimerQueue {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        let deadline = state.now.saturating_add(delay);
        state.heap.push(TimerEntry { deadline, id });
        state.tasks.insert(id, task);
        tracing::debug!(timer = %id, ?delay, "scheduled timer");
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let task = {
            let mut state = self.state.borrow_mut();
            let task = state.tasks.remove(&id);
            state.compact();
            task
        };
        // The task may own promise handles; drop it after the borrow ends.
        let cancelled = task.is_some();
        drop(task);
        if cancelled {
            tracing::debug!(timer = %id, "cancelled timer");
        }
        cancelled
    }

    // Holds the queue weakly, so a pending timeout does not keep the queue
    // and its tasks alive through the promise it targets.
    fn canceller(&self, id: TimerId) -> Box<dyn FnOnce()> {
        let state = Rc::downgrade(&self.state);
        Box::new(move || {
            if let Some(state) = state.upgrade() {
                TimerQueue { state }.cancel(id);
            }
        })
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TimerQueue")
            .field("now", &state.now)
            .field("pending", &state.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Timer, TimerQueue};
    use std::{cell::RefCell, rc::Rc, time::Duration};

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Box<dyn FnOnce()> {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let queue = TimerQueue::new();
        let (log, task) = recorder();
        queue.schedule(Duration::from_millis(30), task("c"));
        queue.schedule(Duration::from_millis(10), task("a"));
        queue.schedule(Duration::from_millis(20), task("b"));

        assert_eq!(queue.advance(Duration::from_millis(25)), 2);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(queue.now(), Duration::from_millis(25));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_fire_in_schedule_order() {
        let queue = TimerQueue::new();
        let (log, task) = recorder();
        queue.schedule(Duration::from_millis(5), task("first"));
        queue.schedule(Duration::from_millis(5), task("second"));
        queue.run();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let queue = TimerQueue::new();
        let (log, task) = recorder();
        let id = queue.schedule(Duration::from_millis(5), task("cancelled"));
        queue.schedule(Duration::from_millis(6), task("kept"));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.run(), 1);
        assert_eq!(*log.borrow(), vec!["kept"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancelled_entries_are_compacted() {
        let queue = TimerQueue::new();
        let (_log, task) = recorder();
        queue.schedule(Duration::from_secs(60), task("kept"));
        for _ in 0..100 {
            let id = queue.schedule(Duration::from_secs(60), task("dropped"));
            queue.cancel(id);
        }
        assert_eq!(queue.len(), 1);
        assert!(queue.state.borrow().heap.len() <= 2);
    }

    #[test]
    fn test_overflowing_deadline_saturates() {
        let queue = TimerQueue::starting_at(Duration::from_secs(1));
        let (log, task) = recorder();
        queue.schedule(Duration::MAX, task("never"));
        queue.advance(Duration::MAX);
        assert_eq!(queue.now(), Duration::MAX);
        assert_eq!(*log.borrow(), vec!["never"]);
    }

    #[test]
    fn test_canceller_outliving_queue_is_noop() {
        let queue = TimerQueue::new();
        let (_log, task) = recorder();
        let id = queue.schedule(Duration::from_millis(1), task("x"));
        let cancel = queue.canceller(id);
        drop(queue);
        cancel();
    }

    #[test]
    fn test_turn_jumps_clock_to_deadline() {
        let queue = TimerQueue::starting_at(Duration::from_secs(1));
        let (_log, task) = recorder();
        queue.schedule(Duration::from_millis(40), task("x"));

        assert!(queue.turn());
        assert_eq!(queue.now(), Duration::from_millis(1040));
        assert!(!queue.turn());
    }

    #[test]
    fn test_callbacks_may_schedule_reentrantly() {
        let queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_queue = queue.clone();
        let inner_log = log.clone();
        queue.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                inner_log.borrow_mut().push("outer");
                let nested_log = inner_log.clone();
                inner_queue.schedule(
                    Duration::from_millis(10),
                    Box::new(move || nested_log.borrow_mut().push("nested")),
                );
            }),
        );

        assert_eq!(queue.advance(Duration::from_millis(15)), 1);
        assert_eq!(queue.advance(Duration::from_millis(5)), 1);
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
    }
}
