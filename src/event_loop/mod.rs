//! Cooperative event loop
//!
//! A single-threaded cooperative scheduler with the two queues a promise
//! runtime needs: a FIFO microtask queue for deferred continuations, and a
//! macrotask queue of timers running on virtual time.
//!
//! [`EventLoop`] is a cheap, clonable handle. Callbacks receive no borrow of
//! the loop while they run, so they are free to queue more work.

use crate::config::EventLoopConfig;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;
use tracing::{trace, warn};

/// A deferred continuation (promise reaction, `queue_microtask`, ...)
pub type Microtask = Box<dyn FnOnce()>;

/// Timer identifier returned by [`EventLoop::set_timeout`]
pub type TimerId = u64;

/// A timer callback waiting for its virtual fire time
struct Macrotask {
    /// Unique timer ID
    id: TimerId,
    /// The callback to execute
    callback: Microtask,
    /// When the task should fire (virtual time in ms)
    fire_at: u64,
    /// Is this task cancelled?
    cancelled: bool,
}

/// Result of running the event loop to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of full event loop iterations (each iteration = drain microtasks + one macrotask)
    pub iterations: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    /// Microtasks run since creation or the last reset
    pub total_microtasks: u64,
    /// Timers fired since creation or the last reset
    pub total_macrotasks: u64,
    /// Total number of microtask ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Longest tick duration in milliseconds (wall-clock)
    pub longest_tick_ms: u64,
    /// Promises constructed on this loop
    pub total_promises_created: u64,
    /// Promises that reached a final state
    pub total_promises_settled: u64,
}

struct EventLoopInner {
    /// Deferred continuations, FIFO
    microtask_queue: VecDeque<Microtask>,
    /// Macrotask queue (timers), kept in scheduling order
    macrotask_queue: Vec<Macrotask>,
    /// Current virtual time in milliseconds
    virtual_time: u64,
    /// Next timer ID
    next_timer_id: TimerId,
    /// Per-tick microtask budget
    max_microtasks_per_tick: usize,
    /// Runtime statistics
    stats: EventLoopStats,
}

/// Handle to a cooperative event loop
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<EventLoopInner>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventLoop")
            .field("virtual_time", &inner.virtual_time)
            .field("pending_microtasks", &inner.microtask_queue.len())
            .field("pending_macrotasks", &inner.macrotask_queue.len())
            .finish()
    }
}

impl EventLoop {
    /// Create a new event loop with the default configuration
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    /// Create a new event loop from a configuration
    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EventLoopInner {
                microtask_queue: VecDeque::new(),
                macrotask_queue: Vec::new(),
                virtual_time: 0,
                next_timer_id: 1,
                max_microtasks_per_tick: config.max_microtasks_per_tick.max(1),
                stats: EventLoopStats::default(),
            })),
        }
    }

    /// Virtual time in milliseconds
    pub fn current_time(&self) -> u64 {
        self.inner.borrow().virtual_time
    }

    /// Enqueue a microtask at the back of the queue
    pub fn queue_microtask<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner
            .borrow_mut()
            .microtask_queue
            .push_back(Box::new(callback));
    }

    /// Schedule a one-shot timer `delay` virtual milliseconds from now
    pub fn set_timeout<F>(&self, delay: u64, callback: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;

        let fire_at = inner.virtual_time + delay;
        inner.macrotask_queue.push(Macrotask {
            id,
            callback: Box::new(callback),
            fire_at,
            cancelled: false,
        });

        id
    }

    /// Schedule a macrotask with 0ms delay (equivalent to `setImmediate`).
    pub fn set_immediate<F>(&self, callback: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        self.set_timeout(0, callback)
    }

    /// Cancel a timer by ID
    pub fn clear_timeout(&self, id: TimerId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(task) = inner.macrotask_queue.iter_mut().find(|t| t.id == id) {
            task.cancelled = true;
        }
    }

    /// Whether any microtask is queued
    pub fn has_pending_microtasks(&self) -> bool {
        !self.inner.borrow().microtask_queue.is_empty()
    }

    /// Number of queued microtasks
    pub fn pending_microtask_count(&self) -> usize {
        self.inner.borrow().microtask_queue.len()
    }

    /// Whether any live timer is scheduled
    pub fn has_pending_macrotasks(&self) -> bool {
        self.inner.borrow().macrotask_queue.iter().any(|t| !t.cancelled)
    }

    /// Whether either queue has work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    /// Run one tick of microtasks, up to the budget.
    ///
    /// Microtasks queued while the tick is running join the same tick.
    /// Returns the number of microtasks executed.
    pub fn run_microtasks(&self) -> usize {
        let tick_start = Instant::now();
        let budget = self.microtask_budget();
        let mut count: usize = 0;

        while count < budget {
            // The borrow must end before the callback runs.
            let next = self.inner.borrow_mut().microtask_queue.pop_front();
            let Some(task) = next else { break };
            task();
            count += 1;
        }

        let mut inner = self.inner.borrow_mut();
        let stats = &mut inner.stats;
        stats.total_ticks += 1;
        stats.total_microtasks += count as u64;
        if (count as u64) > stats.max_microtasks_per_tick {
            stats.max_microtasks_per_tick = count as u64;
        }
        let tick_elapsed = tick_start.elapsed().as_millis() as u64;
        if tick_elapsed > stats.longest_tick_ms {
            stats.longest_tick_ms = tick_elapsed;
        }

        let remaining = inner.microtask_queue.len();
        if remaining > 0 {
            warn!(budget, remaining, "microtask budget exhausted, deferring to next tick");
        } else if count > 0 {
            trace!(count, "drained microtasks");
        }
        count
    }

    /// Drain microtasks until the queue is empty, across as many ticks as needed.
    /// Timers are not fired.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        while self.has_pending_microtasks() {
            total += self.run_microtasks();
        }
        total
    }

    /// Run the event loop to completion following the standard algorithm:
    ///   1. Drain microtasks (one budget-limited tick)
    ///   2. If a macrotask is ready, execute it (advance time if needed)
    ///   3. Repeat from step 1
    ///   4. Stop when no microtasks and no macrotasks remain
    ///
    /// Returns a `RunResult` with statistics about what was processed.
    pub fn run_to_completion(&self) -> RunResult {
        let mut result = RunResult::default();

        loop {
            result.microtasks_processed += self.run_microtasks();

            if let Some(task) = self.next_macrotask() {
                trace!(timer = task.id, at = task.fire_at, "firing macrotask");
                (task.callback)();
                result.macrotasks_processed += 1;
                result.iterations += 1;
                self.inner.borrow_mut().stats.total_macrotasks += 1;
                continue;
            }

            if !self.has_pending_microtasks() {
                break;
            }

            result.iterations += 1;
        }

        result.final_time = self.current_time();
        result
    }

    /// Remove the next macrotask to run, advancing virtual time to its fire
    /// time if nothing is ready yet. Ties fire in scheduling order.
    fn next_macrotask(&self) -> Option<Macrotask> {
        let mut inner = self.inner.borrow_mut();
        inner.macrotask_queue.retain(|t| !t.cancelled);

        let idx = inner
            .macrotask_queue
            .iter()
            .enumerate()
            .min_by_key(|(i, t)| (t.fire_at, *i))
            .map(|(i, _)| i)?;

        let task = inner.macrotask_queue.remove(idx);
        if task.fire_at > inner.virtual_time {
            inner.virtual_time = task.fire_at;
        }
        Some(task)
    }

    /// Set the maximum number of microtasks to drain per tick (starvation protection).
    pub fn set_microtask_budget(&self, limit: usize) {
        self.inner.borrow_mut().max_microtasks_per_tick = limit.max(1);
    }

    /// Get the current microtask budget limit.
    pub fn microtask_budget(&self) -> usize {
        self.inner.borrow().max_microtasks_per_tick
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> EventLoopStats {
        self.inner.borrow().stats.clone()
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.inner.borrow_mut().stats = EventLoopStats::default();
    }

    /// Clear all pending work
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.microtask_queue.clear();
        inner.macrotask_queue.clear();
    }

    pub(crate) fn record_promise_created(&self) {
        self.inner.borrow_mut().stats.total_promises_created += 1;
    }

    pub(crate) fn record_promise_settled(&self) {
        self.inner.borrow_mut().stats.total_promises_settled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let push = move |label: &'static str| {
            let log = log_clone.clone();
            Box::new(move || log.borrow_mut().push(label)) as Box<dyn FnOnce()>
        };
        (log, push)
    }

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert_eq!(el.current_time(), 0);
        assert!(!el.has_pending_work());
        assert_eq!(el.microtask_budget(), 10_000);
    }

    #[test]
    fn test_microtasks_run_fifo() {
        let el = EventLoop::new();
        let (log, push) = recorder();

        el.queue_microtask(push("a"));
        el.queue_microtask(push("b"));
        el.queue_microtask(push("c"));
        assert_eq!(el.pending_microtask_count(), 3);

        assert_eq!(el.run_microtasks(), 3);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert!(!el.has_pending_microtasks());
    }

    #[test]
    fn test_microtask_queued_during_drain_joins_tick() {
        let el = EventLoop::new();
        let (log, push) = recorder();

        let el_clone = el.clone();
        let later = push("nested");
        el.queue_microtask(move || el_clone.queue_microtask(later));
        el.queue_microtask(push("second"));

        assert_eq!(el.run_microtasks(), 3);
        assert_eq!(*log.borrow(), vec!["second", "nested"]);
    }

    #[test]
    fn test_timer_ordering_by_fire_time_then_schedule_order() {
        let el = EventLoop::new();
        let (log, push) = recorder();

        el.set_timeout(20, push("late"));
        el.set_timeout(10, push("early-1"));
        el.set_timeout(10, push("early-2"));
        el.set_immediate(push("now"));

        let result = el.run_to_completion();
        assert_eq!(*log.borrow(), vec!["now", "early-1", "early-2", "late"]);
        assert_eq!(result.macrotasks_processed, 4);
        assert_eq!(result.final_time, 20);
    }

    #[test]
    fn test_timer_cancellation() {
        let el = EventLoop::new();
        let (log, push) = recorder();

        let id = el.set_timeout(100, push("cancelled"));
        el.clear_timeout(id);
        assert!(!el.has_pending_macrotasks());

        el.run_to_completion();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_microtasks_drain_before_next_macrotask() {
        let el = EventLoop::new();
        let (log, push) = recorder();

        let el_clone = el.clone();
        let micro = push("micro");
        let first = push("timer-1");
        el.set_timeout(5, move || {
            first();
            el_clone.queue_microtask(micro);
        });
        el.set_timeout(5, push("timer-2"));

        el.run_to_completion();
        assert_eq!(*log.borrow(), vec!["timer-1", "micro", "timer-2"]);
    }

    #[test]
    fn test_budget_defers_remaining_microtasks() {
        let el = EventLoop::new();
        el.set_microtask_budget(2);
        let (log, push) = recorder();

        el.queue_microtask(push("1"));
        el.queue_microtask(push("2"));
        el.queue_microtask(push("3"));

        assert_eq!(el.run_microtasks(), 2);
        assert_eq!(el.pending_microtask_count(), 1);
        assert_eq!(el.run_microtasks(), 1);
        assert_eq!(*log.borrow(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_run_until_idle_crosses_budget() {
        let el = EventLoop::new();
        el.set_microtask_budget(1);
        for _ in 0..5 {
            el.queue_microtask(|| {});
        }
        assert_eq!(el.run_until_idle(), 5);
        let stats = el.stats();
        assert_eq!(stats.total_microtasks, 5);
        assert_eq!(stats.max_microtasks_per_tick, 1);
    }

    #[test]
    fn test_run_until_idle_does_not_fire_timers() {
        let el = EventLoop::new();
        let (log, push) = recorder();
        el.set_immediate(push("timer"));
        el.run_until_idle();
        assert!(log.borrow().is_empty());
        assert!(el.has_pending_macrotasks());
    }

    #[test]
    fn test_with_config_budget() {
        let el = EventLoop::with_config(EventLoopConfig {
            max_microtasks_per_tick: 7,
        });
        assert_eq!(el.microtask_budget(), 7);
    }

    #[test]
    fn test_reset_stats_and_clear() {
        let el = EventLoop::new();
        el.queue_microtask(|| {});
        el.run_microtasks();
        assert_eq!(el.stats().total_ticks, 1);
        el.reset_stats();
        assert_eq!(el.stats(), EventLoopStats::default());

        el.queue_microtask(|| {});
        el.set_timeout(1, || {});
        el.clear();
        assert!(!el.has_pending_work());
    }
}
