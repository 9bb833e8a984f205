//! Batch aggregator
//!
//! Tracks a batch of already-started promises and republishes their
//! settlement as events:
//!
//! | event      | payload                          | when                                |
//! |------------|----------------------------------|-------------------------------------|
//! | `progress` | settled count                    | every settlement                    |
//! | `resolve`  | [`ResolveDetail`]                | a task fulfilled                    |
//! | `reject`   | [`RejectDetail`]                 | a task rejected                     |
//! | `finish`   | [`FinishDetail`]                 | once, when every task has settled   |
//!
//! Each settlement is recorded in a microtask queued from the promise
//! reaction, so publish order follows settlement order. For one settlement,
//! `progress` always precedes `resolve`/`reject`, which precedes `finish`.
//! A rejected task never aborts the batch.
//!
//! After `finish` the settlement registrations are dropped, so handlers that
//! captured the aggregator no longer keep it alive. Handlers on other names
//! stay until removed; capture a [`WeakBatchAggregator`] there instead.

use crate::channel::{event_names, Event, EventChannel, ListenerId, WeakEventChannel};
use crate::error::{Result, ValidationError};
use crate::event_loop::EventLoop;
use crate::promise::Promise;
use crate::validation::validation;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Per-index outcome of a batch
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    /// Not settled yet
    #[default]
    Pending,
    /// Fulfilled with a value
    Value(Value),
    /// Rejected; the reason is in the errors container
    Failed,
}

impl Slot {
    /// Check if the task has not settled yet
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }

    /// The fulfillment value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Dynamic view: pending is `undefined`, failed is `null`
    pub fn to_value(&self) -> Value {
        match self {
            Slot::Pending => Value::Undefined,
            Slot::Value(v) => v.clone(),
            Slot::Failed => Value::Null,
        }
    }
}

/// Payload of a `resolve` event
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveDetail {
    pub index: usize,
    pub result: Value,
}

/// Payload of a `reject` event
#[derive(Debug, Clone, PartialEq)]
pub struct RejectDetail {
    pub index: usize,
    pub error: Value,
}

/// Payload of the `finish` event: the final results and errors
#[derive(Debug, Clone, PartialEq)]
pub struct FinishDetail {
    pub results: Vec<Slot>,
    pub errors: Vec<Option<Value>>,
}

impl FinishDetail {
    /// Whether at least one task rejected
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }

    /// `(index, reason)` for every rejected task, in index order
    pub fn error_entries(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// Results as dynamic values (`null` for rejected tasks)
    pub fn result_values(&self) -> Vec<Value> {
        self.results.iter().map(Slot::to_value).collect()
    }
}

/// Payload carried on an aggregator's channel
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Progress(usize),
    Resolve(ResolveDetail),
    Reject(RejectDetail),
    Finish(FinishDetail),
    /// Caller-dispatched event
    Custom(Value),
}

impl BatchEvent {
    pub fn as_progress(&self) -> Option<usize> {
        match self {
            BatchEvent::Progress(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_resolve(&self) -> Option<&ResolveDetail> {
        match self {
            BatchEvent::Resolve(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_reject(&self) -> Option<&RejectDetail> {
        match self {
            BatchEvent::Reject(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_finish(&self) -> Option<&FinishDetail> {
        match self {
            BatchEvent::Finish(d) => Some(d),
            _ => None,
        }
    }
}

struct BatchState {
    total: usize,
    progress: usize,
    results: Vec<Slot>,
    errors: Vec<Option<Value>>,
}

impl BatchState {
    fn finish_detail(&self) -> FinishDetail {
        FinishDetail {
            results: self.results.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Names that only settlement ever publishes
const SETTLEMENT_EVENTS: [&str; 4] = [
    event_names::PROGRESS,
    event_names::RESOLVE,
    event_names::REJECT,
    event_names::FINISH,
];

/// Records settlements into the shared state and publishes the events
#[derive(Clone)]
struct Collector {
    state: Rc<RefCell<BatchState>>,
    channel: EventChannel<BatchEvent>,
}

impl Collector {
    fn record(&self, index: usize, outcome: std::result::Result<Value, Value>) {
        let (progress, total) = {
            let mut state = self.state.borrow_mut();
            if !state.results[index].is_pending() {
                warn!(index, "ignoring second settlement for batch index");
                return;
            }
            match &outcome {
                Ok(value) => state.results[index] = Slot::Value(value.clone()),
                Err(error) => {
                    state.results[index] = Slot::Failed;
                    state.errors[index] = Some(error.clone());
                }
            }
            state.progress += 1;
            (state.progress, state.total)
        };
        trace!(index, progress, total, fulfilled = outcome.is_ok(), "batch task settled");

        self.channel
            .publish(event_names::PROGRESS, BatchEvent::Progress(progress));
        match outcome {
            Ok(result) => {
                self.channel.publish(
                    event_names::RESOLVE,
                    BatchEvent::Resolve(ResolveDetail { index, result }),
                );
            }
            Err(error) => {
                self.channel.publish(
                    event_names::REJECT,
                    BatchEvent::Reject(RejectDetail { index, error }),
                );
            }
        }

        if progress == total {
            let detail = self.state.borrow().finish_detail();
            debug!(
                total,
                failed = detail.error_entries().count(),
                "batch finished"
            );
            self.channel
                .publish(event_names::FINISH, BatchEvent::Finish(detail));

            let dropped: usize = SETTLEMENT_EVENTS
                .iter()
                .map(|name| self.channel.clear(name))
                .sum();
            trace!(dropped, "released settlement handlers");
        }
    }
}

/// Handle to a batch of tasks being observed
#[derive(Clone)]
pub struct BatchAggregator {
    state: Rc<RefCell<BatchState>>,
    channel: EventChannel<BatchEvent>,
}

impl BatchAggregator {
    /// Validate a dynamic task list and start observing it.
    ///
    /// Fails with code 20 for `undefined`, 21 for a non-array, 22 for an
    /// empty array and 23 when an item is not a promise.
    pub fn new(event_loop: &EventLoop, tasks: impl Into<Value>) -> Result<Self> {
        let input = tasks.into();
        let promises = validation(&input).all()?;
        Ok(Self::start(event_loop, promises))
    }

    /// Start observing typed promise handles
    pub fn from_promises(event_loop: &EventLoop, promises: Vec<Promise>) -> Result<Self> {
        if promises.is_empty() {
            return Err(ValidationError::EmptyArray.into());
        }
        Ok(Self::start(event_loop, promises))
    }

    fn start(event_loop: &EventLoop, promises: Vec<Promise>) -> Self {
        let total = promises.len();
        let state = Rc::new(RefCell::new(BatchState {
            total,
            progress: 0,
            results: vec![Slot::Pending; total],
            errors: vec![None; total],
        }));
        let channel = EventChannel::new();
        let collector = Collector {
            state: state.clone(),
            channel: channel.clone(),
        };
        debug!(total, "batch started");

        for (index, promise) in promises.iter().enumerate() {
            let on_ok = collector.clone();
            let on_err = collector.clone();
            let el_ok = event_loop.clone();
            let el_err = event_loop.clone();
            promise
                .then(move |value| el_ok.queue_microtask(move || on_ok.record(index, Ok(value))))
                .catch(move |error| el_err.queue_microtask(move || on_err.record(index, Err(error))));
        }

        Self { state, channel }
    }

    /// Non-owning handle, for handlers that need to reach the batch
    pub fn downgrade(&self) -> WeakBatchAggregator {
        WeakBatchAggregator {
            state: Rc::downgrade(&self.state),
            channel: self.channel.downgrade(),
        }
    }

    /// Number of tasks in the batch
    pub fn total(&self) -> usize {
        self.state.borrow().total
    }

    /// Number of tasks settled so far
    pub fn progress(&self) -> usize {
        self.state.borrow().progress
    }

    /// Whether every task has settled
    pub fn is_finished(&self) -> bool {
        let state = self.state.borrow();
        state.progress == state.total
    }

    /// Snapshot of per-index outcomes
    pub fn results(&self) -> Vec<Slot> {
        self.state.borrow().results.clone()
    }

    /// Snapshot of per-index rejection reasons
    pub fn errors(&self) -> Vec<Option<Value>> {
        self.state.borrow().errors.clone()
    }

    /// Register a persistent handler
    pub fn add_event_listener<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BatchEvent) + 'static,
    {
        self.channel.add_event_listener(name, handler)
    }

    /// Remove a handler
    pub fn remove_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.channel.remove_event_listener(name, id)
    }

    /// Publish an event on this batch's channel
    pub fn dispatch_event(&self, event: Event<BatchEvent>) -> usize {
        self.channel.dispatch_event(event)
    }

    /// Register a one-shot handler
    pub fn on<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BatchEvent) + 'static,
    {
        self.channel.once(name, handler)
    }

    /// Persistent `progress` handler
    pub fn on_progress<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(usize) + 'static,
    {
        self.channel.add_event_listener(event_names::PROGRESS, move |event| {
            if let Some(n) = event.as_progress() {
                handler(n);
            }
        })
    }

    /// Persistent `resolve` handler
    pub fn on_resolve<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ResolveDetail) + 'static,
    {
        self.channel.add_event_listener(event_names::RESOLVE, move |event| {
            if let Some(detail) = event.as_resolve() {
                handler(detail);
            }
        })
    }

    /// Persistent `reject` handler
    pub fn on_reject<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&RejectDetail) + 'static,
    {
        self.channel.add_event_listener(event_names::REJECT, move |event| {
            if let Some(detail) = event.as_reject() {
                handler(detail);
            }
        })
    }

    /// One-shot `finish` handler
    pub fn on_finish<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&FinishDetail) + 'static,
    {
        self.channel.once(event_names::FINISH, move |event| {
            if let Some(detail) = event.as_finish() {
                handler(detail);
            }
        })
    }
}

impl std::fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BatchAggregator")
            .field("total", &state.total)
            .field("progress", &state.progress)
            .field("results", &state.results)
            .field("errors", &state.errors)
            .finish()
    }
}

/// Weak counterpart of [`BatchAggregator`]
#[derive(Clone)]
pub struct WeakBatchAggregator {
    state: Weak<RefCell<BatchState>>,
    channel: WeakEventChannel<BatchEvent>,
}

impl WeakBatchAggregator {
    /// The aggregator, unless it has already been freed
    pub fn upgrade(&self) -> Option<BatchAggregator> {
        Some(BatchAggregator {
            state: self.state.upgrade()?,
            channel: self.channel.upgrade()?,
        })
    }
}

/// Observe a batch of tasks: see [`BatchAggregator::new`]
pub fn all(event_loop: &EventLoop, tasks: impl Into<Value>) -> Result<BatchAggregator> {
    BatchAggregator::new(event_loop, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::{Rejector, Resolver};
    use std::cell::Cell;

    fn pending(el: &EventLoop, n: usize) -> (Vec<Promise>, Vec<Resolver>, Vec<Rejector>) {
        let mut promises = Vec::new();
        let mut resolvers = Vec::new();
        let mut rejectors = Vec::new();
        for _ in 0..n {
            let (p, res, rej) = Promise::with_resolvers(el);
            promises.push(p);
            resolvers.push(res);
            rejectors.push(rej);
        }
        (promises, resolvers, rejectors)
    }

    #[test]
    fn test_initial_state() {
        let el = EventLoop::new();
        let (promises, _, _) = pending(&el, 3);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();

        assert_eq!(batch.total(), 3);
        assert_eq!(batch.progress(), 0);
        assert!(!batch.is_finished());
        assert_eq!(batch.results(), vec![Slot::Pending; 3]);
        assert_eq!(batch.errors(), vec![None, None, None]);
    }

    #[test]
    fn test_settlement_is_deferred() {
        let el = EventLoop::new();
        let (promises, resolvers, _) = pending(&el, 1);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();

        resolvers[0].resolve(5);
        assert_eq!(batch.progress(), 0);
        el.run_until_idle();
        assert_eq!(batch.progress(), 1);
        assert_eq!(batch.results(), vec![Slot::Value(Value::from(5))]);
    }

    #[test]
    fn test_failed_slot_is_distinct_from_pending() {
        let el = EventLoop::new();
        let (promises, _, rejectors) = pending(&el, 2);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();

        rejectors[1].reject("bad");
        el.run_until_idle();

        assert_eq!(batch.results(), vec![Slot::Pending, Slot::Failed]);
        assert_eq!(batch.errors(), vec![None, Some(Value::from("bad"))]);
        assert_eq!(Slot::Failed.to_value(), Value::Null);
        assert_eq!(Slot::Pending.to_value(), Value::Undefined);
    }

    #[test]
    fn test_duplicate_record_is_ignored() {
        let el = EventLoop::new();
        let (promises, resolvers, _) = pending(&el, 2);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();
        let collector = Collector {
            state: batch.state.clone(),
            channel: batch.channel.clone(),
        };

        resolvers[0].resolve(1);
        el.run_until_idle();
        collector.record(0, Err(Value::from("late")));

        assert_eq!(batch.progress(), 1);
        assert_eq!(batch.results()[0], Slot::Value(Value::from(1)));
        assert_eq!(batch.errors()[0], None);
    }

    #[test]
    fn test_finish_fires_once() {
        let el = EventLoop::new();
        let (promises, resolvers, _) = pending(&el, 2);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();
        let finishes = Rc::new(Cell::new(0));
        let counter = finishes.clone();
        batch.add_event_listener(event_names::FINISH, move |_| counter.set(counter.get() + 1));

        resolvers[0].resolve(1);
        el.run_until_idle();
        assert_eq!(finishes.get(), 0);

        resolvers[1].resolve(2);
        el.run_until_idle();
        assert_eq!(finishes.get(), 1);
        assert!(batch.is_finished());
    }

    #[test]
    fn test_settlement_handlers_released_after_finish() {
        let el = EventLoop::new();
        let (promises, resolvers, _) = pending(&el, 1);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();
        let custom = batch.add_event_listener("custom", |_| {});
        batch.on_progress(|_| {});
        batch.on_reject(|_| {});
        batch.on_finish(|_| {});

        resolvers[0].resolve(1);
        el.run_until_idle();

        for name in SETTLEMENT_EVENTS {
            assert_eq!(batch.channel.listener_count(name), 0);
        }
        assert!(batch.remove_event_listener("custom", custom));
    }

    #[test]
    fn test_weak_handle_follows_batch_lifetime() {
        let el = EventLoop::new();
        let (promises, resolvers, _) = pending(&el, 1);
        let batch = BatchAggregator::from_promises(&el, promises).unwrap();
        let weak = batch.downgrade();

        drop(batch);
        let batch = weak.upgrade().expect("pending tasks keep the batch alive");
        assert_eq!(batch.total(), 1);
        drop(batch);

        drop(resolvers);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_from_promises_rejects_empty() {
        let el = EventLoop::new();
        let err = BatchAggregator::from_promises(&el, vec![]).unwrap_err();
        assert_eq!(err.code(), Some(22));
    }

    #[test]
    fn test_finish_detail_helpers() {
        let detail = FinishDetail {
            results: vec![Slot::Value(Value::from(1)), Slot::Failed],
            errors: vec![None, Some(Value::from("e"))],
        };
        assert!(detail.has_errors());
        let entries: Vec<(usize, &Value)> = detail.error_entries().collect();
        assert_eq!(entries, vec![(1, &Value::from("e"))]);
        assert_eq!(detail.result_values(), vec![Value::from(1), Value::Null]);
    }
}
