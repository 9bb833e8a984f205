//! Promise Implementation
//!
//! The task primitive observed by bridges and aggregators. A [`Promise`]
//! settles exactly once, and every reaction registered through
//! [`Promise::then`] or [`Promise::catch`] runs at most once, as a microtask
//! on the owning [`EventLoop`], never synchronously with settlement.

use crate::error::{Error, Result, ValidationError};
use crate::event_loop::EventLoop;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Promise state enum
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromiseState {
    /// Promise is pending - not yet settled
    Pending,
    /// Promise is fulfilled with a value
    Fulfilled,
    /// Promise is rejected with a reason
    Rejected,
}

/// Type of promise reaction
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PromiseReactionType {
    Fulfill,
    Reject,
}

/// A callback waiting for this promise to settle
struct PromiseReaction {
    handler: Box<dyn FnOnce(Value)>,
    reaction_type: PromiseReactionType,
}

struct PromiseInternal {
    /// Current state of the promise
    state: PromiseInternalState,
    /// Reactions waiting for this promise to settle
    reactions: Vec<PromiseReaction>,
    /// Whether a rejection handler has ever been attached
    handled: bool,
}

enum PromiseInternalState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// Handle to a promise. Clones share the same underlying promise.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<PromiseInternal>>,
    event_loop: EventLoop,
}

/// Fulfills the promise it was created for
#[derive(Clone)]
pub struct Resolver {
    promise: Promise,
}

/// Rejects the promise it was created for
#[derive(Clone)]
pub struct Rejector {
    promise: Promise,
}

impl Resolver {
    /// Fulfill the promise. Has no effect once it has settled.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.promise.fulfill(value.into());
    }
}

impl Rejector {
    /// Reject the promise. Has no effect once it has settled.
    pub fn reject(&self, reason: impl Into<Value>) {
        self.promise.reject(reason.into());
    }
}

impl Promise {
    fn pending(event_loop: &EventLoop) -> Self {
        event_loop.record_promise_created();
        Self {
            inner: Rc::new(RefCell::new(PromiseInternal {
                state: PromiseInternalState::Pending,
                reactions: Vec::new(),
                handled: false,
            })),
            event_loop: event_loop.clone(),
        }
    }

    /// Create a promise from a two-argument executor, which runs immediately.
    pub fn new<F>(event_loop: &EventLoop, executor: F) -> Self
    where
        F: FnOnce(Resolver, Rejector),
    {
        let (promise, resolver, rejector) = Self::with_resolvers(event_loop);
        executor(resolver, rejector);
        promise
    }

    /// Create a promise from a native function value.
    ///
    /// The function is called with `resolve` and `reject` function values.
    /// An executor that returns an error rejects the promise with the error text.
    pub fn from_executor(event_loop: &EventLoop, executor: &Value) -> Result<Self> {
        let func = executor
            .as_function()
            .ok_or(Error::Validation(ValidationError::NotAFunction))?;

        let (promise, resolver, rejector) = Self::with_resolvers(event_loop);
        let resolve_fn = Value::new_function("resolve", 1, move |args| {
            resolver.resolve(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        });
        let reject_clone = rejector.clone();
        let reject_fn = Value::new_function("reject", 1, move |args| {
            reject_clone.reject(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        });

        if let Err(e) = func.call(&[resolve_fn, reject_fn]) {
            debug!(executor = func.name(), error = %e, "executor failed, rejecting");
            rejector.reject(Value::String(e.to_string()));
        }
        Ok(promise)
    }

    /// Create a pending promise along with its resolve/reject handles
    pub fn with_resolvers(event_loop: &EventLoop) -> (Self, Resolver, Rejector) {
        let promise = Self::pending(event_loop);
        let resolver = Resolver {
            promise: promise.clone(),
        };
        let rejector = Rejector {
            promise: promise.clone(),
        };
        (promise, resolver, rejector)
    }

    /// Create an already-fulfilled promise
    pub fn resolved(event_loop: &EventLoop, value: impl Into<Value>) -> Self {
        let promise = Self::pending(event_loop);
        promise.fulfill(value.into());
        promise
    }

    /// Create an already-rejected promise
    pub fn rejected(event_loop: &EventLoop, reason: impl Into<Value>) -> Self {
        let promise = Self::pending(event_loop);
        promise.reject(reason.into());
        promise
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        match self.inner.borrow().state {
            PromiseInternalState::Pending => PromiseState::Pending,
            PromiseInternalState::Fulfilled(_) => PromiseState::Fulfilled,
            PromiseInternalState::Rejected(_) => PromiseState::Rejected,
        }
    }

    /// Check if the promise has not settled yet
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// The settled value or reason, if any
    pub fn result(&self) -> Option<Value> {
        match &self.inner.borrow().state {
            PromiseInternalState::Pending => None,
            PromiseInternalState::Fulfilled(v) | PromiseInternalState::Rejected(v) => Some(v.clone()),
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a fulfillment reaction
    pub fn then<F>(&self, on_fulfilled: F) -> &Self
    where
        F: FnOnce(Value) + 'static,
    {
        self.add_reaction(PromiseReactionType::Fulfill, Box::new(on_fulfilled));
        self
    }

    /// Register a rejection reaction
    pub fn catch<F>(&self, on_rejected: F) -> &Self
    where
        F: FnOnce(Value) + 'static,
    {
        self.add_reaction(PromiseReactionType::Reject, Box::new(on_rejected));
        self
    }

    fn add_reaction(&self, reaction_type: PromiseReactionType, handler: Box<dyn FnOnce(Value)>) {
        let mut p = self.inner.borrow_mut();
        if reaction_type == PromiseReactionType::Reject {
            p.handled = true;
        }

        let settled = match &p.state {
            PromiseInternalState::Pending => None,
            PromiseInternalState::Fulfilled(v) => Some((PromiseReactionType::Fulfill, v.clone())),
            PromiseInternalState::Rejected(v) => Some((PromiseReactionType::Reject, v.clone())),
        };
        let Some((state_type, value)) = settled else {
            p.reactions.push(PromiseReaction {
                handler,
                reaction_type,
            });
            return;
        };
        drop(p);

        // Already settled - queue microtask immediately
        if state_type == reaction_type {
            self.event_loop.queue_microtask(move || handler(value));
        }
    }

    fn fulfill(&self, value: Value) {
        if let Value::Promise(other) = &value {
            if !other.ptr_eq(self) {
                self.adopt(other.clone());
                return;
            }
        }
        self.settle(PromiseInternalState::Fulfilled(value));
    }

    fn reject(&self, reason: Value) {
        self.settle(PromiseInternalState::Rejected(reason));
    }

    /// Follow another promise's eventual outcome
    fn adopt(&self, other: Promise) {
        let on_ok = self.clone();
        let on_err = self.clone();
        other
            .then(move |v| on_ok.fulfill(v))
            .catch(move |e| on_err.reject(e));
    }

    fn settle(&self, outcome: PromiseInternalState) {
        let mut p = self.inner.borrow_mut();
        if !matches!(p.state, PromiseInternalState::Pending) {
            trace!("ignoring settlement of already-settled promise");
            return;
        }

        let (reaction_type, value) = match &outcome {
            PromiseInternalState::Fulfilled(v) => (PromiseReactionType::Fulfill, v.clone()),
            PromiseInternalState::Rejected(v) => (PromiseReactionType::Reject, v.clone()),
            PromiseInternalState::Pending => return,
        };
        p.state = outcome;
        let reactions = std::mem::take(&mut p.reactions);
        let handled = p.handled;
        drop(p);

        self.event_loop.record_promise_settled();
        if reaction_type == PromiseReactionType::Reject && !handled {
            debug!(reason = %value, "promise rejected with no rejection handler");
        }

        for reaction in reactions {
            if reaction.reaction_type == reaction_type {
                let value = value.clone();
                let handler = reaction.handler;
                self.event_loop.queue_microtask(move || handler(value));
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("result", &self.result())
            .finish()
    }
}
