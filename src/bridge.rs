//! Single-task bridge
//!
//! [`PromiseEvent`] wraps one executor and republishes the resulting
//! promise's settlement on its own channel: `resolve` with the value, or
//! `reject` with the reason. Exactly one of the two fires, once, in a
//! microtask queued after the promise reaction runs.

use crate::aggregator::BatchAggregator;
use crate::channel::{event_names, Event, EventChannel, ListenerId};
use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::promise::{Promise, Rejector, Resolver};
use crate::validation::validation;
use crate::value::Value;
use tracing::trace;

/// Event-publishing wrapper around a single promise
pub struct PromiseEvent {
    channel: EventChannel<Value>,
    promise: Option<Promise>,
    event_loop: EventLoop,
}

impl PromiseEvent {
    /// Run a two-argument executor and bridge its promise
    pub fn new<F>(event_loop: &EventLoop, executor: F) -> Self
    where
        F: FnOnce(Resolver, Rejector),
    {
        let promise = Promise::new(event_loop, executor);
        Self::bridge(event_loop, Some(promise))
    }

    /// Validate a dynamic executor and bridge its promise.
    ///
    /// A falsy candidate produces a bridge without a promise. A non-function
    /// fails with code 10, a function not declaring two parameters with
    /// code 11; in both cases the executor is never called.
    pub fn from_value(event_loop: &EventLoop, executor: &Value) -> Result<Self> {
        let promise = if validation(executor).main()? {
            Some(Promise::from_executor(event_loop, executor)?)
        } else {
            None
        };
        Ok(Self::bridge(event_loop, promise))
    }

    /// Bridge an existing promise
    pub fn from_promise(event_loop: &EventLoop, promise: Promise) -> Self {
        Self::bridge(event_loop, Some(promise))
    }

    fn bridge(event_loop: &EventLoop, promise: Option<Promise>) -> Self {
        let channel = EventChannel::new();

        if let Some(promise) = &promise {
            let on_ok = channel.clone();
            let on_err = channel.clone();
            let el_ok = event_loop.clone();
            let el_err = event_loop.clone();
            promise
                .then(move |value| {
                    el_ok.queue_microtask(move || {
                        trace!("bridged promise resolved");
                        on_ok.publish(event_names::RESOLVE, value);
                    })
                })
                .catch(move |reason| {
                    el_err.queue_microtask(move || {
                        trace!("bridged promise rejected");
                        on_err.publish(event_names::REJECT, reason);
                    })
                });
        }

        Self {
            channel,
            promise,
            event_loop: event_loop.clone(),
        }
    }

    /// The underlying promise; absent when the executor was falsy
    pub fn promise(&self) -> Option<&Promise> {
        self.promise.as_ref()
    }

    /// Observe a batch of tasks on this bridge's event loop
    pub fn all(&self, tasks: impl Into<Value>) -> Result<BatchAggregator> {
        BatchAggregator::new(&self.event_loop, tasks)
    }

    /// Register a persistent handler
    pub fn add_event_listener<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + 'static,
    {
        self.channel.add_event_listener(name, handler)
    }

    /// Remove a handler
    pub fn remove_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.channel.remove_event_listener(name, id)
    }

    /// Publish an event on this bridge's channel
    pub fn dispatch_event(&self, event: Event<Value>) -> usize {
        self.channel.dispatch_event(event)
    }

    /// Register a one-shot handler
    pub fn on<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + 'static,
    {
        self.channel.once(name, handler)
    }

    /// One-shot `resolve` handler
    pub fn on_resolve<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Value) + 'static,
    {
        self.channel.once(event_names::RESOLVE, handler)
    }

    /// One-shot `reject` handler
    pub fn on_reject<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Value) + 'static,
    {
        self.channel.once(event_names::REJECT, handler)
    }
}

impl std::fmt::Debug for PromiseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseEvent")
            .field("promise", &self.promise)
            .field("channel", &self.channel)
            .finish()
    }
}
