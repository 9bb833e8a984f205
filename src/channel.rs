//! Event channel
//!
//! A named publish/subscribe bus owned by one bridge or aggregator. Handlers
//! for a name are invoked in registration order; a handler registered with
//! `once` is removed before its first invocation.
//!
//! Handlers run with no borrow of the channel held, so a handler may
//! subscribe or unsubscribe on the channel that is invoking it. Handlers
//! added during a publish are not invoked by that publish; handlers removed
//! during a publish are skipped if they have not run yet.

use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Names of the events published by bridges and aggregators
pub mod event_names {
    pub const PROGRESS: &str = "progress";
    pub const RESOLVE: &str = "resolve";
    pub const REJECT: &str = "reject";
    pub const FINISH: &str = "finish";
}

/// Identifies a registered handler, for removal
pub type ListenerId = u64;

/// Shared handler callback
pub type Handler<D> = Rc<dyn Fn(&D)>;

/// Subscription options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the handler after its first invocation
    pub once: bool,
}

impl ListenerOptions {
    /// Persistent subscription
    pub const PERSISTENT: ListenerOptions = ListenerOptions { once: false };
    /// One-shot subscription
    pub const ONCE: ListenerOptions = ListenerOptions { once: true };
}

/// A named event with its payload
#[derive(Debug, Clone, PartialEq)]
pub struct Event<D> {
    /// Channel name
    pub name: String,
    /// Payload handed to every handler
    pub detail: D,
}

impl<D> Event<D> {
    /// Create a new event
    pub fn new(name: impl Into<String>, detail: D) -> Self {
        Self {
            name: name.into(),
            detail,
        }
    }
}

struct Listener<D> {
    id: ListenerId,
    handler: Handler<D>,
    once: bool,
}

struct ChannelInner<D> {
    listeners: HashMap<String, Vec<Listener<D>>>,
    next_id: ListenerId,
}

/// Named publish/subscribe bus. Clones share the same registrations.
pub struct EventChannel<D> {
    inner: Rc<RefCell<ChannelInner<D>>>,
}

/// Non-owning reference to an [`EventChannel`]
pub struct WeakEventChannel<D> {
    inner: Weak<RefCell<ChannelInner<D>>>,
}

impl<D> Clone for WeakEventChannel<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> WeakEventChannel<D> {
    /// The channel, if any strong handle is still alive
    pub fn upgrade(&self) -> Option<EventChannel<D>> {
        self.inner.upgrade().map(|inner| EventChannel { inner })
    }
}

impl<D> Clone for EventChannel<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> Default for EventChannel<D> {
    fn default() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelInner {
                listeners: HashMap::default(),
                next_id: 1,
            })),
        }
    }
}

impl<D> fmt::Debug for EventChannel<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let mut names: Vec<(&String, usize)> =
            inner.listeners.iter().map(|(k, v)| (k, v.len())).collect();
        names.sort();
        f.debug_struct("EventChannel").field("listeners", &names).finish()
    }
}

impl<D: 'static> EventChannel<D> {
    /// Create an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`
    pub fn subscribe<F>(&self, name: &str, handler: F, options: ListenerOptions) -> ListenerId
    where
        F: Fn(&D) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry(name.to_string())
            .or_default()
            .push(Listener {
                id,
                handler: Rc::new(handler),
                once: options.once,
            });
        id
    }

    /// Register a persistent handler
    pub fn add_event_listener<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&D) + 'static,
    {
        self.subscribe(name, handler, ListenerOptions::PERSISTENT)
    }

    /// Register a one-shot handler
    pub fn once<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&D) + 'static,
    {
        self.subscribe(name, handler, ListenerOptions::ONCE)
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, name: &str, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(list) = inner.listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.listeners.remove(name);
        }
        removed
    }

    /// Remove every handler registered for `name`. Returns how many were dropped.
    pub fn clear(&self, name: &str) -> usize {
        self.inner
            .borrow_mut()
            .listeners
            .remove(name)
            .map_or(0, |list| list.len())
    }

    /// Non-owning handle to this channel
    pub fn downgrade(&self) -> WeakEventChannel<D> {
        WeakEventChannel {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Alias of [`EventChannel::unsubscribe`]
    pub fn remove_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.unsubscribe(name, id)
    }

    /// Invoke every handler registered for `name`. Returns how many ran.
    pub fn publish(&self, name: &str, detail: D) -> usize {
        let snapshot: Vec<ListenerId> = match self.inner.borrow().listeners.get(name) {
            Some(list) => list.iter().map(|l| l.id).collect(),
            None => return 0,
        };

        let mut invoked = 0;
        for id in snapshot {
            let Some(handler) = self.take_for_invocation(name, id) else {
                continue;
            };
            handler(&detail);
            invoked += 1;
        }

        trace!(event = name, invoked, "published");
        invoked
    }

    /// Publish a prepared event
    pub fn dispatch_event(&self, event: Event<D>) -> usize {
        self.publish(&event.name, event.detail)
    }

    /// Look up a handler that is still registered, removing it if one-shot.
    fn take_for_invocation(&self, name: &str, id: ListenerId) -> Option<Handler<D>> {
        let mut inner = self.inner.borrow_mut();
        let list = inner.listeners.get_mut(name)?;
        let pos = list.iter().position(|l| l.id == id)?;
        if list[pos].once {
            let listener = list.remove(pos);
            if list.is_empty() {
                inner.listeners.remove(name);
            }
            Some(listener.handler)
        } else {
            Some(list[pos].handler.clone())
        }
    }

    /// Number of handlers registered for `name`
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(name)
            .map_or(0, |v| v.len())
    }

    /// Number of handlers across all names
    pub fn total_listener_count(&self) -> usize {
        self.inner.borrow().listeners.values().map(|v| v.len()).sum()
    }
}
