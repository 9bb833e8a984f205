//! promise-event: observe promise settlement through events
//!
//! Two constructs sit on top of a small single-threaded promise runtime:
//!
//! - [`PromiseEvent`] wraps one two-argument executor and publishes `resolve`
//!   or `reject` on its own channel.
//! - [`BatchAggregator`] (created with [`all`]) tracks a batch of already-started
//!   promises and publishes `progress`, `resolve`, `reject` and a single
//!   `finish`, while keeping indexed `results`/`errors` snapshots.
//!
//! # Quick Start
//!
//! ```no_run
//! use promise_event::{all, EventLoop, Promise, Value};
//!
//! fn main() -> promise_event::Result<()> {
//!     let el = EventLoop::new();
//!     let tasks = vec![
//!         Promise::resolved(&el, 1),
//!         Promise::rejected(&el, "e"),
//!         Promise::resolved(&el, 3),
//!     ];
//!
//!     let batch = all(&el, tasks)?;
//!     batch.on_progress(|n| println!("settled {}", n));
//!     batch.on_finish(|done| println!("results: {:?}", done.result_values()));
//!
//!     el.run_to_completion();
//!     assert_eq!(batch.progress(), 3);
//!     assert_eq!(batch.errors()[1], Some(Value::from("e")));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Runtime** | [`event_loop`], [`promise`], [`value`], [`config`] |
//! | **Events** | [`channel`] |
//! | **Bridges** | [`validation`], [`bridge`], [`aggregator`] |

pub mod aggregator;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod event_loop;
pub mod promise;
pub mod validation;
pub mod value;

mod error;

pub use aggregator::{
    all, BatchAggregator, BatchEvent, FinishDetail, RejectDetail, ResolveDetail, Slot,
    WeakBatchAggregator,
};
pub use bridge::PromiseEvent;
pub use channel::{event_names, Event, EventChannel, ListenerId, ListenerOptions, WeakEventChannel};
pub use config::EventLoopConfig;
pub use error::{messages, Error, Result, ValidationError};
pub use event_loop::{EventLoop, EventLoopStats, RunResult};
pub use promise::{Promise, PromiseState, Rejector, Resolver};
pub use validation::{validation, Validation};
pub use value::{Function, Value};

/// promise-event version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
