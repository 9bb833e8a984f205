//! Shared test helpers for integration tests

use promise_event::{EventLoop, Promise, Value};

/// A promise that settles after `delay` virtual milliseconds
pub fn timed(el: &EventLoop, delay: u64, outcome: Result<Value, Value>) -> Promise {
    let timers = el.clone();
    Promise::new(el, move |resolve, reject| {
        timers.set_timeout(delay, move || match outcome {
            Ok(v) => resolve.resolve(v),
            Err(e) => reject.reject(e),
        });
    })
}
