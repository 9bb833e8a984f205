//! Integration tests for the single-task bridge

mod common;
use common::timed;
use promise_event::{event_names, Event, EventLoop, PromiseEvent, PromiseState, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn counter(bridge: &PromiseEvent, name: &str) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    bridge.add_event_listener(name, move |_| c.set(c.get() + 1));
    count
}

mod validation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_one_parameter_executor_is_code_11() {
        let el = EventLoop::new();
        let executor = Value::new_function("executor", 1, |_| Ok(Value::Undefined));
        let err = PromiseEvent::from_value(&el, &executor).unwrap_err();
        assert_eq!(err.code(), Some(11));
        assert_eq!(
            err.to_string(),
            "[Code 11] The provided function does not have two arguments."
        );
        assert_eq!(el.stats().total_promises_created, 0);
    }

    #[test]
    fn test_non_function_is_code_10() {
        let el = EventLoop::new();
        let err = PromiseEvent::from_value(&el, &Value::from("executor")).unwrap_err();
        assert_eq!(err.code(), Some(10));
    }

    #[test]
    fn test_null_executor_creates_inert_bridge() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::from_value(&el, &Value::Null).unwrap();
        assert!(bridge.promise().is_none());
        let resolves = counter(&bridge, event_names::RESOLVE);
        el.run_to_completion();
        assert_eq!(resolves.get(), 0);
    }
}

mod events {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reject_publishes_one_reject_and_no_resolve() {
        let el = EventLoop::new();
        let executor = Value::new_function("executor", 2, |args| {
            args[1].call(&[Value::from("denied")])?;
            Ok(Value::Undefined)
        });
        let bridge = PromiseEvent::from_value(&el, &executor).unwrap();
        let resolves = counter(&bridge, event_names::RESOLVE);
        let rejects = counter(&bridge, event_names::REJECT);

        el.run_to_completion();
        assert_eq!(resolves.get(), 0);
        assert_eq!(rejects.get(), 1);
        assert_eq!(bridge.promise().map(|p| p.state()), Some(PromiseState::Rejected));
    }

    #[test]
    fn test_resolve_after_timer() {
        let el = EventLoop::new();
        let timers = el.clone();
        let bridge = PromiseEvent::new(&el, move |resolve, _reject| {
            timers.set_timeout(25, move || resolve.resolve(99));
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        bridge.on(event_names::RESOLVE, move |v| s.borrow_mut().push(v.clone()));

        let run = el.run_to_completion();
        assert_eq!(*seen.borrow(), vec![Value::from(99)]);
        assert_eq!(run.final_time, 25);
    }

    #[test]
    fn test_settling_twice_publishes_once() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::new(&el, |resolve, reject| {
            resolve.resolve(1);
            reject.reject("ignored");
            resolve.resolve(2);
        });
        let resolves = counter(&bridge, event_names::RESOLVE);
        let rejects = counter(&bridge, event_names::REJECT);

        el.run_to_completion();
        assert_eq!((resolves.get(), rejects.get()), (1, 0));
    }

    #[test]
    fn test_setters_are_one_shot() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::new(&el, |resolve, _| resolve.resolve("v"));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        bridge.on_resolve(move |_| c.set(c.get() + 1));

        el.run_to_completion();
        bridge.dispatch_event(Event::new(event_names::RESOLVE, Value::from("manual")));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_persistent_listener_sees_manual_dispatch() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::new(&el, |resolve, _| resolve.resolve("v"));
        let resolves = counter(&bridge, event_names::RESOLVE);

        el.run_to_completion();
        bridge.dispatch_event(Event::new(event_names::RESOLVE, Value::from("manual")));
        assert_eq!(resolves.get(), 2);
    }
}

mod batches {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bridge_all_uses_bridge_loop() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::new(&el, |resolve, _| resolve.resolve(0));
        let batch = bridge
            .all(vec![
                timed(&el, 5, Ok(Value::from(1))),
                timed(&el, 1, Err(Value::from("x"))),
            ])
            .unwrap();

        el.run_to_completion();
        assert!(batch.is_finished());
        assert_eq!(batch.errors(), vec![None, Some(Value::from("x"))]);
    }

    #[test]
    fn test_bridge_all_validates() {
        let el = EventLoop::new();
        let bridge = PromiseEvent::from_value(&el, &Value::Undefined).unwrap();
        assert_eq!(bridge.all(Value::Undefined).unwrap_err().code(), Some(20));
    }
}
