//! Effect system - re-run closures with tracked dependencies.
//!
//! An effect wraps a closure so that every execution:
//! 1. unsubscribes it from all signals recorded during its previous run,
//! 2. pushes it onto the tracking stack,
//! 3. executes the closure (signal reads subscribe as they happen),
//! 4. pops the tracking stack.
//!
//! The stack (rather than a single slot) keeps tracking well-defined when a
//! mount performed inside a running effect registers and first-runs a child
//! effect: the innermost frame is always the tracking target.
//!
//! A trigger landing on an effect that is already running does not recurse:
//! the effect is flagged and re-runs once after the current pass completes.
//! An effect whose body unconditionally writes one of its own dependencies
//! will therefore loop forever - same failure class as unguarded recursion,
//! and the caller's bug.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::signal::DepNode;

thread_local! {
    /// Tracking stack. `Some(effect)` frames track reads; `None` frames
    /// (pushed by [`untracked`]) suppress tracking.
    static EFFECT_STACK: RefCell<Vec<Option<Rc<EffectInner>>>> = RefCell::new(Vec::new());
}

/// The effect currently eligible to record dependencies, if any.
pub(crate) fn current_effect() -> Option<Rc<EffectInner>> {
    EFFECT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Run `f` with dependency tracking suppressed.
///
/// Signal reads inside `f` behave like `get_untracked` even when an effect
/// is executing. The render pipeline uses this for mount-time work (input
/// evaluation, instance construction) that must not subscribe the parent's
/// render effect.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    EFFECT_STACK.with(|stack| stack.borrow_mut().push(None));
    let result = f();
    EFFECT_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    result
}

pub(crate) struct EffectInner {
    body: RefCell<Box<dyn FnMut()>>,
    /// Signals read during the most recent run.
    dependencies: RefCell<Vec<Rc<DepNode>>>,
    running: Cell<bool>,
    /// Set when a trigger lands while `running`; forces one more pass.
    queued: Cell<bool>,
    disposed: Cell<bool>,
}

impl EffectInner {
    /// Execute the effect body with fresh dependency tracking.
    ///
    /// Serializes nested triggers: a re-entrant call flags `queued` and
    /// returns; the outermost call loops until no trigger arrived mid-run.
    pub(crate) fn run(this: &Rc<Self>) {
        if this.disposed.get() {
            return;
        }
        if this.running.get() {
            this.queued.set(true);
            return;
        }
        this.running.set(true);
        loop {
            this.queued.set(false);
            Self::clear_dependencies(this);
            EFFECT_STACK.with(|stack| stack.borrow_mut().push(Some(this.clone())));
            {
                let mut body = this.body.borrow_mut();
                body();
            }
            EFFECT_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
            if !this.queued.get() || this.disposed.get() {
                break;
            }
        }
        this.running.set(false);
    }

    /// Record `dep` as read by this effect. Returns true when the link is
    /// new (the caller then registers the reverse subscription).
    pub(crate) fn track_dependency(this: &Rc<Self>, dep: &Rc<DepNode>) -> bool {
        let mut dependencies = this.dependencies.borrow_mut();
        if dependencies.iter().any(|known| Rc::ptr_eq(known, dep)) {
            return false;
        }
        dependencies.push(dep.clone());
        true
    }

    fn clear_dependencies(this: &Rc<Self>) {
        let dependencies = std::mem::take(&mut *this.dependencies.borrow_mut());
        for dep in dependencies {
            dep.unsubscribe(this);
        }
    }

    fn dispose(this: &Rc<Self>) {
        if this.disposed.replace(true) {
            return;
        }
        Self::clear_dependencies(this);
    }
}

/// Handle to a registered effect.
///
/// Invoking [`run`](EffectHandle::run) triggers a re-run identical to a
/// signal notification. Dropping the handle does not tear the effect down -
/// it stays subscribed until every strong reference is gone - but
/// [`dispose`](EffectHandle::dispose) severs all subscriptions immediately;
/// the render pipeline calls it when a mounted subtree is discarded.
#[derive(Clone)]
pub struct EffectHandle {
    inner: Rc<EffectInner>,
}

impl EffectHandle {
    /// Trigger a re-run, exactly as a dependency notification would.
    pub fn run(&self) {
        EffectInner::run(&self.inner);
    }

    /// Unsubscribe from every dependency and inert-ize the effect.
    pub fn dispose(&self) {
        EffectInner::dispose(&self.inner);
    }

    /// Whether [`dispose`](EffectHandle::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

/// Register an effect and run it once, synchronously.
///
/// Every signal read during a run subscribes the effect; any later write of
/// a *different* value (per the signal's comparator) re-runs it before the
/// write returns. Errors raised by the body propagate to whoever triggered
/// the run.
pub fn effect(f: impl FnMut() + 'static) -> EffectHandle {
    let inner = Rc::new(EffectInner {
        body: RefCell::new(Box::new(f)),
        dependencies: RefCell::new(Vec::new()),
        running: Cell::new(false),
        queued: Cell::new(false),
        disposed: Cell::new(false),
    });
    EffectInner::run(&inner);
    EffectHandle { inner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal::signal;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_effect_runs_once_on_creation() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1, "effect should run synchronously on creation");
    }

    #[test]
    fn test_effect_reruns_on_changed_write_only() {
        let count = signal(0);
        let count_effect = count.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            let _ = count_effect.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1);

        count.set(1);
        assert_eq!(runs.get(), 2, "changed write should re-run before set returns");

        count.set(1);
        assert_eq!(runs.get(), 2, "equal write should not notify");
    }

    #[test]
    fn test_dependencies_refresh_each_run() {
        let which = signal(true);
        let a = signal(0);
        let b = signal(0);

        let which_effect = which.clone();
        let a_effect = a.clone();
        let b_effect = b.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            if which_effect.get() {
                let _ = a_effect.get();
                let _ = b_effect.get();
            } else {
                let _ = a_effect.get();
            }
        });

        assert_eq!(runs.get(), 1);

        // Switch to the branch that reads only `a`.
        which.set(false);
        assert_eq!(runs.get(), 2);

        // `b` is no longer a dependency: writing it must not re-run.
        b.set(99);
        assert_eq!(runs.get(), 2, "stale subscription must be dropped on re-run");

        a.set(5);
        assert_eq!(runs.get(), 3, "live subscription still triggers");
    }

    #[test]
    fn test_untracked_read_does_not_subscribe() {
        let count = signal(0);
        let count_effect = count.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            let _ = untracked(|| count_effect.get());
        });

        count.set(7);
        assert_eq!(runs.get(), 1, "untracked read must not subscribe");
    }

    #[test]
    fn test_get_untracked_does_not_subscribe() {
        let count = signal(0);
        let count_effect = count.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            let _ = count_effect.get_untracked();
        });

        count.set(7);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_handle_run_triggers_rerun() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
        });

        handle.run();
        assert_eq!(runs.get(), 2, "invoking the handle re-runs the body");
    }

    #[test]
    fn test_dispose_severs_subscriptions() {
        let count = signal(0);
        let count_effect = count.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let handle = effect(move || {
            let _ = count_effect.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        handle.dispose();
        assert!(handle.is_disposed());

        count.set(42);
        assert_eq!(runs.get(), 1, "disposed effect must not react");

        handle.run();
        assert_eq!(runs.get(), 1, "disposed effect must not run manually either");
    }

    #[test]
    fn test_self_write_is_serialized_not_recursive() {
        // Body writes its own dependency until it converges; the nested
        // trigger must be queued, not recursed into.
        let count = signal(0);
        let count_effect = count.clone();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let _handle = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            let current = count_effect.get();
            if current < 3 {
                count_effect.set(current + 1);
            }
        });

        assert_eq!(count.get_untracked(), 3, "writes should converge");
        assert_eq!(runs.get(), 4, "one pass per queued trigger: 0->1->2->3 plus initial");
    }

    #[test]
    fn test_notification_order_is_subscription_order() {
        let count = signal(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let count_a = count.clone();
        let order_a = order.clone();
        let _first = effect(move || {
            let _ = count_a.get();
            order_a.borrow_mut().push("first");
        });

        let count_b = count.clone();
        let order_b = order.clone();
        let _second = effect(move || {
            let _ = count_b.get();
            order_b.borrow_mut().push("second");
        });

        order.borrow_mut().clear();
        count.set(1);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_write_during_notify_tolerates_subscriber_changes() {
        // The first effect's re-run writes a signal the second effect reads
        // this time but not last time; notification must not misbehave.
        let trigger = signal(0);
        let relay = signal(0);

        let trigger_a = trigger.clone();
        let relay_a = relay.clone();
        let _forwarder = effect(move || {
            let value = trigger_a.get();
            relay_a.set(value * 10);
        });

        let relay_b = relay.clone();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        let _reader = effect(move || {
            seen_clone.set(relay_b.get());
        });

        trigger.set(3);
        assert_eq!(seen.get(), 30, "downstream effect should observe the relayed write");
    }
}
