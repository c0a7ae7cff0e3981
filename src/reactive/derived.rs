//! Derived values - memoized computations over signals.
//!
//! A derived is a read-only signal kept current by an internal effect. Reads
//! track the output signal; the internal effect tracks whatever the
//! computation reads. The render pipeline's compile-evaluate split follows
//! the same shape: recompute when inputs change, notify only when the result
//! actually differs.

use super::effect::{EffectHandle, effect};
use super::signal::{Signal, signal};
use std::cell::RefCell;
use std::rc::Rc;

/// Read-only memoized value. Cheap to clone - clones share the computation.
pub struct Derived<T> {
    value: Signal<T>,
    _handle: EffectHandle,
}

/// Construct a derived value.
///
/// `compute` runs once synchronously to seed the value, and again whenever
/// any signal it read changes. Downstream subscribers are notified only when
/// the recomputed value differs (`PartialEq`) from the previous one.
pub fn derived<T: Clone + PartialEq + 'static>(mut compute: impl FnMut() -> T + 'static) -> Derived<T> {
    let output: Rc<RefCell<Option<Signal<T>>>> = Rc::new(RefCell::new(None));
    let seed: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    let output_effect = output.clone();
    let seed_effect = seed.clone();
    let handle = effect(move || {
        let fresh = compute();
        let current = output_effect.borrow().clone();
        match current {
            Some(value) => value.set(fresh),
            None => *seed_effect.borrow_mut() = Some(fresh),
        }
    });

    // The effect above ran synchronously, so the seed is always populated.
    let initial = seed
        .borrow_mut()
        .take()
        .expect("derived computation runs synchronously on creation");
    let value = signal(initial);
    *output.borrow_mut() = Some(value.clone());

    Derived {
        value,
        _handle: handle,
    }
}

impl<T: Clone> Derived<T> {
    /// Read the current value, subscribing the running effect if any.
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Read the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.get_untracked()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _handle: self._handle.clone(),
        }
    }
}
