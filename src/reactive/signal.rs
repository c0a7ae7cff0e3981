//! Signals - observable single-value cells with change notification.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::{EffectInner, current_effect};

/// Untyped dependency node shared between a signal and its subscribers.
///
/// Keeping the subscriber bookkeeping out of the generic signal lets an
/// effect hold dependencies on signals of any value type.
pub(crate) struct DepNode {
    subscribers: RefCell<Vec<Weak<EffectInner>>>,
}

impl DepNode {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            subscribers: RefCell::new(Vec::new()),
        })
    }

    /// Subscribe the currently-running effect, if any.
    pub(crate) fn track(this: &Rc<Self>) {
        if let Some(effect) = current_effect()
            && EffectInner::track_dependency(&effect, this)
        {
            this.subscribers.borrow_mut().push(Rc::downgrade(&effect));
        }
    }

    /// Drop one effect's subscription (and any dead entries met on the way).
    pub(crate) fn unsubscribe(&self, effect: &Rc<EffectInner>) {
        self.subscribers
            .borrow_mut()
            .retain(|weak| weak.upgrade().is_some_and(|live| !Rc::ptr_eq(&live, effect)));
    }

    /// Re-run every current subscriber.
    ///
    /// A stable snapshot is taken first: a subscriber's own re-run may
    /// add or remove subscriptions mid-pass without disturbing iteration.
    pub(crate) fn notify(&self) {
        let subscribers: Vec<Rc<EffectInner>> = self
            .subscribers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for effect in subscribers {
            EffectInner::run(&effect);
        }
    }
}

struct SignalInner<T> {
    value: RefCell<T>,
    equals: Box<dyn Fn(&T, &T) -> bool>,
    dep: Rc<DepNode>,
}

/// Observable cell. Cheap to clone - clones share the same cell.
///
/// Created once per owning component instance; mutated only through
/// [`set`](Signal::set); read through [`get`](Signal::get) (tracked) or
/// [`get_untracked`](Signal::get_untracked). Never destroyed explicitly -
/// it goes away with its owner.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

/// Construct a signal with the default comparator (`PartialEq`).
pub fn signal<T: PartialEq + 'static>(initial: T) -> Signal<T> {
    signal_with(initial, |a, b| a == b)
}

/// Construct a signal with a custom value-equality comparator.
///
/// `set` notifies only when the comparator reports the values unequal;
/// `|_, _| false` makes every write notify.
pub fn signal_with<T: 'static>(initial: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Signal<T> {
    Signal {
        inner: Rc::new(SignalInner {
            value: RefCell::new(initial),
            equals: Box::new(equals),
            dep: DepNode::new(),
        }),
    }
}

impl<T: Clone> Signal<T> {
    /// Read the current value. Inside a running effect this also subscribes
    /// that effect; otherwise it behaves like [`get_untracked`](Signal::get_untracked).
    pub fn get(&self) -> T {
        DepNode::track(&self.inner.dep);
        self.inner.value.borrow().clone()
    }

    /// Read the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T> Signal<T> {
    /// Replace the value and synchronously notify subscribers, unless the
    /// comparator considers the new value equal to the current one.
    ///
    /// Each changed write performs its own full notify pass; there is no
    /// batching across writes.
    pub fn set(&self, value: T) {
        let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &value);
        if unchanged {
            return;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.dep.notify();
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for Signal<T> {
    /// Identity comparison: two handles are equal when they share the cell.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&*self.inner.value.borrow()).finish()
    }
}
