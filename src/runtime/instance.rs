//! Component instances - the reflective seam between evaluator and state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::expr::Value;

/// A live component or dependency instance.
///
/// The evaluator and the render pipeline see instances only through this
/// trait: named properties, named methods, and a one-shot initialization
/// hook. Methods take `&self` - implementations keep their mutable state in
/// signals or cells, so a method is free to trigger a re-render that reads
/// the same instance without aliasing trouble.
pub trait Instance {
    /// Read a named property. `None` when the instance has no such member.
    fn property(&self, name: &str) -> Option<Value>;

    /// Assign a named property. Used for declared-input assignment at
    /// mount; unknown names simply create the property.
    fn set_property(&self, name: &str, value: Value);

    /// Invoke a named method. `None` when no such method exists - the
    /// caller decides whether that is an error (expression evaluation) or
    /// silently ignored (event dispatch).
    fn invoke(&self, name: &str, args: &[Value]) -> Option<Value>;

    /// Called exactly once per mount, after the first render.
    fn on_init(&self) {}
}

pub type InstanceRef = Rc<dyn Instance>;

/// Property-map instance for descriptor factories.
///
/// State lives in [`Value`]s (typically signals) and methods are closures
/// capturing those same signals, so no method ever needs access to the
/// instance itself:
///
/// ```ignore
/// let count = signal(Value::Number(0.0));
/// let count_inc = count.clone();
/// let instance = DynamicInstance::new()
///     .with_property("count", Value::Signal(count.clone()))
///     .with_method("increment", move |_| {
///         let Value::Number(n) = count_inc.get_untracked() else { return Value::Null };
///         count_inc.set(Value::Number(n + 1.0));
///         Value::Null
///     })
///     .into_ref();
/// ```
///
/// Hand-written `impl Instance` types plug into the same seam when a
/// component outgrows a property map.
pub struct DynamicInstance {
    properties: RefCell<HashMap<String, Value>>,
    methods: HashMap<String, Rc<dyn Fn(&[Value]) -> Value>>,
    init: Option<Box<dyn Fn()>>,
}

impl DynamicInstance {
    pub fn new() -> Self {
        Self {
            properties: RefCell::new(HashMap::new()),
            methods: HashMap::new(),
            init: None,
        }
    }

    pub fn with_property(self, name: &str, value: impl Into<Value>) -> Self {
        self.properties
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self
    }

    pub fn with_method(mut self, name: &str, method: impl Fn(&[Value]) -> Value + 'static) -> Self {
        self.methods.insert(name.to_string(), Rc::new(method));
        self
    }

    pub fn with_init(mut self, init: impl Fn() + 'static) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    pub fn into_ref(self) -> InstanceRef {
        Rc::new(self)
    }
}

impl Default for DynamicInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl Instance for DynamicInstance {
    fn property(&self, name: &str) -> Option<Value> {
        self.properties.borrow().get(name).cloned()
    }

    fn set_property(&self, name: &str, value: Value) {
        self.properties.borrow_mut().insert(name.to_string(), value);
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Option<Value> {
        let method = self.methods.get(name)?.clone();
        Some(method(args))
    }

    fn on_init(&self) {
        if let Some(init) = &self.init {
            init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_properties_read_and_assign() {
        let instance = DynamicInstance::new().with_property("label", "hi").into_ref();
        assert_eq!(instance.property("label"), Some(Value::Str("hi".into())));
        assert_eq!(instance.property("missing"), None);

        instance.set_property("label", Value::from("bye"));
        instance.set_property("fresh", Value::from(1i64));
        assert_eq!(instance.property("label"), Some(Value::Str("bye".into())));
        assert_eq!(instance.property("fresh"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_invoke_known_and_unknown() {
        let instance = DynamicInstance::new()
            .with_method("twice", |args| match args.first() {
                Some(Value::Number(n)) => Value::Number(n * 2.0),
                _ => Value::Null,
            })
            .into_ref();

        assert_eq!(
            instance.invoke("twice", &[Value::Number(4.0)]),
            Some(Value::Number(8.0))
        );
        assert_eq!(instance.invoke("missing", &[]), None);
    }

    #[test]
    fn test_init_hook_runs_when_called() {
        let called = Rc::new(Cell::new(false));
        let called_init = called.clone();
        let instance = DynamicInstance::new()
            .with_init(move || called_init.set(true))
            .into_ref();

        assert!(!called.get());
        instance.on_init();
        assert!(called.get());
    }

    #[test]
    fn test_method_may_mutate_properties_reentrantly() {
        // A method invoked through the evaluator may assign properties on
        // the same instance; interior mutability keeps that legal.
        let instance = Rc::new(DynamicInstance::new().with_property("hits", Value::Number(0.0)));
        let observer: InstanceRef = instance.clone();
        let target = observer.clone();
        let instance = DynamicInstance::new()
            .with_method("bump", move |_| {
                let current = match target.property("hits") {
                    Some(Value::Number(n)) => n,
                    _ => 0.0,
                };
                target.set_property("hits", Value::Number(current + 1.0));
                Value::Null
            })
            .into_ref();

        instance.invoke("bump", &[]);
        instance.invoke("bump", &[]);
        assert_eq!(observer.property("hits"), Some(Value::Number(2.0)));
    }
}
