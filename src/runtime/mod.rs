//! Runtime - descriptor registry, dependency resolver, and host context.
//!
//! A [`Runtime`] is one self-contained universe: its own render tree, its
//! own descriptor and dependency registries, its own template and
//! expression caches, its own mount table. Nothing is ambient or
//! process-global, so independent runtimes coexist freely (tests build one
//! each and never reset anything).
//!
//! # Lifecycle
//!
//! ```ignore
//! let rt = Runtime::new();
//!
//! // Host page: a root node the bootstrap selector can find.
//! let app = rt.with_tree(|tree| {
//!     let root = tree.root();
//!     let app = tree.create_element("div");
//!     tree.set_attribute(app, "id", "app");
//!     tree.append_child(root, app);
//!     app
//! });
//!
//! rt.register_dependency("CounterService", make_counter_service);
//! rt.register_descriptor(counter_descriptor());
//! let shell = rt.register_descriptor(shell_descriptor());
//!
//! rt.bootstrap(&shell)?;
//! rt.dispatch(some_button, "click");
//! ```

mod instance;
mod mount;

pub use instance::{DynamicInstance, Instance, InstanceRef};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::expr::{Evaluator, Value};
use crate::rtree::{NodeId, Tree};
use crate::template::DirectiveNode;

/// Static metadata plus factory for one component kind.
///
/// Produced by the external source-to-descriptor compiler; immutable at
/// runtime. The factory receives the resolved dependency instances in
/// declared order - it is the constructor.
pub struct ComponentDescriptor {
    /// `#name` matches an `id` attribute; anything else matches a tag.
    pub selector: String,
    /// Raw template markup, compiled once per descriptor.
    pub template: String,
    /// Input names assignable from attributes on the mount node.
    pub inputs: Vec<String>,
    /// Dependency names resolved positionally into the factory.
    pub dependency_names: Vec<String>,
    /// Builds one instance per mount from the resolved dependencies.
    pub factory: Box<dyn Fn(&[InstanceRef]) -> InstanceRef>,
}

impl ComponentDescriptor {
    pub fn new(
        selector: &str,
        template: &str,
        factory: impl Fn(&[InstanceRef]) -> InstanceRef + 'static,
    ) -> Self {
        Self {
            selector: selector.to_string(),
            template: template.to_string(),
            inputs: Vec::new(),
            dependency_names: Vec::new(),
            factory: Box::new(factory),
        }
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, names: &[&str]) -> Self {
        self.dependency_names = names.iter().map(|name| name.to_string()).collect();
        self
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) tree: RefCell<Tree>,
    /// Registration order preserved - child scanning follows it.
    descriptors: RefCell<Vec<Rc<ComponentDescriptor>>>,
    providers: RefCell<HashMap<String, Box<dyn Fn() -> InstanceRef>>>,
    singletons: RefCell<HashMap<String, InstanceRef>>,
    /// Compiled directive trees, one per descriptor selector.
    templates: RefCell<HashMap<String, Rc<Vec<DirectiveNode>>>>,
    pub(crate) mounts: RefCell<HashMap<NodeId, Rc<mount::MountRecord>>>,
    pub(crate) evaluator: Evaluator,
}

impl RuntimeInner {
    pub(crate) fn descriptor(&self, selector: &str) -> Option<Rc<ComponentDescriptor>> {
        self.descriptors
            .borrow()
            .iter()
            .find(|descriptor| descriptor.selector == selector)
            .cloned()
    }

    /// Selectors of every registered descriptor except `own`, in
    /// registration order.
    pub(crate) fn child_descriptors(&self, own: &str) -> Vec<Rc<ComponentDescriptor>> {
        self.descriptors
            .borrow()
            .iter()
            .filter(|descriptor| descriptor.selector != own)
            .cloned()
            .collect()
    }

    pub(crate) fn compiled_template(
        &self,
        descriptor: &ComponentDescriptor,
    ) -> Result<Rc<Vec<DirectiveNode>>> {
        if let Some(compiled) = self.templates.borrow().get(&descriptor.selector) {
            return Ok(compiled.clone());
        }
        let compiled = Rc::new(crate::template::compile(&descriptor.template)?);
        self.templates
            .borrow_mut()
            .insert(descriptor.selector.clone(), compiled.clone());
        Ok(compiled)
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<InstanceRef> {
        if let Some(existing) = self.singletons.borrow().get(name) {
            return Ok(existing.clone());
        }
        let constructed = {
            let providers = self.providers.borrow();
            let Some(provider) = providers.get(name) else {
                return Err(Error::DependencyNotFound {
                    name: name.to_string(),
                });
            };
            provider()
        };
        debug!(dependency = name, "constructed singleton");
        self.singletons
            .borrow_mut()
            .insert(name.to_string(), constructed.clone());
        Ok(constructed)
    }
}

/// Handle to a runtime universe. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                tree: RefCell::new(Tree::new()),
                descriptors: RefCell::new(Vec::new()),
                providers: RefCell::new(HashMap::new()),
                singletons: RefCell::new(HashMap::new()),
                templates: RefCell::new(HashMap::new()),
                mounts: RefCell::new(HashMap::new()),
                evaluator: Evaluator::new(),
            }),
        }
    }

    // =========================================================================
    // Registration surface
    // =========================================================================

    /// Add a descriptor to the selector registry. Later mounts scan for
    /// descendants matching registered selectors in registration order.
    pub fn register_descriptor(&self, descriptor: ComponentDescriptor) -> Rc<ComponentDescriptor> {
        let descriptor = Rc::new(descriptor);
        self.inner.descriptors.borrow_mut().push(descriptor.clone());
        descriptor
    }

    /// Look up a registered descriptor by selector.
    pub fn descriptor(&self, selector: &str) -> Option<Rc<ComponentDescriptor>> {
        self.inner.descriptor(selector)
    }

    /// Register a zero-argument constructor under a dependency name.
    ///
    /// The constructor runs at most once - the first resolution caches the
    /// singleton for the runtime's lifetime.
    pub fn register_dependency(&self, name: &str, provider: impl Fn() -> InstanceRef + 'static) {
        self.inner
            .providers
            .borrow_mut()
            .insert(name.to_string(), Box::new(provider));
    }

    /// Resolve a dependency singleton, constructing it on first use.
    pub fn resolve(&self, name: &str) -> Result<InstanceRef> {
        self.inner.resolve(name)
    }

    // =========================================================================
    // Mounting
    // =========================================================================

    /// Locate the host node matching the descriptor's selector and mount
    /// onto it. Fails with [`Error::RootNotFound`] when no node matches.
    pub fn bootstrap(&self, descriptor: &Rc<ComponentDescriptor>) -> Result<NodeId> {
        let target = {
            let tree = self.inner.tree.borrow();
            tree.query_first(tree.root(), &descriptor.selector)
        };
        let Some(node) = target else {
            return Err(Error::RootNotFound {
                selector: descriptor.selector.clone(),
            });
        };
        mount::mount(&self.inner, descriptor.clone(), node, None)?;
        Ok(node)
    }

    /// Mount a descriptor onto an explicit node, without a parent scope.
    pub fn mount(&self, descriptor: &Rc<ComponentDescriptor>, node: NodeId) -> Result<()> {
        mount::mount(&self.inner, descriptor.clone(), node, None)
    }

    /// Dispose every mount record in the node's subtree (their render
    /// effects unsubscribe immediately) and clear the node's content.
    pub fn unmount(&self, node: NodeId) {
        mount::unmount(&self.inner, node);
    }

    // =========================================================================
    // Host surface access
    // =========================================================================

    /// Mutate or inspect the render tree directly - the host-page side of
    /// the contract (building the initial document, test assertions).
    pub fn with_tree<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.inner.tree.borrow_mut())
    }

    /// Fire an event on a node: every listener attached for `event` runs,
    /// in attachment order, with an event payload. Returns how many ran.
    ///
    /// Listeners are cloned out before any of them runs, so a handler is
    /// free to trigger re-renders that rebuild the very node it fired on.
    pub fn dispatch(&self, node: NodeId, event: &str) -> usize {
        let listeners = self.inner.tree.borrow().listeners(node, event);
        let payload = Value::Object(HashMap::from([(
            "type".to_string(),
            Value::Str(event.to_string()),
        )]));
        for listener in &listeners {
            listener(&payload);
        }
        listeners.len()
    }

    /// Instance mounted at `node`, if any. Lets embedders and tests reach
    /// component state without threading references around.
    pub fn instance_at(&self, node: NodeId) -> Option<InstanceRef> {
        self.inner
            .mounts
            .borrow()
            .get(&node)
            .map(|record| record.instance.clone())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_factory(_: &[InstanceRef]) -> InstanceRef {
        DynamicInstance::new().into_ref()
    }

    #[test]
    fn test_resolve_caches_singletons() {
        let rt = Runtime::new();
        let counter = std::rc::Rc::new(std::cell::Cell::new(0));
        let counter_provider = counter.clone();
        rt.register_dependency("Service", move || {
            counter_provider.set(counter_provider.get() + 1);
            DynamicInstance::new().into_ref()
        });

        let first = rt.resolve("Service").expect("registered dependency resolves");
        let second = rt.resolve("Service").expect("second resolution");
        assert!(Rc::ptr_eq(&first, &second), "same singleton both times");
        assert_eq!(counter.get(), 1, "constructor ran exactly once");
    }

    #[test]
    fn test_resolve_unknown_name_fails() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.resolve("Missing"),
            Err(Error::DependencyNotFound { name }) if name == "Missing"
        ));
    }

    #[test]
    fn test_runtimes_are_independent() {
        let first = Runtime::new();
        let second = Runtime::new();
        first.register_dependency("Service", || DynamicInstance::new().into_ref());

        assert!(first.resolve("Service").is_ok());
        assert!(
            second.resolve("Service").is_err(),
            "registration on one runtime must be invisible to another"
        );
    }

    #[test]
    fn test_descriptor_lookup_by_selector() {
        let rt = Runtime::new();
        rt.register_descriptor(ComponentDescriptor::new("widget", "<p>w</p>", noop_factory));
        assert!(rt.descriptor("widget").is_some());
        assert!(rt.descriptor("other").is_none());
    }

    #[test]
    fn test_bootstrap_without_matching_node_fails() {
        let rt = Runtime::new();
        let descriptor = rt.register_descriptor(ComponentDescriptor::new(
            "#app",
            "<p>hello</p>",
            noop_factory,
        ));
        assert!(matches!(
            rt.bootstrap(&descriptor),
            Err(Error::RootNotFound { selector }) if selector == "#app"
        ));
    }

    #[test]
    fn test_template_compiled_once_per_descriptor() {
        let rt = Runtime::new();
        let descriptor = ComponentDescriptor::new("widget", "@if[true]{x}", noop_factory);
        let first = rt.inner.compiled_template(&descriptor).expect("compiles");
        let second = rt.inner.compiled_template(&descriptor).expect("cached");
        assert!(Rc::ptr_eq(&first, &second));
    }
}
