//! Render Pipeline - mount, render, relocate, rebind.
//!
//! Per mount the state machine is `Unmounted -> FirstRender -> Steady`.
//! Mounting resolves the instance, assigns inputs, and registers ONE render
//! effect whose first execution happens synchronously; every signal the
//! template reads during a pass subscribes that effect, so any changed
//! write re-renders the component before the write returns.
//!
//! # Reconciliation
//!
//! There is no node-granularity diff. A steady re-render evaluates the
//! whole directive tree and replaces the mount node's content, with one
//! exception: already-mounted child component subtrees are captured first,
//! keyed by selector, and swapped back in over the freshly rendered child
//! elements (selector + encounter order). Child identity - signals,
//! effects, listeners, node ids - survives an unrelated parent re-render
//! untouched.
//!
//! Mounted subtrees that find no slot in the new content (a toggled
//! conditional hid them) are disposed: their render effects unsubscribe
//! immediately rather than lingering until the objects drop.
//!
//! Event listeners are re-attached on every pass. Preserved child subtrees
//! therefore accumulate a duplicate listener per parent re-render - a known
//! limitation of rebinding by scan, accepted as such.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, error, warn};

use super::{ComponentDescriptor, InstanceRef, RuntimeInner};
use crate::error::Result;
use crate::expr::{Scope, Value};
use crate::reactive::{EffectHandle, effect, untracked};
use crate::rtree::{Listener, NodeId, Tree};
use crate::template::DirectiveNode;

/// One live mount: a render-tree node bound to a component instance.
pub(crate) struct MountRecord {
    pub(crate) descriptor: Rc<ComponentDescriptor>,
    pub(crate) instance: InstanceRef,
    pub(crate) effect: RefCell<Option<EffectHandle>>,
    is_first_render: Cell<bool>,
    pub(crate) node: NodeId,
}

/// Mount a descriptor onto a node.
///
/// Fatal failures - an unparseable template, an unregistered dependency -
/// abort this mount and propagate to the caller. The mount sequence is:
/// resolve dependencies, construct, assign inputs, register the render
/// effect (first render runs inside), invoke the init hook, then
/// recursively mount nested descriptors found in the rendered content.
pub(crate) fn mount(
    rt: &Rc<RuntimeInner>,
    descriptor: Rc<ComponentDescriptor>,
    node: NodeId,
    parent: Option<InstanceRef>,
) -> Result<()> {
    // Compile before constructing anything so a bad template leaves no
    // half-mounted state behind.
    rt.compiled_template(&descriptor)?;

    let dependencies = descriptor
        .dependency_names
        .iter()
        .map(|name| rt.resolve(name))
        .collect::<Result<Vec<_>>>()?;

    // Mount-time work must not subscribe an enclosing render effect: a
    // parent re-render is how we got here when a conditional reveals a
    // child mid-pass.
    let instance = untracked(|| (descriptor.factory)(&dependencies));
    untracked(|| assign_inputs(rt, &descriptor, node, &instance, parent.as_ref()));

    debug!(selector = %descriptor.selector, "mounting");

    let record = Rc::new(MountRecord {
        descriptor,
        instance: instance.clone(),
        effect: RefCell::new(None),
        is_first_render: Cell::new(true),
        node,
    });
    rt.mounts.borrow_mut().insert(node, record.clone());

    // The ONE render effect. It holds only weak references upward so a
    // dropped runtime or unmounted record quietly inert-izes it.
    let rt_weak = Rc::downgrade(rt);
    let record_weak = Rc::downgrade(&record);
    let handle = effect(move || {
        let (Some(rt), Some(record)) = (rt_weak.upgrade(), record_weak.upgrade()) else {
            return;
        };
        render_pass(&rt, &record);
    });
    *record.effect.borrow_mut() = Some(handle);

    // Init hook: once, after the effect's first execution, never before.
    untracked(|| instance.on_init());

    mount_children(rt, &record)
}

/// Dispose every mount in the subtree and clear the node's content.
pub(crate) fn unmount(rt: &Rc<RuntimeInner>, node: NodeId) {
    dispose_subtree_mounts(rt, node, true);
    rt.tree.borrow_mut().clear_children(node);
}

// =============================================================================
// Render passes
// =============================================================================

fn render_pass(rt: &Rc<RuntimeInner>, record: &Rc<MountRecord>) {
    if !rt.tree.borrow().is_alive(record.node) {
        return;
    }
    // Cache hit: the template compiled during mount or an earlier pass.
    let Ok(template) = rt.compiled_template(&record.descriptor) else {
        return;
    };

    if record.is_first_render.get() {
        let markup = evaluate_template(rt, &template, &record.instance);
        rt.tree.borrow_mut().set_markup(record.node, &markup);
        bind_events(rt, record.node, &record.instance);
        record.is_first_render.set(false);
        debug!(selector = %record.descriptor.selector, "first render");
    } else {
        rerender(rt, record, &template);
    }
}

/// Steady-state re-render: whole-subtree replace plus child relocation.
fn rerender(rt: &Rc<RuntimeInner>, record: &Rc<MountRecord>, template: &[DirectiveNode]) {
    let child_selectors: Vec<String> = rt
        .child_descriptors(&record.descriptor.selector)
        .iter()
        .map(|descriptor| descriptor.selector.clone())
        .collect();

    // Evaluate first, against a consistent tree, before anything moves.
    let markup = evaluate_template(rt, template, &record.instance);

    // Capture currently-mounted child subtrees, keyed by selector in
    // encounter order, and lift them out of the content about to go away.
    let mut preserved: HashMap<String, VecDeque<NodeId>> = HashMap::new();
    {
        let tree = rt.tree.borrow();
        let mounts = rt.mounts.borrow();
        let mut capture = Vec::new();
        collect_mounted_children(&tree, record.node, &child_selectors, &mounts, &mut capture);
        for (selector, child) in capture {
            preserved.entry(selector).or_default().push_back(child);
        }
    }
    {
        let mut tree = rt.tree.borrow_mut();
        for children in preserved.values() {
            for &child in children {
                tree.detach(child);
            }
        }
    }

    // Mounts still under this node were not preserved (their elements are
    // gone from the new content); dispose before their nodes are freed.
    dispose_subtree_mounts(rt, record.node, false);

    rt.tree.borrow_mut().set_markup(record.node, &markup);

    // The freshly parsed child-component elements are the placeholders:
    // swap each for its preserved subtree, selector by selector, in
    // encounter order. Fresh elements beyond the preserved count are new
    // children; leftovers with no slot are gone from the view.
    let slots = {
        let tree = rt.tree.borrow();
        let mut slots = Vec::new();
        collect_child_slots(&tree, record.node, &child_selectors, &mut slots);
        slots
    };
    for (selector, slot) in slots {
        let kept = preserved
            .get_mut(&selector)
            .and_then(VecDeque::pop_front);
        if let Some(kept) = kept {
            rt.tree.borrow_mut().replace_node(slot, kept);
        }
    }
    for (_, leftovers) in preserved {
        for child in leftovers {
            dispose_subtree_mounts_from(rt, child);
            rt.tree.borrow_mut().remove_subtree(child);
        }
    }

    bind_events(rt, record.node, &record.instance);

    // A toggled branch may have revealed brand-new child elements. Inside
    // an effect there is no caller to hand a Result to: log and carry on.
    if let Err(mount_error) = mount_children(rt, record) {
        error!(
            selector = %record.descriptor.selector,
            error = %mount_error,
            "child mount failed during re-render"
        );
    }

    debug!(selector = %record.descriptor.selector, "re-render");
}

/// Depth-first over attached children: a mounted element matching a child
/// selector is captured whole (its subtree moves with it, so recursion
/// stops there).
fn collect_mounted_children(
    tree: &Tree,
    node: NodeId,
    selectors: &[String],
    mounts: &HashMap<NodeId, Rc<MountRecord>>,
    out: &mut Vec<(String, NodeId)>,
) {
    for child in tree.children(node) {
        let matched = selectors
            .iter()
            .find(|selector| tree.matches(child, selector));
        match matched {
            Some(selector) if mounts.contains_key(&child) => {
                out.push((selector.clone(), child));
            }
            _ => collect_mounted_children(tree, child, selectors, mounts, out),
        }
    }
}

/// Fresh child-component elements in document order. Slots never nest:
/// a freshly rendered child element is empty until its own mount runs.
fn collect_child_slots(
    tree: &Tree,
    node: NodeId,
    selectors: &[String],
    out: &mut Vec<(String, NodeId)>,
) {
    for child in tree.children(node) {
        let matched = selectors
            .iter()
            .find(|selector| tree.matches(child, selector));
        match matched {
            Some(selector) => out.push((selector.clone(), child)),
            None => collect_child_slots(tree, child, selectors, out),
        }
    }
}

/// Dispose mount records living under `node` (and of `node` itself when
/// `include_self`), removing them from the mount table.
fn dispose_subtree_mounts(rt: &Rc<RuntimeInner>, node: NodeId, include_self: bool) {
    let doomed: Vec<NodeId> = {
        let tree = rt.tree.borrow();
        rt.mounts
            .borrow()
            .keys()
            .copied()
            .filter(|&mounted| {
                (include_self && mounted == node) || tree.is_ancestor(node, mounted)
            })
            .collect()
    };
    for mounted in doomed {
        if let Some(record) = rt.mounts.borrow_mut().remove(&mounted) {
            if let Some(handle) = record.effect.borrow().as_ref() {
                handle.dispose();
            }
            debug!(selector = %record.descriptor.selector, "disposed mount");
        }
    }
}

/// As above, but rooted at a detached subtree (parent links inside it are
/// intact, so ancestry still resolves).
fn dispose_subtree_mounts_from(rt: &Rc<RuntimeInner>, root: NodeId) {
    dispose_subtree_mounts(rt, root, true);
}

// =============================================================================
// Template evaluation
// =============================================================================

/// Evaluate the directive tree against current instance state, producing
/// the markup for this pass. Signal reads inside expressions subscribe the
/// running render effect - this is where reactivity attaches.
fn evaluate_template(rt: &RuntimeInner, nodes: &[DirectiveNode], instance: &InstanceRef) -> String {
    let mut scope = Scope::new(instance.clone());
    let mut out = String::new();
    evaluate_nodes(rt, nodes, &mut scope, &mut out);
    out
}

fn evaluate_nodes(rt: &RuntimeInner, nodes: &[DirectiveNode], scope: &mut Scope, out: &mut String) {
    for node in nodes {
        match node {
            DirectiveNode::Text(text) => interpolate(rt, text, scope, out),
            // Synthetic branch wrappers are transparent: children only.
            DirectiveNode::Element(element) => {
                evaluate_nodes(rt, &element.children, scope, out);
            }
            DirectiveNode::Conditional(conditional) => {
                // Only the chosen branch is evaluated - expressions on the
                // untaken side never run.
                if rt.evaluator.eval_condition(&conditional.condition, scope) {
                    evaluate_nodes(rt, &conditional.then_branch, scope, out);
                } else if let Some(wrapper) = &conditional.else_branch {
                    evaluate_nodes(rt, std::slice::from_ref(wrapper.as_ref()), scope, out);
                }
            }
            DirectiveNode::Loop(loop_node) => {
                let items = rt.evaluator.eval_list(&loop_node.list_expr, scope);
                if items.is_empty() {
                    if let Some(wrapper) = &loop_node.empty_branch {
                        evaluate_nodes(rt, std::slice::from_ref(wrapper.as_ref()), scope, out);
                    }
                    continue;
                }
                for item in items {
                    scope.push_local(&loop_node.item, item);
                    evaluate_nodes(rt, &loop_node.body, scope, out);
                    scope.pop_local();
                }
            }
        }
    }
}

/// Resolve `{{ expr }}` markers in a literal run. A failed expression
/// renders as empty text; sibling markers still resolve.
fn interpolate(rt: &RuntimeInner, text: &str, scope: &Scope, out: &mut String) {
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        match rest[start + 2..].find("}}") {
            Some(length) => {
                out.push_str(&rest[..start]);
                let expression = rest[start + 2..start + 2 + length].trim();
                out.push_str(&rt.evaluator.eval_display(expression, scope));
                rest = &rest[start + 2 + length + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
}

// =============================================================================
// Inputs and events
// =============================================================================

/// Assign declared inputs from attributes on the mount node. With a parent
/// instance the attribute value is an expression in the parent's scope; at
/// the root it is taken as a literal string.
fn assign_inputs(
    rt: &RuntimeInner,
    descriptor: &ComponentDescriptor,
    node: NodeId,
    instance: &InstanceRef,
    parent: Option<&InstanceRef>,
) {
    for input in &descriptor.inputs {
        let Some(raw) = rt.tree.borrow().attribute(node, input) else {
            continue;
        };
        match parent {
            Some(parent) => {
                let scope = Scope::new(parent.clone());
                match rt.evaluator.eval(&raw, &scope) {
                    Ok(value) => instance.set_property(input, value),
                    Err(eval_error) => warn!(
                        input = %input,
                        expression = %raw,
                        error = %eval_error,
                        "input expression failed, skipping assignment"
                    ),
                }
            }
            None => instance.set_property(input, Value::Str(raw)),
        }
    }
}

/// Scan the subtree for `(event)="method()"` attributes and attach
/// listeners invoking the named method on `instance`. A method the
/// instance does not expose is ignored silently at dispatch time.
fn bind_events(rt: &RuntimeInner, root: NodeId, instance: &InstanceRef) {
    let bindings: Vec<(NodeId, String, String)> = {
        let tree = rt.tree.borrow();
        let mut bindings = Vec::new();
        collect_event_bindings(&tree, root, &mut bindings);
        bindings
    };

    let mut tree = rt.tree.borrow_mut();
    for (node, event, method) in bindings {
        let instance = instance.clone();
        let listener: Listener = Rc::new(move |payload| {
            let _ = instance.invoke(&method, std::slice::from_ref(payload));
        });
        tree.add_listener(node, &event, listener);
    }
}

fn collect_event_bindings(tree: &Tree, node: NodeId, out: &mut Vec<(NodeId, String, String)>) {
    for child in tree.children(node) {
        for (name, value) in tree.attributes(child) {
            if let Some(event) = name.strip_prefix('(').and_then(|name| name.strip_suffix(')')) {
                let method = value.strip_suffix("()").unwrap_or(&value);
                out.push((child, event.to_string(), method.to_string()));
            }
        }
        collect_event_bindings(tree, child, out);
    }
}

// =============================================================================
// Recursive mount
// =============================================================================

/// Mount registered descriptors onto matching descendants, excluding the
/// component's own selector (no direct self-recursion) and nodes already
/// mounted. The current instance becomes the parent for input evaluation.
fn mount_children(rt: &Rc<RuntimeInner>, record: &Rc<MountRecord>) -> Result<()> {
    for child_descriptor in rt.child_descriptors(&record.descriptor.selector) {
        let matches = rt
            .tree
            .borrow()
            .query(record.node, &child_descriptor.selector);
        for child_node in matches {
            if rt.mounts.borrow().contains_key(&child_node) {
                continue;
            }
            mount(
                rt,
                child_descriptor.clone(),
                child_node,
                Some(record.instance.clone()),
            )?;
        }
    }
    Ok(())
}
