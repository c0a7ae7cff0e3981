//! # weft
//!
//! Reactive component runtime for Rust.
//!
//! Declarative component descriptors - a markup template plus bound state -
//! become a live, self-updating render tree. Fine-grained signals drive
//! re-renders; inline `@if` / `@for` directives and `{{ }}` interpolations
//! bind the template to component state.
//!
//! ## Architecture
//!
//! ```text
//! ComponentDescriptor → mount → instance (DI) → render effect
//!        template → directive tree (compiled once, cached)
//!        each pass: evaluate expressions → markup → replace content
//!                   (child component subtrees relocated, not rebuilt)
//! ```
//!
//! ## Modules
//!
//! - [`reactive`] - signals, effects, derived values
//! - [`template`] - directive compiler (tokenizer + recursive-descent parser)
//! - [`expr`] - expression interpreter over a scope chain
//! - [`rtree`] - render tree arena (the host surface)
//! - [`runtime`] - render pipeline, descriptor registry, dependency resolver
//! - [`error`] - crate error taxonomy
//!
//! ## Example
//!
//! ```ignore
//! use weft::{ComponentDescriptor, DynamicInstance, Runtime, Value, signal};
//!
//! let rt = Runtime::new();
//! let app = rt.with_tree(|tree| {
//!     let app = tree.create_element("div");
//!     tree.set_attribute(app, "id", "app");
//!     let root = tree.root();
//!     tree.append_child(root, app);
//!     app
//! });
//!
//! let descriptor = rt.register_descriptor(ComponentDescriptor::new(
//!     "#app",
//!     "<p>Count: {{count.get()}}</p>\
//!      <button (click)=\"increment()\">+</button>",
//!     |_deps| {
//!         let count = signal(Value::Number(0.0));
//!         let count_inc = count.clone();
//!         DynamicInstance::new()
//!             .with_property("count", Value::Signal(count))
//!             .with_method("increment", move |_| {
//!                 let Value::Number(n) = count_inc.get_untracked() else {
//!                     return Value::Null;
//!                 };
//!                 count_inc.set(Value::Number(n + 1.0));
//!                 Value::Null
//!             })
//!             .into_ref()
//!     },
//! ));
//!
//! rt.bootstrap(&descriptor)?;
//! // Any click dispatched on the button re-renders synchronously.
//! ```

pub mod error;
pub mod expr;
pub mod reactive;
pub mod rtree;
pub mod runtime;
pub mod template;

// Re-export commonly used items
pub use error::{Error, Result};

pub use reactive::{
    Derived, EffectHandle, Signal, derived, effect, signal, signal_with, untracked,
};

pub use template::{DirectiveNode, ParseError, compile};

pub use expr::{EvalError, Evaluator, Scope, Value};

pub use rtree::{Listener, NodeId, Tree};

pub use runtime::{ComponentDescriptor, DynamicInstance, Instance, InstanceRef, Runtime};
