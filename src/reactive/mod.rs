//! Reactive Core - Signals, effects, and derived values.
//!
//! Fine-grained dependency tracking: [`Signal`]s are observable cells,
//! [`effect`]s are re-run closures whose signal reads are recorded as
//! dependencies, and [`derived`]s are memoized computations built from both.
//!
//! # Tracking model
//!
//! ```text
//! Signal::get  ──(while an effect runs)──▶ subscribe(effect)
//! Signal::set  ──(value changed)─────────▶ notify ▶ effect re-runs
//! effect re-run ─▶ drop stale subscriptions ▶ execute ▶ fresh subscriptions
//! ```
//!
//! After any run, an effect's recorded dependencies are exactly the signals
//! it read during that run - nothing stale, nothing missing.
//!
//! # Execution model
//!
//! Everything is single-threaded and synchronous: `set` runs every subscriber
//! to completion before it returns, one full notify pass per changed write.
//! A trigger that lands on an effect which is already running is serialized -
//! the effect re-runs once after the current pass finishes, never recursively.

mod derived;
mod effect;
mod signal;

pub use derived::{Derived, derived};
pub use effect::{EffectHandle, effect, untracked};
pub use signal::{Signal, signal, signal_with};
