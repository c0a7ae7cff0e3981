//! Expression Evaluator - embedded expressions over a scope chain.
//!
//! Templates embed expressions in interpolations (`{{ count.get() * 2 }}`),
//! directive headers (`@if[items.length > 0]`), and input attributes. This
//! module evaluates them with an explicit interpreter: a hand-written lexer
//! and recursive-descent parser over a small host-independent grammar,
//! executed against a scope chain of loop-bound locals overlaid on the
//! component instance's properties and methods.
//!
//! # Grammar
//!
//! ```text
//! or          := and ( '||' and )*
//! and         := equality ( '&&' equality )*
//! equality    := comparison ( ('==' | '!=') comparison )*
//! comparison  := additive ( ('<' | '<=' | '>' | '>=') additive )*
//! additive    := multiplicative ( ('+' | '-') multiplicative )*
//! multiplicative := unary ( ('*' | '/' | '%') unary )*
//! unary       := ('!' | '-') unary | postfix
//! postfix     := primary ( '.' ident | '?.' ident | '[' expr ']' | '(' args ')' )*
//! primary     := number | string | 'true' | 'false' | 'null' | 'this'
//!              | ident | '(' expr ')'
//! ```
//!
//! # Failure semantics
//!
//! A failed evaluation never aborts the surrounding render. The
//! [`Evaluator`]'s context-specific entry points catch every [`EvalError`],
//! log it, and substitute the context's default: empty string for an
//! interpolation, `false` for a condition, an empty list for a loop source.

mod eval;
mod lexer;
mod parser;
mod value;

use thiserror::Error;

pub use eval::{Evaluator, Scope};
pub use value::Value;

/// Any failure lexing, parsing, or evaluating an embedded expression.
///
/// Recovered locally at every evaluation site - degrades to a default,
/// never crosses the render boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{found}'")]
    UnexpectedToken { found: String },

    #[error("'{name}' is not defined")]
    Undefined { name: String },

    #[error("cannot read '{property}' of null")]
    PropertyOfNull { property: String },

    #[error("no property '{property}' on {kind} value")]
    UnknownProperty { property: String, kind: &'static str },

    #[error("no method '{method}' on the target")]
    UnknownMethod { method: String },

    #[error("expression is not callable")]
    NotCallable,

    #[error("invalid operands for '{op}'")]
    InvalidOperands { op: &'static str },

    #[error("division by zero")]
    DivisionByZero,
}
