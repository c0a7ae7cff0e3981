//! Crate-level error taxonomy.
//!
//! Compile-time and mount-time failures are fatal and surfaced to the
//! caller; per-expression evaluation failures never reach this enum - they
//! are swallowed at the evaluation site and degrade to a default (see
//! [`crate::expr::EvalError`]). There is no retry logic anywhere.

use thiserror::Error;

use crate::template::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed directive structure. Aborts the compile for that
    /// template and any mount that needed it.
    #[error("template parse failed: {0}")]
    Parse(#[from] ParseError),

    /// The resolver has no provider registered under the requested name.
    /// Aborts the mount that declared the dependency.
    #[error("dependency '{name}' is not registered")]
    DependencyNotFound { name: String },

    /// Bootstrap's target selector matched no node in the host tree.
    #[error("no node matches root selector '{selector}'")]
    RootNotFound { selector: String },
}

pub type Result<T> = std::result::Result<T, Error>;
