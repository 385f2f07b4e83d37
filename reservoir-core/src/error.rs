//! Error Types
//!
//! Failures fall into four families:
//!
//! - Evaluation failures (`Evaluation`): an expression could not be run. These
//!   are recorded to the error log and the directive that asked for the value
//!   is skipped. Hydration of the element continues.
//! - Malformed directives (`MalformedDirective`, `BindTarget`): a directive
//!   attribute is missing a required part. Processing of the offending element
//!   (and its subtree) stops for the current pass.
//! - Storage failures (`StorageParse`, `Storage`): persisted state could not be
//!   read or written. Recovered locally by treating the persisted state as empty.
//! - Collaborator failures (`AssetLoad`): reported by external helpers, logged
//!   as warnings.

use thiserror::Error;

use crate::expr::EvalError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A directive attribute is missing a required part or is syntactically invalid.
    #[error("malformed directive `{attribute}`: {reason}")]
    MalformedDirective { attribute: String, reason: String },

    /// A two-way binding was declared on an element without a value property.
    #[error("cannot bind to <{tag}>: element has no value property")]
    BindTarget { tag: String },

    /// A dot-path lookup in the store hit a missing key.
    #[error("key `{0}` not found in reservoir")]
    KeyNotFound(String),

    /// A `foreach` expression produced something other than an array.
    #[error("foreach `{directive}` value is not an array: {found}")]
    NotIterable { directive: String, found: String },

    /// An expression failed to evaluate.
    #[error(transparent)]
    Evaluation(#[from] EvalError),

    /// The persisted blob was malformed or not a plain object.
    #[error("failed to parse persisted state: {0}")]
    StorageParse(String),

    /// The durable storage backend failed.
    #[error("storage I/O failed: {0}")]
    Storage(#[from] std::io::Error),

    /// A component tag was registered twice.
    #[error("component `{0}` already exists")]
    DuplicateComponent(String),

    /// Component tags must contain a dash.
    #[error("component name `{0}` must contain a dash")]
    InvalidComponentName(String),

    /// An external asset helper failed to fetch something.
    #[error("failed to load asset `{uri}`: {reason}")]
    AssetLoad { uri: String, reason: String },

    /// State kept changing on every pass and the drain loop gave up.
    #[error("hydration did not settle after {passes} passes")]
    Unsettled { passes: usize },
}

impl Error {
    /// Shorthand for building a [`Error::MalformedDirective`].
    pub fn malformed(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDirective {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error aborts processing of the element that raised it.
    pub fn is_malformed_directive(&self) -> bool {
        matches!(self, Self::MalformedDirective { .. } | Self::BindTarget { .. })
    }
}
