//! Error types shared by the bridge, the conversion layer and handlers
//!
//! The bridge distinguishes four kinds of failure:
//! - handler-reported failures (a falsy return) are not errors at all and map
//!   to the engine's "not supported" status;
//! - handler malfunctions ([`HandlerError`]) are reported to the diagnostic
//!   sink when the engine callback has no status channel;
//! - usage errors ([`BridgeError`]) are returned to the host caller;
//! - conversion errors ([`ConvertError`]) are returned by the conversion layer
//!   and translated by the caller into the nearest engine status.

use thiserror::Error;

/// Result type returned by handler methods.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Result type of the bridge's host-facing operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// A failure raised from inside a handler method.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    /// The handler explicitly raised an error.
    #[error("handler raised: {0}")]
    Raised(String),

    /// The handler panicked; the panic was caught at the bridge boundary.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Raised`].
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised(message.into())
    }
}

/// Errors produced while translating between host attributes and engine values.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConvertError {
    /// A host value has the wrong shape or does not fit the declared kind.
    #[error("type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    /// The attribute mapping carries no usable `value`.
    #[error("no value available")]
    MissingValue,

    /// A symbol is not a member of the enumeration it claims to belong to.
    #[error("unknown {family} value '{name}'")]
    UnknownEnumValue { family: String, name: String },

    /// A native type code outside the subset the bridge supports.
    #[error("unsupported native type code {0}")]
    UnsupportedNativeType(i64),

    /// An event mask that selects no events.
    #[error("event mask is empty")]
    EmptyEventMask,
}

impl ConvertError {
    pub(crate) fn mismatch(field: &'static str, expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field,
            expected,
            found: found.into(),
        }
    }
}

/// Errors reported synchronously to host code calling into the bridge.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("invalid PV name {0:?}")]
    InvalidName(String),

    /// A context capsule was used after its originating call returned, or
    /// for a different PV than the one it was issued for.
    #[error("context capsule is no longer valid")]
    InvalidContext,

    #[error("object is not a PV")]
    NotAPv,

    /// `post_event` on a PV that no server has attached yet.
    #[error("PV '{0}' is not attached to a server")]
    NotAttached(String),

    #[error("completion was already posted")]
    RedundantCompletion,

    #[error("invalid process timeout {0}")]
    InvalidTimeout(f64),

    /// Releasing the host lock from a nested acquisition would leave it held.
    #[error("host lock is held more than once by this thread")]
    NestedHostLock,

    #[error("engine is no longer running")]
    EngineGone,

    #[error("could not post events: {0}")]
    PostFailed(String),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}
