//! Error types for the capability runtime and the composition engine.

use thiserror::Error;

use crate::guid::Guid;

/// Failure reported by a host object.
///
/// Host implementations return these from every fallible call; the engine
/// folds them into [`ImeError::HostInconsistency`] unless a more specific
/// kind applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("invalid argument")]
    InvalidArg,

    /// The edit cookie is not the one currently granted, or it is read-only.
    #[error("edit cookie does not hold the required lock")]
    NoLock,

    /// The document is locked and cannot grant a session now.
    #[error("document is locked")]
    Locked,

    /// The composition handle was already terminated.
    #[error("composition is no longer active")]
    NoComposition,

    #[error("not implemented by the host")]
    NotImplemented,

    #[error("{0}")]
    Failed(String),
}

/// Errors produced by the engine and the capability runtime.
///
/// No variant is fatal: after any of them the engine is left in a valid
/// state and can keep serving the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImeError {
    /// A capability query missed. Callers usually fall back or no-op.
    #[error("capability {0} is not supported")]
    NoSuchCapability(Guid),

    /// The host refused to grant an edit session.
    #[error("host declined the edit session")]
    SessionDenied,

    /// The caret is outside the composition range.
    #[error("selection is outside the composition range")]
    InsertionNotAllowed,

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A host call that should have succeeded failed.
    #[error("host call failed: {0}")]
    HostInconsistency(#[from] HostError),
}

/// Result alias used across the crate.
pub type Result<T, E = ImeError> = std::result::Result<T, E>;

/// Result alias for host-side calls.
pub type HostResult<T> = std::result::Result<T, HostError>;
