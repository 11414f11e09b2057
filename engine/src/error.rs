//! Error types for the hubsync engine.

use crate::{EntityKind, EntityRef, RemoteId};
use thiserror::Error;

/// Failures reported by a [`Downloader`](crate::Downloader) or
/// [`Uploader`](crate::Uploader).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network, auth or rate-limit failure. Not retried by the engine.
    #[error("request failed: {0}")]
    Request(String),

    /// The remote service reported an internal error of its own.
    #[error("remote API for \"{service}\" had internal error")]
    UpstreamInternal { service: String },

    /// The upstream payload could not be understood. Never retryable.
    #[error("malformed upstream payload: {message}")]
    MalformedPayload { message: String, attachment: String },
}

impl TransportError {
    /// Whether a caller may reasonably try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Request(_) | TransportError::UpstreamInternal { .. }
        )
    }

    /// Raw payload attached to the failure, if any.
    pub fn attachment(&self) -> Option<&str> {
        match self {
            TransportError::MalformedPayload { attachment, .. } => Some(attachment),
            _ => None,
        }
    }
}

/// All possible errors from the hubsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    // Consistency faults
    #[error("couldn't find {kind} with id {id} while linking associations")]
    UnresolvedAssociation { kind: EntityKind, id: RemoteId },

    #[error("couldn't match created {kind} to the creation response ({matches} matches)")]
    CreationMismatch {
        kind: EntityKind,
        matches: usize,
        attachment: String,
    },

    // Lookup errors
    #[error("expected to find {kind} with id {id}")]
    UnknownRemoteId { kind: EntityKind, id: RemoteId },

    #[error("entity not found: {0}")]
    EntityNotFound(EntityRef),

    #[error("no manager registered for kind: {0}")]
    UnknownKind(String),

    #[error("malformed association descriptor: {0}")]
    InvalidAssociation(String),

    // Validation errors
    #[error("unknown property for {kind}: {property}")]
    UnknownProperty { kind: EntityKind, property: String },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

impl Error {
    /// Consistency faults mean the input data violated engine invariants.
    /// There is no safe local recovery from them.
    pub fn is_consistency_fault(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedAssociation { .. } | Error::CreationMismatch { .. }
        )
    }

    /// Diagnostic payload attached to the failure, if any.
    pub fn attachment(&self) -> Option<&str> {
        match self {
            Error::CreationMismatch { attachment, .. } => Some(attachment),
            Error::Transport(e) => e.attachment(),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
