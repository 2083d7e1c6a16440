use std::io;
use thiserror::Error;

use crate::tag::ContainerKind;

/// Errors raised while building, reading or decoding a save tree.
#[derive(Debug, Error)]
pub enum SaveDataError {
    /// Typed access whose width disagrees with the stored payload.
    #[error("type mismatch: expected {expected} bytes, payload holds {found}")]
    TypeMismatch { expected: usize, found: usize },

    /// Operation not legal for the node's current container kind.
    #[error("cannot {op} on a {kind} node")]
    InvalidOperation {
        op: &'static str,
        kind: ContainerKind,
    },

    /// A container, key or payload went past its hard cap.
    #[error("{what} limit of {limit} exceeded")]
    LimitExceeded { what: &'static str, limit: u64 },

    /// Malformed input during decode.
    #[error("corrupt data at byte {offset}: {reason}")]
    CorruptData { offset: usize, reason: &'static str },

    /// Use of a reserved, unimplemented feature.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SaveDataError {
    pub(crate) fn invalid(op: &'static str, kind: ContainerKind) -> Self {
        SaveDataError::InvalidOperation { op, kind }
    }

    pub(crate) fn corrupt(offset: usize, reason: &'static str) -> Self {
        SaveDataError::CorruptData { offset, reason }
    }
}

pub type Result<T> = std::result::Result<T, SaveDataError>;
