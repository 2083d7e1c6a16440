use std::io;
use std::path::PathBuf;

use save_data::{RefHandle, SaveDataError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BigSaveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Data(#[from] SaveDataError),

    #[error("Invalid BigSave magic")]
    InvalidMagic,

    #[error("Unsupported BigSave version {0}")]
    InvalidVersion(u16),

    #[error("Merkle hash mismatch")]
    HashMismatch,

    #[error("reference {0} does not resolve to a live node")]
    DanglingReference(RefHandle),

    #[error("reference {0} points back into itself")]
    ReferenceCycle(RefHandle),

    #[error("no tree named {0:?}")]
    MissingTree(String),

    #[error("invalid subfile name {0:?}")]
    InvalidSubfileName(String),

    #[error("subfile {0:?} has a reference table of its own")]
    SubfileOwnsReferences(PathBuf),

    #[error("references of a subfile live in its root container")]
    ForeignReferences,

    #[error("chunk size must be non-zero")]
    InvalidChunkSize,

    #[error("big save is not open")]
    NotOpen,
}

impl BigSaveError {
    pub(crate) fn corrupt(offset: usize, reason: &'static str) -> Self {
        BigSaveError::Data(SaveDataError::CorruptData { offset, reason })
    }
}

pub type Result<T> = std::result::Result<T, BigSaveError>;
