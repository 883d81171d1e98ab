// error.rs - error type for vmap file loading and map management

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VMapError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of file")]
    Truncated,

    #[error("chunk mismatch: expected {expected:?}, found {found:?}")]
    ChunkMismatch { expected: String, found: String },

    #[error("model file name too long ({0} bytes)")]
    NameTooLong(u32),

    #[error("corrupt BIH: {0}")]
    CorruptTree(String),

    #[error("corrupt model data: {0}")]
    CorruptModel(String),

    #[error("map {0} is not initialized")]
    TreeNotInitialized(u32),

    #[error("tree slot {slot} out of range ({count} slots)")]
    InvalidTreeSlot { slot: u32, count: usize },

    #[error("could not load model '{0}'")]
    ModelNotLoaded(String),
}

impl VMapError {
    /// Maps a short read onto `Truncated`, anything else stays an I/O error.
    pub fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            VMapError::Truncated
        } else {
            VMapError::Io(err)
        }
    }
}

pub type VMapResult<T> = Result<T, VMapError>;
