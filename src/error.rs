//! Crate-wide error taxonomy.
//!
//! Three kinds of failure matter to callers:
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Format` | Data is meaningful but cannot be handled (bad depth, unknown compression, palette mismatch). Recoverable per object. |
//! | `Block` | Chunk framing was violated. Always a malformed or truncated file. |
//! | `Unsupported` | The operation makes sense but this backend does not implement it. |

use std::io;
use thiserror::Error;

use crate::stream::BlockError;

#[derive(Error, Debug)]
pub enum RwError {
    #[error("Format error: {0}")]
    Format(String),
    #[error("Block framing error: {0}")]
    Block(#[from] BlockError),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Registration error: {0}")]
    Registration(String),
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RwError {
    pub fn format(msg: impl Into<String>) -> Self {
        RwError::Format(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        RwError::Unsupported(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        RwError::Registration(msg.into())
    }

    /// Framing errors invalidate the enclosing stream; everything else only
    /// invalidates the object being built.
    pub fn is_framing(&self) -> bool {
        matches!(self, RwError::Block(_) | RwError::Io(_))
    }
}

pub type Result<T, E = RwError> = std::result::Result<T, E>;
