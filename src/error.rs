//! Error types for the elfpatch binary editor.
//!
//! Codec rejections (`Decode`, `Encode`) are ordinary outcomes of interactive
//! editing; the engine's preview and assemble helpers turn them into `None`. Address
//! errors signal that the caller passed an address it should never have and
//! are returned as values so a front-end can report them and carry on.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for elfpatch operations.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Read or write target is not backed by any loaded segment
    #[error("Address {0:#x} is not mapped by any loaded segment")]
    AddressUnmapped(u64),

    /// Navigation from an address this cache never produced
    #[error("No decoded instruction is known at {0:#x}")]
    UnknownAddress(u64),

    /// Disassembler rejected the bytes
    #[error("Decode failure at {address:#x}: {reason}")]
    Decode { address: u64, reason: String },

    /// Assembler rejected the text
    #[error("Encode failure: {0}")]
    Encode(String),

    /// File missing or not a loadable image
    #[error("Failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// Machine type outside the supported families
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Malformed user input (hex strings, configuration)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PatchError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PatchError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for elfpatch operations
pub type Result<T> = std::result::Result<T, PatchError>;
