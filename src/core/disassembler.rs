//! Codec capability traits and error types.
//!
//! The disassembler and assembler engines are opaque text/bytes translators.
//! `Disassembler` and `Assembler` are the narrow seams any backend library
//! satisfies per architecture.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors reported by codec backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bytes do not decode to an instruction
    InvalidInstruction,
    /// Text does not assemble
    InvalidSyntax(String),
    /// Backend cannot serve this architecture
    UnsupportedArchitecture,
    /// No backend compiled in for this direction
    Unavailable(&'static str),
    /// Internal backend error with message
    InternalError(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidInstruction => write!(f, "InvalidInstruction"),
            CodecError::InvalidSyntax(msg) => write!(f, "InvalidSyntax: {}", msg),
            CodecError::UnsupportedArchitecture => write!(f, "UnsupportedArchitecture"),
            CodecError::Unavailable(what) => write!(f, "Unavailable: {}", what),
            CodecError::InternalError(msg) => write!(f, "InternalError: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Architecture families the editor supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// x86 (32-bit)
    X86,
    /// x86-64 (64-bit)
    X86_64,
    /// ARM64/AArch64 (64-bit)
    ARM64,
}

impl Architecture {
    /// Longest possible instruction encoding
    pub fn max_instruction_length(&self) -> usize {
        match self {
            Architecture::X86 | Architecture::X86_64 => 15,
            Architecture::ARM64 => 4,
        }
    }

    /// Canonical single NOP encoding used to pad patches
    pub fn nop(&self) -> &'static [u8] {
        match self {
            Architecture::X86 | Architecture::X86_64 => &[0x90],
            Architecture::ARM64 => &[0x1f, 0x20, 0x03, 0xd5],
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::ARM64 => write!(f, "arm64"),
        }
    }
}

/// Backend output for one instruction, before symbol attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    pub address: u64,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
}

/// Bytes to instructions.
pub trait Disassembler {
    /// Decode instructions from `bytes` placed at `address`.
    ///
    /// `max_count == 0` decodes as many as fit in the buffer, stopping at the
    /// first undecodable byte sequence; `max_count == 1` decodes exactly one
    /// and fails if it cannot.
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>>;

    fn architecture(&self) -> Architecture;

    fn name(&self) -> &str;
}

/// Text to bytes.
pub trait Assembler {
    /// Assemble `text` as if placed at `address`.
    fn assemble(&self, text: &str, address: u64) -> CodecResult<Vec<u8>>;

    fn architecture(&self) -> Architecture;

    fn name(&self) -> &str;
}
