//! Decoded instruction snapshots.
//!
//! A `DecodedInstruction` is an immutable value: a byte change never edits
//! one in place, it produces a fresh snapshot through re-disassembly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::disassembler::RawInstruction;

/// One decoded instruction with its optional symbol label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedInstruction {
    /// Virtual address of the first byte
    pub address: u64,
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Mnemonic followed by operands, e.g. `mov rbp, rsp`
    pub text: String,
    /// Name of the function/object symbol starting at `address`
    pub symbol: Option<String>,
}

impl DecodedInstruction {
    pub fn from_raw(raw: RawInstruction, symbol: Option<String>) -> Self {
        let text = if raw.operands.is_empty() {
            raw.mnemonic
        } else {
            format!("{} {}", raw.mnemonic, raw.operands)
        };
        Self {
            address: raw.address,
            bytes: raw.bytes,
            text,
            symbol,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address of the byte following this instruction.
    pub fn end(&self) -> u64 {
        self.address + self.bytes.len() as u64
    }

    /// Mnemonic portion of the text.
    pub fn mnemonic(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }

    /// Bytes as space-separated lowercase hex, e.g. `48 89 e5`.
    pub fn hex_bytes(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}  {:<45}{}", self.address, self.hex_bytes(), self.text)
    }
}
