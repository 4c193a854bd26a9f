//! Instruction-level edits and live previews built on `PatchEngine::write`.

use serde::Serialize;
use tracing::{info, warn};

use crate::core::disassembler::Architecture;
use crate::core::instruction::DecodedInstruction;
use crate::engine::PatchEngine;
use crate::error::{PatchError, Result};

/// Parse user hex such as `48 89 e5` or `4889e5`.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    if compact.is_empty() {
        return Err(PatchError::InvalidInput("no bytes given".into()));
    }
    hex::decode(&compact).map_err(|e| PatchError::InvalidInput(format!("{:?}: {}", text, e)))
}

/// `len` bytes of NOP filler for `arch`. None when `len` is not a whole
/// number of NOP encodings (any odd length on AArch64).
pub fn nop_fill(arch: Architecture, len: usize) -> Option<Vec<u8>> {
    let nop = arch.nop();
    if len % nop.len() != 0 {
        return None;
    }
    Some(nop.repeat(len / nop.len()))
}

/// What a patch wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub address: u64,
    /// Everything written, padding included
    pub bytes: Vec<u8>,
    /// Length of the instruction that was at `address`, 0 if none
    pub replaced: usize,
    /// NOP bytes appended to fill the replaced instruction
    pub padding: usize,
    /// Bytes written past the end of the replaced instruction
    pub spill: usize,
}

/// How newly assembled text compares with the instruction it would replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AssemblyPreview {
    /// Same encoding as the current instruction
    Unchanged,
    /// Fits in the current instruction; `bytes` includes `padding` NOP bytes
    Fits { bytes: Vec<u8>, padding: usize },
    /// Longer than the current instruction
    Overflows { fitting: Vec<u8>, spill: Vec<u8> },
}

/// One instruction decoded from user bytes, plus what it left over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BytePreview {
    pub instruction: DecodedInstruction,
    pub leftover: Vec<u8>,
}

impl PatchEngine {
    fn padded(&self, mut bytes: Vec<u8>, target: usize) -> (Vec<u8>, usize) {
        if !self.pad_with_nops || bytes.len() >= target {
            return (bytes, 0);
        }
        let padding = target - bytes.len();
        match nop_fill(self.architecture(), padding) {
            Some(fill) => {
                bytes.extend(fill);
                (bytes, padding)
            }
            None => {
                warn!(padding, "Gap is not a whole number of NOPs; leaving it unpadded");
                (bytes, 0)
            }
        }
    }

    /// Replace the instruction at `address` with assembled `text`.
    pub fn patch_instruction(&mut self, address: u64, text: &str) -> Result<PatchOutcome> {
        let current = self
            .instruction_at(address)
            .ok_or(PatchError::UnknownAddress(address))?;
        let assembled = self.assemble(text, address).ok_or_else(|| {
            PatchError::Encode(format!("{:?} does not assemble at {:#x}", text, address))
        })?;
        let (bytes, padding) = self.padded(assembled, current.len());
        self.write(address, &bytes)?;

        let spill = bytes.len().saturating_sub(current.len());
        info!(
            address = %format_args!("{:#x}", address),
            old = %current.text,
            new = text,
            padding,
            spill,
            "Patched instruction"
        );
        Ok(PatchOutcome {
            address,
            bytes,
            replaced: current.len(),
            padding,
            spill,
        })
    }

    /// Replace the instruction at `address` with NOPs of the same length.
    pub fn nop_instruction(&mut self, address: u64) -> Result<PatchOutcome> {
        let current = self
            .instruction_at(address)
            .ok_or(PatchError::UnknownAddress(address))?;
        let bytes = nop_fill(self.architecture(), current.len()).ok_or_else(|| {
            PatchError::Encode(format!(
                "{}-byte instruction at {:#x} cannot be filled with NOPs",
                current.len(),
                address
            ))
        })?;
        self.write(address, &bytes)?;
        info!(
            address = %format_args!("{:#x}", address),
            old = %current.text,
            "Replaced instruction with NOPs"
        );
        Ok(PatchOutcome {
            address,
            padding: bytes.len(),
            bytes,
            replaced: current.len(),
            spill: 0,
        })
    }

    /// Write raw bytes given as hex text.
    pub fn patch_bytes(&mut self, address: u64, hex_text: &str) -> Result<PatchOutcome> {
        let bytes = parse_hex_bytes(hex_text)?;
        let replaced = self.instruction_at(address).map_or(0, |ins| ins.len());
        self.write(address, &bytes)?;
        let spill = if replaced == 0 {
            0
        } else {
            bytes.len().saturating_sub(replaced)
        };
        info!(
            address = %format_args!("{:#x}", address),
            len = bytes.len(),
            "Patched bytes"
        );
        Ok(PatchOutcome {
            address,
            bytes,
            replaced,
            padding: 0,
            spill,
        })
    }

    /// Classify what `text` would do to the instruction at `address` without
    /// writing anything. None when there is no instruction there or the text
    /// does not assemble.
    pub fn preview_assembly(&mut self, address: u64, text: &str) -> Option<AssemblyPreview> {
        let current = self.instruction_at(address)?;
        let assembled = self.assemble(text, address)?;
        if assembled == current.bytes {
            return Some(AssemblyPreview::Unchanged);
        }
        if assembled.len() <= current.len() {
            let (bytes, padding) = self.padded(assembled, current.len());
            return Some(AssemblyPreview::Fits { bytes, padding });
        }
        let mut fitting = assembled;
        let spill = fitting.split_off(current.len());
        Some(AssemblyPreview::Overflows { fitting, spill })
    }

    /// Decode one instruction from hex text as if placed at `address`.
    pub fn preview_bytes(&self, address: u64, hex_text: &str) -> Option<BytePreview> {
        let bytes = parse_hex_bytes(hex_text).ok()?;
        let instruction = self.disassemble(&bytes, address)?;
        let leftover = bytes.get(instruction.len()..).unwrap_or_default().to_vec();
        Some(BytePreview {
            instruction,
            leftover,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_bytes("48 89 e5").unwrap(), vec![0x48, 0x89, 0xe5]);
        assert_eq!(parse_hex_bytes(" 90\t90 ").unwrap(), vec![0x90, 0x90]);
        assert_eq!(parse_hex_bytes("C3").unwrap(), vec![0xc3]);
        assert!(parse_hex_bytes("").is_err());
        assert!(parse_hex_bytes("9").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn nop_fill_cycles_encoding() {
        assert_eq!(nop_fill(Architecture::X86_64, 3), Some(vec![0x90; 3]));
        assert_eq!(
            nop_fill(Architecture::ARM64, 8),
            Some(vec![0x1f, 0x20, 0x03, 0xd5, 0x1f, 0x20, 0x03, 0xd5])
        );
        assert_eq!(nop_fill(Architecture::X86, 0), Some(Vec::new()));
    }

    #[test]
    fn nop_fill_refuses_partial_arm64_nops() {
        assert_eq!(nop_fill(Architecture::ARM64, 2), None);
        assert_eq!(nop_fill(Architecture::ARM64, 6), None);
        assert_eq!(nop_fill(Architecture::ARM64, 0), Some(Vec::new()));
    }
}
