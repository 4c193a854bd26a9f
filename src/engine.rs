//! PatchEngine: the editing surface over one opened binary.
//!
//! Owns the memory image, the instruction cache, both codecs and the undo
//! log. Every mutating or cache-filling call takes `&mut self`, so one
//! engine serves one logical thread of control; front-ends that preview
//! edits concurrently put the engine behind a lock of their own.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::InstructionCache;
use crate::config::EditorConfig;
use crate::core::code_range::CodeSectionIndex;
use crate::core::disassembler::{Architecture, Assembler, CodecError, Disassembler};
use crate::core::instruction::DecodedInstruction;
use crate::core::symbols::SymbolTable;
use crate::disasm;
use crate::error::{PatchError, Result};
use crate::formats::elf::{load_elf, LoadedBinary};
use crate::image::MemoryImage;

/// Bytes a user write replaced, kept for undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub address: u64,
    pub original: Vec<u8>,
}

pub struct PatchEngine {
    path: PathBuf,
    image: MemoryImage,
    cache: InstructionCache,
    assembler: Box<dyn Assembler>,
    undo_log: Vec<PatchRecord>,
    entry: u64,
    architecture: Architecture,
    pub(crate) pad_with_nops: bool,
}

impl PatchEngine {
    /// Load the ELF file at `path` and pick codecs for its architecture.
    pub fn open(path: &Path, config: &EditorConfig) -> Result<Self> {
        config.validate()?;
        let binary = load_elf(path, config.page_size)?;
        let arch = binary.architecture;
        let disassembler = disasm::for_arch_with(arch, config.backend)
            .map_err(|e| PatchError::UnsupportedArchitecture(format!("{} ({})", arch, e)))?;
        debug!(%arch, backend = disassembler.name(), "Selected disassembler");
        let assembler = disasm::assembler_for(arch);
        Ok(Self::with_codecs(binary, Box::new(disassembler), assembler).with_config(config))
    }

    /// Build an engine over an already loaded binary with caller-supplied
    /// codecs.
    pub fn with_codecs(
        binary: LoadedBinary,
        disassembler: Box<dyn Disassembler>,
        assembler: Box<dyn Assembler>,
    ) -> Self {
        let LoadedBinary {
            path,
            image,
            code,
            symbols,
            entry,
            architecture,
        } = binary;
        Self {
            path,
            image,
            cache: InstructionCache::new(code, symbols, disassembler),
            assembler,
            undo_log: Vec::new(),
            entry,
            architecture,
            pad_with_nops: true,
        }
    }

    /// Apply the editing options of `config`. Call before the first lookup.
    pub fn with_config(mut self, config: &EditorConfig) -> Self {
        self.pad_with_nops = config.pad_with_nops;
        self.cache = self.cache.with_demangling(config.demangle_symbols);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn entry_address(&self) -> u64 {
        self.entry
    }

    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    pub fn code(&self) -> &CodeSectionIndex {
        self.cache.code()
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.cache.symbols()
    }

    pub fn disassembler_name(&self) -> &str {
        self.cache.disassembler().name()
    }

    pub fn assembler_name(&self) -> &str {
        self.assembler.name()
    }

    /// The decoded instruction starting at `address`.
    pub fn instruction_at(&mut self, address: u64) -> Option<DecodedInstruction> {
        self.cache.instruction_at(&self.image, address).cloned()
    }

    /// The instruction after the one at `address`.
    pub fn next(&mut self, address: u64) -> Result<Option<DecodedInstruction>> {
        Ok(self.cache.next(&self.image, address)?.cloned())
    }

    /// The instruction before the one at `address`.
    pub fn prev(&mut self, address: u64) -> Result<Option<DecodedInstruction>> {
        Ok(self.cache.prev(&self.image, address)?.cloned())
    }

    /// Overwrite memory at `address` with `data`, recording the replaced bytes
    /// for undo. The write may straddle segments and code ranges.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let original = self.image.read(address, data.len())?;
        self.undo_log.push(PatchRecord { address, original });
        self.write_through(address, data)?;
        debug!(
            address = %format_args!("{:#x}", address),
            len = data.len(),
            depth = self.undo_log.len(),
            "Recorded write"
        );
        Ok(())
    }

    /// Low-level write shared by `write` and `undo`: continues into the next
    /// segment whenever one fills up and drops every cached decode it touches.
    fn write_through(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let mut cursor = address;
        let mut remaining = data;
        while !remaining.is_empty() {
            let written = self.image.write(cursor, remaining)?;
            if written == 0 {
                return Err(PatchError::AddressUnmapped(cursor));
            }
            self.cache.invalidate_span(cursor, written as u64);
            cursor += written as u64;
            remaining = &remaining[written..];
        }
        Ok(())
    }

    /// Revert the most recent write. Returns false when there is nothing to
    /// undo.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(record) = self.undo_log.pop() else {
            return Ok(false);
        };
        self.write_through(record.address, &record.original)?;
        debug!(
            address = %format_args!("{:#x}", record.address),
            len = record.original.len(),
            depth = self.undo_log.len(),
            "Undid write"
        );
        Ok(true)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_log.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.image.is_dirty()
    }

    pub fn dirty_file_offsets(&self) -> Vec<u64> {
        self.image.dirty_file_offsets()
    }

    /// Write every edited byte back into the file the binary was loaded
    /// from. Returns the number of bytes written.
    pub fn save(&self) -> Result<usize> {
        self.save_to(&self.path)
    }

    /// Write every edited byte into the existing file at `path` at its
    /// original file offset. Nothing else in the file changes.
    pub fn save_to(&self, path: &Path) -> Result<usize> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let written = self.image.persist(&mut file)?;
        info!(path = %path.display(), bytes = written, "Saved edits");
        Ok(written)
    }

    /// Assemble `text` as if placed at `address`. None when the assembler
    /// rejects it or its brackets do not balance.
    pub fn assemble(&self, text: &str, address: u64) -> Option<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if !disasm::brackets_balanced(text) {
            debug!(text, "Rejected text with unbalanced brackets");
            return None;
        }
        match self.assembler.assemble(text, address) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(text, address = %format_args!("{:#x}", address), error = %e, "Assembly failed");
                None
            }
        }
    }

    /// Decode one instruction from the leading bytes of `bytes` placed at
    /// `address`. At most one maximal-length encoding is offered to the
    /// disassembler.
    pub fn decode_one(&self, bytes: &[u8], address: u64) -> Result<DecodedInstruction> {
        let failure = |reason: String| PatchError::Decode { address, reason };
        let window = &bytes[..bytes.len().min(self.architecture.max_instruction_length())];
        if window.is_empty() {
            return Err(failure("no bytes".into()));
        }
        let raw = self
            .cache
            .disassembler()
            .disassemble(window, address, 1)
            .map_err(|e| failure(e.to_string()))?;
        let first = raw
            .into_iter()
            .next()
            .ok_or_else(|| failure(CodecError::InvalidInstruction.to_string()))?;
        Ok(DecodedInstruction::from_raw(first, self.cache.label(address)))
    }

    /// Decode exactly one instruction from `bytes` placed at `address`.
    pub fn disassemble(&self, bytes: &[u8], address: u64) -> Option<DecodedInstruction> {
        match self.decode_one(bytes, address) {
            Ok(ins) => Some(ins),
            Err(e) => {
                debug!(error = %e, "Decode failed");
                None
            }
        }
    }

    /// Address of a function/object symbol.
    pub fn resolve_symbol(&self, name: &str) -> Option<u64> {
        self.symbols().address_of(name)
    }

    /// Symbol labelling `address`, if any.
    pub fn symbol_at(&self, address: u64) -> Option<&str> {
        self.symbols().name_at(address)
    }

    /// Turn user text into an address: `0x`-prefixed hex, a symbol name, or
    /// bare hex, in that order.
    pub fn resolve_location(&self, text: &str) -> Result<u64> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map_err(|e| PatchError::InvalidInput(format!("bad address {:?}: {}", text, e)));
        }
        if let Some(address) = self.resolve_symbol(text) {
            return Ok(address);
        }
        u64::from_str_radix(text, 16).map_err(|_| {
            PatchError::InvalidInput(format!("{:?} is neither an address nor a symbol", text))
        })
    }

    /// Up to `count` instructions starting with the one at `address`.
    pub fn listing_from(&mut self, address: u64, count: usize) -> Result<Vec<DecodedInstruction>> {
        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }
        let mut current = self
            .instruction_at(address)
            .ok_or(PatchError::UnknownAddress(address))?;
        loop {
            let at = current.address;
            out.push(current);
            if out.len() == count {
                break;
            }
            match self.next(at)? {
                Some(ins) => current = ins,
                None => break,
            }
        }
        Ok(out)
    }

    /// Up to `count` instructions ending with the one at `address`, in
    /// address order.
    pub fn listing_until(&mut self, address: u64, count: usize) -> Result<Vec<DecodedInstruction>> {
        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }
        let mut current = self
            .instruction_at(address)
            .ok_or(PatchError::UnknownAddress(address))?;
        loop {
            let at = current.address;
            out.push(current);
            if out.len() == count {
                break;
            }
            match self.prev(at)? {
                Some(ins) => current = ins,
                None => break,
            }
        }
        out.reverse();
        Ok(out)
    }

    /// The instruction at the entry point, falling back to the first
    /// decodable instruction of the image.
    pub fn first_instruction(&mut self) -> Option<DecodedInstruction> {
        if let Some(ins) = self.instruction_at(self.entry) {
            return Some(ins);
        }
        let starts: Vec<u64> = self.code().iter().map(|r| r.start).collect();
        for start in starts {
            if let Some(ins) = self.instruction_at(start) {
                return Some(ins);
            }
        }
        warn!("Image has no decodable code");
        None
    }
}
