//! InstructionCache: lazy per-section disassembly and the address index.
//!
//! Each code range is decoded in full the first time anything inside it is
//! asked for. The address index maps every decoded start address to its
//! section and position; it is kept in lockstep with the section cache, so
//! dropping a section drops its index entries in the same call.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::code_range::{CodeRange, CodeSectionIndex};
use crate::core::disassembler::{Architecture, Disassembler};
use crate::core::instruction::DecodedInstruction;
use crate::core::symbols::SymbolTable;
use crate::demangle;
use crate::error::{PatchError, Result};
use crate::image::MemoryView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    section: u64,
    position: usize,
}

pub struct InstructionCache {
    code: CodeSectionIndex,
    symbols: SymbolTable,
    disassembler: Box<dyn Disassembler>,
    demangle: bool,
    sections: HashMap<u64, Vec<DecodedInstruction>>,
    index: HashMap<u64, IndexEntry>,
}

impl InstructionCache {
    pub fn new(
        code: CodeSectionIndex,
        symbols: SymbolTable,
        disassembler: Box<dyn Disassembler>,
    ) -> Self {
        Self {
            code,
            symbols,
            disassembler,
            demangle: false,
            sections: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// Label instructions with demangled symbol names.
    pub fn with_demangling(mut self, enabled: bool) -> Self {
        self.demangle = enabled;
        self
    }

    pub fn code(&self) -> &CodeSectionIndex {
        &self.code
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn disassembler(&self) -> &dyn Disassembler {
        self.disassembler.as_ref()
    }

    pub fn architecture(&self) -> Architecture {
        self.disassembler.architecture()
    }

    /// Whether the section starting at `start` is currently decoded.
    pub fn is_cached(&self, start: u64) -> bool {
        self.sections.contains_key(&start)
    }

    /// Number of addresses in the index.
    pub fn indexed_len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn label(&self, address: u64) -> Option<String> {
        let name = self.symbols.name_at(address)?;
        Some(if self.demangle {
            demangle::display_name(name)
        } else {
            name.to_string()
        })
    }

    fn decode_range(&self, mem: &dyn MemoryView, range: CodeRange) -> Vec<DecodedInstruction> {
        let Ok(len) = usize::try_from(range.length) else {
            warn!(range = %range, "Code range too large to decode");
            return Vec::new();
        };
        let bytes = match mem.read_bytes(range.start, len) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(range = %range, error = %e, "Code range is not readable");
                return Vec::new();
            }
        };
        match self.disassembler.disassemble(&bytes, range.start, 0) {
            Ok(raw) => raw
                .into_iter()
                .map(|r| {
                    let symbol = self.label(r.address);
                    DecodedInstruction::from_raw(r, symbol)
                })
                .collect(),
            Err(e) => {
                warn!(range = %range, error = %e, "Code range did not decode");
                Vec::new()
            }
        }
    }

    /// Decode the section starting at `start` unless it is already cached.
    fn fill(&mut self, mem: &dyn MemoryView, start: u64) -> Result<()> {
        let pos = self
            .code
            .position_of(start)
            .ok_or(PatchError::UnknownAddress(start))?;
        if self.sections.contains_key(&start) {
            return Ok(());
        }
        let range = *self
            .code
            .get(pos)
            .ok_or(PatchError::UnknownAddress(start))?;
        let decoded = self.decode_range(mem, range);
        for (position, ins) in decoded.iter().enumerate() {
            self.index.insert(
                ins.address,
                IndexEntry {
                    section: start,
                    position,
                },
            );
        }
        debug!(
            range = %range,
            instructions = decoded.len(),
            "Decoded code range"
        );
        self.sections.insert(start, decoded);
        Ok(())
    }

    /// The decoded instructions of the code range starting at `start`.
    ///
    /// A range that cannot be read or decoded yields an empty slice. `start`
    /// must be the exact start of a code range.
    pub fn get_section(&mut self, mem: &dyn MemoryView, start: u64) -> Result<&[DecodedInstruction]> {
        self.fill(mem, start)?;
        Ok(self.sections.get(&start).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Drop the cached decode of the section at `start` together with every
    /// index entry it produced. Returns whether anything was cached.
    pub fn invalidate(&mut self, start: u64) -> bool {
        let Some(decoded) = self.sections.remove(&start) else {
            return false;
        };
        for ins in &decoded {
            if self.index.get(&ins.address).map(|e| e.section) == Some(start) {
                self.index.remove(&ins.address);
            }
        }
        debug!(
            start = %format_args!("{:#x}", start),
            dropped = decoded.len(),
            "Invalidated code range"
        );
        true
    }

    /// Invalidate every section sharing a byte with `[address, address + len)`.
    pub fn invalidate_span(&mut self, address: u64, len: u64) {
        let starts: Vec<u64> = self
            .code
            .intersecting(address, len)
            .map(|r| r.start)
            .collect();
        for start in starts {
            self.invalidate(start);
        }
    }

    /// Index hit for `address`, checked against the live section.
    fn indexed(&self, address: u64) -> Option<(u64, usize)> {
        let entry = self.index.get(&address)?;
        let decoded = self.sections.get(&entry.section)?;
        (decoded.get(entry.position)?.address == address).then_some((entry.section, entry.position))
    }

    fn entry(&self, section: u64, position: usize) -> Option<&DecodedInstruction> {
        self.sections.get(&section)?.get(position)
    }

    fn section_len(&self, section: u64) -> usize {
        self.sections.get(&section).map_or(0, Vec::len)
    }

    /// The instruction starting at `address`, decoding its section on demand.
    /// None when `address` is outside every code range or is not the start of
    /// a decoded instruction.
    pub fn instruction_at(
        &mut self,
        mem: &dyn MemoryView,
        address: u64,
    ) -> Option<&DecodedInstruction> {
        let (section, position) = match self.indexed(address) {
            Some(hit) => hit,
            None => {
                let idx = self.code.section_for(address)?;
                let start = self.code.get(idx)?.start;
                if let Err(e) = self.fill(mem, start) {
                    warn!(error = %e, "Code range lookup failed");
                    return None;
                }
                self.indexed(address)?
            }
        };
        self.entry(section, position)
    }

    /// Index position of an instruction the cache has produced, re-deriving
    /// it if its section was invalidated since.
    fn locate_known(&mut self, mem: &dyn MemoryView, address: u64) -> Result<(u64, usize)> {
        if let Some(hit) = self.indexed(address) {
            return Ok(hit);
        }
        if self.instruction_at(mem, address).is_some() {
            if let Some(hit) = self.indexed(address) {
                return Ok(hit);
            }
        }
        Err(PatchError::UnknownAddress(address))
    }

    /// The instruction following the one at `address`, crossing into later
    /// code ranges as needed. None after the last instruction of the image.
    pub fn next(
        &mut self,
        mem: &dyn MemoryView,
        address: u64,
    ) -> Result<Option<&DecodedInstruction>> {
        let (section, position) = self.locate_known(mem, address)?;
        if position + 1 < self.section_len(section) {
            return Ok(self.entry(section, position + 1));
        }

        let mut idx = self
            .code
            .position_of(section)
            .ok_or(PatchError::UnknownAddress(address))?;
        while let Some(after) = self.code.range_after(idx) {
            let start = match self.code.get(after) {
                Some(range) => range.start,
                None => break,
            };
            self.fill(mem, start)?;
            if self.section_len(start) > 0 {
                return Ok(self.entry(start, 0));
            }
            idx = after;
        }
        Ok(None)
    }

    /// The instruction preceding the one at `address`, crossing into earlier
    /// code ranges as needed. None before the first instruction of the image.
    pub fn prev(
        &mut self,
        mem: &dyn MemoryView,
        address: u64,
    ) -> Result<Option<&DecodedInstruction>> {
        let (section, position) = self.locate_known(mem, address)?;
        if position > 0 {
            return Ok(self.entry(section, position - 1));
        }

        let mut idx = self
            .code
            .position_of(section)
            .ok_or(PatchError::UnknownAddress(address))?;
        while let Some(before) = self.code.range_before(idx) {
            let start = match self.code.get(before) {
                Some(range) => range.start,
                None => break,
            };
            self.fill(mem, start)?;
            let len = self.section_len(start);
            if len > 0 {
                return Ok(self.entry(start, len - 1));
            }
            idx = before;
        }
        Ok(None)
    }
}
