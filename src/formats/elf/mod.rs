//! ELF loader.
//!
//! Extracts the handful of facts the editor needs from an ELF file:
//! loadable segments, executable section ranges, function/object symbols,
//! the entry point, and the machine family. Parsing is delegated to the
//! `object` crate; the file is memory-mapped for the duration of the load.

use memmap2::Mmap;
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::code_range::{CodeRange, CodeSectionIndex};
use crate::core::disassembler::Architecture;
use crate::core::segment::SegmentFlags;
use crate::core::symbols::SymbolTable;
use crate::error::{PatchError, Result};
use crate::image::{MemoryImage, RawSegment};

/// Loader output before any page alignment.
#[derive(Debug, Clone)]
pub struct RawElf {
    pub segments: Vec<RawSegment>,
    pub code_ranges: Vec<CodeRange>,
    pub symbols: SymbolTable,
    pub entry: u64,
    pub architecture: Architecture,
}

/// An opened binary ready for editing.
#[derive(Debug, Clone)]
pub struct LoadedBinary {
    pub path: PathBuf,
    pub image: MemoryImage,
    pub code: CodeSectionIndex,
    pub symbols: SymbolTable,
    pub entry: u64,
    pub architecture: Architecture,
}

impl LoadedBinary {
    /// Apply page alignment to the loader's raw facts and copy the segment
    /// bytes out of `file`.
    pub fn from_raw(path: &Path, raw: RawElf, file: &[u8], page_size: u64) -> Result<Self> {
        let image = MemoryImage::from_raw(&raw.segments, file, page_size)
            .map_err(|e| PatchError::load(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            image,
            code: CodeSectionIndex::new(raw.code_ranges),
            symbols: raw.symbols,
            entry: raw.entry,
            architecture: raw.architecture,
        })
    }
}

fn map_architecture(arch: object::Architecture) -> Result<Architecture> {
    match arch {
        object::Architecture::I386 => Ok(Architecture::X86),
        object::Architecture::X86_64 => Ok(Architecture::X86_64),
        object::Architecture::Aarch64 => Ok(Architecture::ARM64),
        other => Err(PatchError::UnsupportedArchitecture(format!("{:?}", other))),
    }
}

fn segment_flags(flags: object::SegmentFlags) -> SegmentFlags {
    match flags {
        object::SegmentFlags::Elf { p_flags } => SegmentFlags::from_bits_truncate(p_flags),
        _ => SegmentFlags::empty(),
    }
}

fn is_executable(flags: object::SectionFlags) -> bool {
    match flags {
        object::SectionFlags::Elf { sh_flags } => {
            sh_flags & u64::from(object::elf::SHF_EXECINSTR) != 0
        }
        _ => false,
    }
}

fn is_function_or_object<Section, Symbol>(flags: object::SymbolFlags<Section, Symbol>) -> bool {
    match flags {
        object::SymbolFlags::Elf { st_info, .. } => {
            let st_type = st_info & 0xf;
            st_type == object::elf::STT_FUNC || st_type == object::elf::STT_OBJECT
        }
        _ => false,
    }
}

/// Parse the loader facts out of an in-memory ELF image.
pub fn parse_elf(data: &[u8]) -> Result<RawElf> {
    let obj = object::File::parse(data)
        .map_err(|e| PatchError::InvalidInput(format!("not a parsable object file: {}", e)))?;
    if obj.format() != object::BinaryFormat::Elf {
        return Err(PatchError::InvalidInput(format!(
            "expected ELF, found {:?}",
            obj.format()
        )));
    }
    let architecture = map_architecture(obj.architecture())?;

    // object's ELF segment iterator only yields PT_LOAD entries.
    let segments: Vec<RawSegment> = obj
        .segments()
        .map(|seg| {
            let (file_offset, file_size) = seg.file_range();
            RawSegment {
                virtual_address: seg.address(),
                file_offset,
                file_size,
                memory_size: seg.size(),
                flags: segment_flags(seg.flags()),
            }
        })
        .collect();

    // Every executable section is treated as code (.init, .plt, .text, ...).
    let code_ranges: Vec<CodeRange> = obj
        .sections()
        .filter(|sec| is_executable(sec.flags()) && sec.size() > 0)
        .map(|sec| {
            debug!(
                name = sec.name().unwrap_or("?"),
                address = %format_args!("{:#x}", sec.address()),
                size = sec.size(),
                "Executable section"
            );
            CodeRange::new(sec.address(), sec.size())
        })
        .collect();

    // .symtab first so its names label addresses ahead of .dynsym aliases.
    let mut symbols = SymbolTable::new();
    for sym in obj.symbols().chain(obj.dynamic_symbols()) {
        if !is_function_or_object(sym.flags()) {
            continue;
        }
        if let Ok(name) = sym.name() {
            symbols.insert(name, sym.address());
        }
    }

    Ok(RawElf {
        segments,
        code_ranges,
        symbols,
        entry: obj.entry(),
        architecture,
    })
}

/// Open, map, and parse `path`.
pub fn load_elf(path: &Path, page_size: u64) -> Result<LoadedBinary> {
    let file = File::open(path).map_err(|e| PatchError::load(path, e))?;
    let file_size = file.metadata().map_err(|e| PatchError::load(path, e))?.len();
    if file_size == 0 {
        return Err(PatchError::load(path, "file is empty"));
    }
    // Safety: the mapping is read-only and dropped before this function
    // returns; segment bytes are copied into owned buffers.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| PatchError::load(path, e))?;

    let raw = parse_elf(&mmap).map_err(|e| match e {
        PatchError::UnsupportedArchitecture(_) => e,
        other => PatchError::load(path, other),
    })?;
    let binary = LoadedBinary::from_raw(path, raw, &mmap, page_size)?;

    info!(
        path = %path.display(),
        arch = %binary.architecture,
        entry = %format_args!("{:#x}", binary.entry),
        segments = binary.image.segments().len(),
        code_ranges = binary.code.len(),
        symbols = binary.symbols.len(),
        "Loaded ELF image"
    );
    Ok(binary)
}
