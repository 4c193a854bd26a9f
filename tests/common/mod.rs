//! Common test utilities and helpers.
//!
//! A hand-assembled ELF64 x86-64 executable small enough to reason about
//! byte by byte, and a scripted codec pair for engine tests that must not
//! depend on a real instruction set.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use elfpatch::core::disassembler::{
    Architecture, Assembler, CodecError, CodecResult, Disassembler, RawInstruction,
};
use elfpatch::core::{CodeRange, CodeSectionIndex, LoadedSegment, SegmentFlags, SymbolTable};
use elfpatch::formats::elf::LoadedBinary;
use elfpatch::{MemoryImage, PatchEngine};

/// Minimal-image layout, all addresses are `BASE + file offset`.
pub mod test_data {
    pub const BASE: u64 = 0x400000;
    /// `main`: push rbp; mov rbp, rsp; nop; pop rbp; ret
    pub const MAIN: u64 = BASE + 0x80;
    /// `helper`: xor eax, eax; ret
    pub const HELPER: u64 = BASE + 0x87;
    /// `.fini`: add rsp, 8; ret
    pub const FINI: u64 = BASE + 0x90;
    pub const TEXT_BYTES: [u8; 10] = [0x55, 0x48, 0x89, 0xe5, 0x90, 0x5d, 0xc3, 0x31, 0xc0, 0xc3];
    pub const FINI_BYTES: [u8; 5] = [0x48, 0x83, 0xc4, 0x08, 0xc3];
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

#[allow(clippy::too_many_arguments)]
fn section_header(
    buf: &mut [u8],
    at: usize,
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
) {
    put_u32(buf, at, name);
    put_u32(buf, at + 4, sh_type);
    put_u64(buf, at + 8, flags);
    put_u64(buf, at + 16, addr);
    put_u64(buf, at + 24, offset);
    put_u64(buf, at + 32, size);
    put_u32(buf, at + 40, link);
    put_u32(buf, at + 44, info);
    put_u64(buf, at + 48, align);
    put_u64(buf, at + 56, entsize);
}

fn symbol(buf: &mut [u8], at: usize, name: u32, info: u8, shndx: u16, value: u64, size: u64) {
    put_u32(buf, at, name);
    buf[at + 4] = info;
    buf[at + 5] = 0;
    put_u16(buf, at + 6, shndx);
    put_u64(buf, at + 8, value);
    put_u64(buf, at + 16, size);
}

/// A statically linked x86-64 executable with one `PT_LOAD`, two code
/// sections (`.text`, `.fini`) and two function symbols.
///
/// File layout:
/// - 0x000 ELF header, 0x040 program header
/// - 0x080 `.text`, 0x090 `.fini`
/// - 0x0a0 `.shstrtab`, 0x0c8 `.strtab`, 0x0d8 `.symtab`
/// - 0x120 section headers
pub fn minimal_elf() -> Vec<u8> {
    use test_data::*;

    const SHOFF: usize = 0x120;
    const SHNUM: usize = 6;
    let mut buf = vec![0u8; SHOFF + SHNUM * 64];

    // ELF header
    buf[0..4].copy_from_slice(b"\x7fELF");
    buf[4] = 2; // ELFCLASS64
    buf[5] = 1; // little endian
    buf[6] = 1; // EV_CURRENT
    put_u16(&mut buf, 16, 2); // ET_EXEC
    put_u16(&mut buf, 18, 62); // EM_X86_64
    put_u32(&mut buf, 20, 1);
    put_u64(&mut buf, 24, MAIN);
    put_u64(&mut buf, 32, 0x40);
    put_u64(&mut buf, 40, SHOFF as u64);
    put_u16(&mut buf, 52, 64);
    put_u16(&mut buf, 54, 56);
    put_u16(&mut buf, 56, 1);
    put_u16(&mut buf, 58, 64);
    put_u16(&mut buf, 60, SHNUM as u16);
    put_u16(&mut buf, 62, 3);

    // PT_LOAD r-x covering everything up to the section headers
    put_u32(&mut buf, 0x40, 1);
    put_u32(&mut buf, 0x44, 5);
    put_u64(&mut buf, 0x48, 0);
    put_u64(&mut buf, 0x50, BASE);
    put_u64(&mut buf, 0x58, BASE);
    put_u64(&mut buf, 0x60, SHOFF as u64);
    put_u64(&mut buf, 0x68, 0x200);
    put_u64(&mut buf, 0x70, 0x1000);

    buf[0x80..0x8a].copy_from_slice(&TEXT_BYTES);
    buf[0x90..0x95].copy_from_slice(&FINI_BYTES);

    let shstrtab = b"\0.text\0.fini\0.shstrtab\0.symtab\0.strtab\0";
    buf[0xa0..0xa0 + shstrtab.len()].copy_from_slice(shstrtab);
    let strtab = b"\0main\0helper\0";
    buf[0xc8..0xc8 + strtab.len()].copy_from_slice(strtab);

    // null, main, helper (STB_GLOBAL | STT_FUNC)
    symbol(&mut buf, 0xd8 + 24, 1, 0x12, 1, MAIN, 7);
    symbol(&mut buf, 0xd8 + 48, 6, 0x12, 1, HELPER, 3);

    let sh = |i: usize| SHOFF + i * 64;
    section_header(&mut buf, sh(1), 1, 1, 0x6, MAIN, 0x80, 10, 0, 0, 16, 0);
    section_header(&mut buf, sh(2), 7, 1, 0x6, FINI, 0x90, 5, 0, 0, 4, 0);
    section_header(&mut buf, sh(3), 13, 3, 0, 0, 0xa0, shstrtab.len() as u64, 0, 0, 1, 0);
    section_header(&mut buf, sh(4), 23, 2, 0, 0, 0xd8, 72, 5, 1, 8, 24);
    section_header(&mut buf, sh(5), 31, 3, 0, 0, 0xc8, strtab.len() as u64, 0, 0, 1, 0);
    buf
}

/// Write the minimal image into `dir` and return its path.
pub fn write_minimal_elf(dir: &Path) -> PathBuf {
    let path = dir.join("minimal.elf");
    std::fs::write(&path, minimal_elf()).expect("write minimal elf");
    path
}

/// Fixed-width 3-byte instruction set: the first byte names the mnemonic
/// (`opXX`), the other two are ignored.
pub struct ScriptedDisassembler;

impl Disassembler for ScriptedDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>> {
        let mut out = Vec::new();
        for (i, chunk) in bytes.chunks_exact(3).enumerate() {
            if max_count != 0 && out.len() == max_count {
                break;
            }
            out.push(RawInstruction {
                address: address + 3 * i as u64,
                bytes: chunk.to_vec(),
                mnemonic: format!("op{:02x}", chunk[0]),
                operands: String::new(),
            });
        }
        if out.is_empty() {
            return Err(CodecError::InvalidInstruction);
        }
        Ok(out)
    }

    fn architecture(&self) -> Architecture {
        Architecture::X86_64
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Assembles `opXX` to `[XX, 0, 0]`, `short` to one byte and `long` to five.
/// Every call is logged.
pub struct ScriptedAssembler {
    pub calls: Rc<RefCell<Vec<String>>>,
}

impl Assembler for ScriptedAssembler {
    fn assemble(&self, text: &str, _address: u64) -> CodecResult<Vec<u8>> {
        self.calls.borrow_mut().push(text.to_string());
        match text {
            "short" => Ok(vec![0xaa]),
            "long" => Ok(vec![0xbb; 5]),
            _ => text
                .strip_prefix("op")
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .map(|op| vec![op, 0, 0])
                .ok_or_else(|| CodecError::InvalidSyntax(text.to_string())),
        }
    }

    fn architecture(&self) -> Architecture {
        Architecture::X86_64
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Engine over the given segments and code ranges, driven by the
/// scripted codecs. Returns the assembler call log alongside.
pub fn scripted_engine(
    segments: Vec<LoadedSegment>,
    code: Vec<CodeRange>,
    symbols: SymbolTable,
) -> (PatchEngine, Rc<RefCell<Vec<String>>>) {
    scripted_engine_on(Architecture::X86_64, segments, code, symbols)
}

/// As `scripted_engine`, but the binary reports `architecture`, which
/// decides the NOP encoding used for padding.
pub fn scripted_engine_on(
    architecture: Architecture,
    segments: Vec<LoadedSegment>,
    code: Vec<CodeRange>,
    symbols: SymbolTable,
) -> (PatchEngine, Rc<RefCell<Vec<String>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let binary = LoadedBinary {
        path: PathBuf::from("scripted.bin"),
        image: MemoryImage::new(segments),
        code: CodeSectionIndex::new(code),
        symbols,
        entry: 0x1000,
        architecture,
    };
    let engine = PatchEngine::with_codecs(
        binary,
        Box::new(ScriptedDisassembler),
        Box::new(ScriptedAssembler {
            calls: calls.clone(),
        }),
    );
    (engine, calls)
}

pub fn rx() -> SegmentFlags {
    SegmentFlags::READ | SegmentFlags::EXECUTE
}

/// One segment at 0x1000 holding two 3-byte instructions, `op01` and `op02`.
pub fn two_instruction_engine() -> (PatchEngine, Rc<RefCell<Vec<String>>>) {
    let seg = LoadedSegment::new(0x1000, 0, 0x1000, rx(), vec![0x01, 0, 0, 0x02, 0, 0]);
    scripted_engine(
        vec![seg],
        vec![CodeRange::new(0x1000, 6)],
        [("start", 0x1000u64)].into_iter().collect(),
    )
}

/// Counts how often a wrapped disassembler is invoked.
pub struct CountingDisassembler<D> {
    pub inner: D,
    pub calls: Rc<Cell<usize>>,
}

impl<D: Disassembler> Disassembler for CountingDisassembler<D> {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>> {
        self.calls.set(self.calls.get() + 1);
        self.inner.disassemble(bytes, address, max_count)
    }

    fn architecture(&self) -> Architecture {
        self.inner.architecture()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
