//! Core data types for the binary editor.
//!
//! Segments, code ranges, decoded instructions, symbols, and the codec
//! capability traits the rest of the crate is written against.

pub mod code_range;
pub mod disassembler;
pub mod instruction;
pub mod segment;
pub mod symbols;

pub use code_range::{CodeRange, CodeSectionIndex};
pub use disassembler::{Architecture, Assembler, CodecError, Disassembler, RawInstruction};
pub use instruction::DecodedInstruction;
pub use segment::{LoadedSegment, SegmentFlags};
pub use symbols::SymbolTable;
