//! elfpatch: an in-place ELF binary editor core.
//!
//! Opens an ELF image, disassembles its executable ranges lazily, and
//! applies byte or instruction edits with undo. Saving writes back only the
//! bytes that were edited.

pub mod cache;
pub mod config;
pub mod core;
pub mod demangle;
pub mod disasm;
pub mod engine;
pub mod error;
pub mod formats;
pub mod image;
pub mod logging;
pub mod patch;

pub use cache::InstructionCache;
pub use config::EditorConfig;
pub use engine::{PatchEngine, PatchRecord};
pub use error::{PatchError, Result};
pub use image::{MemoryImage, MemoryView};
pub use patch::{AssemblyPreview, BytePreview, PatchOutcome};
