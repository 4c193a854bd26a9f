//! Codec backends and registry.
//!
//! Always-on disassemblers:
//! - iced-x86 for x86/x64
//! - capstone for AArch64 (and x86 on request)
//!
//! Assembly goes through keystone when the `keystone` feature is enabled.
//! Without it the registry hands out an assembler that reports itself
//! unavailable, so every edit path other than text assembly keeps working.

pub mod capstone;
pub mod iced;
#[cfg(feature = "keystone")]
pub mod keystone;
pub mod registry;

pub use registry::{assembler_for, for_arch, for_arch_with, Backend, BackendKind};

/// Whether every `[` in `text` is closed by a later `]` and no `]` appears
/// unopened. Text that fails this never reaches an assembler engine.
pub fn brackets_balanced(text: &str) -> bool {
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '[' => depth += 1,
            ']' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0
}
