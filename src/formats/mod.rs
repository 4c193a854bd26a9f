//! Binary format loaders.

pub mod elf;
