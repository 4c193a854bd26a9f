use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::disassembler::{
    Architecture, Assembler, CodecError, CodecResult, Disassembler, RawInstruction,
};

pub enum Backend {
    Iced(super::iced::IcedDisassembler),
    Cap(super::capstone::CapstoneDisassembler),
}

impl Disassembler for Backend {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>> {
        match self {
            Backend::Iced(d) => d.disassemble(bytes, address, max_count),
            Backend::Cap(d) => d.disassemble(bytes, address, max_count),
        }
    }

    fn architecture(&self) -> Architecture {
        match self {
            Backend::Iced(d) => d.architecture(),
            Backend::Cap(d) => d.architecture(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Backend::Iced(d) => d.name(),
            Backend::Cap(d) => d.name(),
        }
    }
}

/// Select a disassembler backend for the given architecture.
pub fn for_arch(arch: Architecture) -> Option<Backend> {
    match arch {
        Architecture::X86 | Architecture::X86_64 => {
            super::iced::IcedDisassembler::new(arch).map(Backend::Iced)
        }
        Architecture::ARM64 => super::capstone::CapstoneDisassembler::new(arch).map(Backend::Cap),
    }
}

/// Preferred backend kind for explicit selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Iced,
    Capstone,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Iced => write!(f, "iced"),
            BackendKind::Capstone => write!(f, "capstone"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iced" | "iced-x86" => Ok(BackendKind::Iced),
            "capstone" | "cap" => Ok(BackendKind::Capstone),
            other => Err(format!("unknown backend '{}' (expected iced or capstone)", other)),
        }
    }
}

/// Explicit backend selector. Returns an error if the backend cannot support the arch.
pub fn for_arch_with(arch: Architecture, prefer: Option<BackendKind>) -> CodecResult<Backend> {
    match prefer {
        Some(BackendKind::Iced) => super::iced::IcedDisassembler::new(arch)
            .map(Backend::Iced)
            .ok_or(CodecError::UnsupportedArchitecture),
        Some(BackendKind::Capstone) => super::capstone::CapstoneDisassembler::new(arch)
            .map(Backend::Cap)
            .ok_or(CodecError::UnsupportedArchitecture),
        None => for_arch(arch).ok_or(CodecError::UnsupportedArchitecture),
    }
}

/// Stand-in used when no assembler engine is compiled in.
pub struct UnavailableAssembler {
    arch: Architecture,
}

impl Assembler for UnavailableAssembler {
    fn assemble(&self, _text: &str, _address: u64) -> CodecResult<Vec<u8>> {
        Err(CodecError::Unavailable(
            "assembler (build with the `keystone` feature)",
        ))
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Select an assembler for the given architecture.
#[cfg(feature = "keystone")]
pub fn assembler_for(arch: Architecture) -> Box<dyn Assembler> {
    match super::keystone::KeystoneAssembler::new(arch) {
        Some(ks) => Box::new(ks),
        None => {
            tracing::warn!(%arch, "Keystone failed to open; text assembly disabled");
            Box::new(UnavailableAssembler { arch })
        }
    }
}

/// Select an assembler for the given architecture.
#[cfg(not(feature = "keystone"))]
pub fn assembler_for(arch: Architecture) -> Box<dyn Assembler> {
    Box::new(UnavailableAssembler { arch })
}
