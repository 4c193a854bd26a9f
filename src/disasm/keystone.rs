use keystone_engine::{Arch, Keystone, Mode};

use crate::core::disassembler::{Architecture, Assembler, CodecError, CodecResult};

pub struct KeystoneAssembler {
    engine: Keystone,
    arch: Architecture,
}

fn ks_arch_mode(arch: Architecture) -> (Arch, Mode) {
    match arch {
        Architecture::X86 => (Arch::X86, Mode::MODE_32),
        Architecture::X86_64 => (Arch::X86, Mode::MODE_64),
        Architecture::ARM64 => (Arch::ARM64, Mode::LITTLE_ENDIAN),
    }
}

impl KeystoneAssembler {
    pub fn new(arch: Architecture) -> Option<Self> {
        let (a, m) = ks_arch_mode(arch);
        let engine = Keystone::new(a, m).ok()?;
        Some(Self { engine, arch })
    }
}

impl Assembler for KeystoneAssembler {
    fn assemble(&self, text: &str, address: u64) -> CodecResult<Vec<u8>> {
        let result = self
            .engine
            .asm(text.to_string(), address)
            .map_err(|e| CodecError::InvalidSyntax(format!("{:?}", e)))?;
        if result.bytes.is_empty() {
            return Err(CodecError::InvalidSyntax(format!(
                "no bytes produced for {:?}",
                text
            )));
        }
        Ok(result.bytes)
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn name(&self) -> &str {
        "keystone"
    }
}
