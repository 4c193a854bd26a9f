use capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

use crate::core::disassembler::{
    Architecture, CodecError, CodecResult, Disassembler, RawInstruction,
};

pub struct CapstoneDisassembler {
    cs: capstone::Capstone,
    arch: Architecture,
}

fn cs_arch_mode(arch: Architecture) -> (Arch, Mode, Option<Endian>) {
    match arch {
        Architecture::X86 => (Arch::X86, Mode::Mode32, None),
        Architecture::X86_64 => (Arch::X86, Mode::Mode64, None),
        Architecture::ARM64 => (Arch::ARM64, Mode::Arm, Some(Endian::Little)),
    }
}

impl CapstoneDisassembler {
    pub fn new(arch: Architecture) -> Option<Self> {
        let (a, m, endian) = cs_arch_mode(arch);
        let cs = Capstone::new_raw(a, m, NO_EXTRA_MODE, endian).ok()?;
        Some(Self { cs, arch })
    }
}

impl Disassembler for CapstoneDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>> {
        // disasm_count refuses a zero count; zero means "all" here.
        let insns = if max_count == 0 {
            self.cs.disasm_all(bytes, address)
        } else {
            self.cs.disasm_count(bytes, address, max_count)
        }
        .map_err(|e| CodecError::InternalError(e.to_string()))?;

        let out: Vec<RawInstruction> = insns
            .iter()
            .map(|insn| RawInstruction {
                address: insn.address(),
                bytes: insn.bytes().to_vec(),
                mnemonic: insn.mnemonic().unwrap_or("").to_string(),
                operands: insn.op_str().unwrap_or("").to_string(),
            })
            .collect();
        if out.is_empty() {
            return Err(CodecError::InvalidInstruction);
        }
        Ok(out)
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn name(&self) -> &str {
        "capstone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_arm64() {
        // mov x0, #1; ret
        let bytes = [0x20, 0x00, 0x80, 0xd2, 0xc0, 0x03, 0x5f, 0xd6];
        let dis = CapstoneDisassembler::new(Architecture::ARM64).unwrap();
        let out = dis.disassemble(&bytes, 0x1000, 0).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].address, 0x1004);
        assert!(out[0].mnemonic.contains("mov"));
        assert_eq!(out[1].mnemonic, "ret");
    }

    #[test]
    fn decodes_x86_single() {
        let bytes = [0x48, 0x31, 0xc0, 0xc3];
        let dis = CapstoneDisassembler::new(Architecture::X86_64).unwrap();
        let out = dis.disassemble(&bytes, 0x401000, 1).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, vec![0x48, 0x31, 0xc0]);
        assert_eq!(out[0].mnemonic, "xor");
    }

    #[test]
    fn undecodable_bytes_fail() {
        let dis = CapstoneDisassembler::new(Architecture::ARM64).unwrap();
        // Fewer bytes than one fixed-width instruction
        assert!(dis.disassemble(&[0x1f, 0x20], 0, 1).is_err());
    }
}
