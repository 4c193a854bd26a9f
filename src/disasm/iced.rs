use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

use crate::core::disassembler::{
    Architecture, CodecError, CodecResult, Disassembler, RawInstruction,
};

pub struct IcedDisassembler {
    bits: u32,
    arch: Architecture,
}

impl IcedDisassembler {
    pub fn new(arch: Architecture) -> Option<Self> {
        let bits = match arch {
            Architecture::X86 => 32,
            Architecture::X86_64 => 64,
            Architecture::ARM64 => return None,
        };
        Some(Self { bits, arch })
    }

    // Match capstone's Intel rendering (0x-prefixed hex, spaced operands) so
    // listings look the same whichever backend produced them.
    fn formatter() -> IntelFormatter {
        let mut fmt = IntelFormatter::new();
        let opts = fmt.options_mut();
        opts.set_hex_prefix("0x");
        opts.set_hex_suffix("");
        opts.set_uppercase_hex(false);
        opts.set_space_after_operand_separator(true);
        opts.set_space_between_memory_add_operators(true);
        fmt
    }
}

impl Disassembler for IcedDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        max_count: usize,
    ) -> CodecResult<Vec<RawInstruction>> {
        let mut decoder = Decoder::with_ip(self.bits, bytes, address, DecoderOptions::NONE);
        let mut fmt = Self::formatter();
        let mut instr = Instruction::default();
        let mut out = Vec::new();

        while decoder.can_decode() && (max_count == 0 || out.len() < max_count) {
            let start = decoder.position();
            decoder.decode_out(&mut instr);
            if instr.is_invalid() {
                break;
            }
            let mut mnemonic = String::new();
            fmt.format_mnemonic(&instr, &mut mnemonic);
            let mut operands = String::new();
            fmt.format_all_operands(&instr, &mut operands);
            out.push(RawInstruction {
                address: instr.ip(),
                bytes: bytes[start..start + instr.len()].to_vec(),
                mnemonic,
                operands,
            });
        }

        if out.is_empty() {
            return Err(CodecError::InvalidInstruction);
        }
        Ok(out)
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}
