// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Linear disassembler over the emulator's instruction table.
//!
//! Used by the relocator to walk player code looking for absolute operands,
//! and by `dump --disasm` for human inspection. Bytes that do not decode are
//! emitted as single-byte `.byte` pseudo-instructions so the walk always
//! makes progress.

use crate::cpu::{self, Mode, Op};
use std::fmt::Write as _;

/// One decoded (or undecodable) instruction at a fixed address.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    /// Address of the opcode byte
    pub address: u16,
    /// The opcode byte itself
    pub opcode: u8,
    /// Decoded metadata, `None` when the byte is not an instruction
    pub op: Option<Op>,
    /// Raw operand value: byte or little-endian word, zero when absent
    pub operand: u16,
}

impl Instruction {
    /// Instruction length in bytes; undecodable bytes count as one.
    pub fn len(&self) -> u16 {
        self.op.map_or(1, Op::len)
    }

    /// The 16-bit address embedded in the code stream, if this instruction
    /// carries one (absolute, absolute-indexed, or indirect addressing).
    /// These are the operands relocation is allowed to patch.
    pub fn absolute_operand(&self) -> Option<u16> {
        self.op
            .filter(|op| op.mode.has_absolute_operand())
            .map(|_| self.operand)
    }

    /// Formats the instruction in standard 6502 notation.
    pub fn format(&self) -> String {
        let Some(op) = self.op else {
            return format!(".byte ${:02X}", self.opcode);
        };
        let operand = match op.mode {
            Mode::Implied => String::new(),
            Mode::Accumulator => " A".to_string(),
            Mode::Immediate => format!(" #${:02X}", self.operand as u8),
            Mode::ZeroPage => format!(" ${:02X}", self.operand as u8),
            Mode::ZeroPageX => format!(" ${:02X},X", self.operand as u8),
            Mode::ZeroPageY => format!(" ${:02X},Y", self.operand as u8),
            Mode::Absolute => format!(" ${:04X}", self.operand),
            Mode::AbsoluteX => format!(" ${:04X},X", self.operand),
            Mode::AbsoluteY => format!(" ${:04X},Y", self.operand),
            Mode::Indirect => format!(" (${:04X})", self.operand),
            Mode::IndirectX => format!(" (${:02X},X)", self.operand as u8),
            Mode::IndirectY => format!(" (${:02X}),Y", self.operand as u8),
            Mode::Relative => {
                // Branch target resolved relative to the next instruction
                let target = self
                    .address
                    .wrapping_add(2)
                    .wrapping_add(self.operand as u8 as i8 as u16);
                format!(" ${target:04X}")
            }
        };
        format!("{}{}", op.mnemonic.name(), operand)
    }
}

/// Iterates instructions over a byte slice mapped at `base`.
pub struct Disassembler<'a> {
    bytes: &'a [u8],
    base: u16,
    offset: usize,
}

impl<'a> Disassembler<'a> {
    /// Creates a disassembler for `bytes` as mapped at address `base`.
    pub fn new(bytes: &'a [u8], base: u16) -> Self {
        Self {
            bytes,
            base,
            offset: 0,
        }
    }
}

impl Iterator for Disassembler<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        let opcode = *self.bytes.get(self.offset)?;
        let address = self.base.wrapping_add(self.offset as u16);
        let op = cpu::decode(opcode);

        let operand_len = op.map_or(0, |op| op.mode.operand_len());
        // A truncated trailing instruction degrades to a data byte
        if self.offset + 1 + operand_len as usize > self.bytes.len() {
            self.offset += 1;
            return Some(Instruction {
                address,
                opcode,
                op: None,
                operand: 0,
            });
        }

        let operand = match operand_len {
            1 => u16::from(self.bytes[self.offset + 1]),
            2 => u16::from_le_bytes([
                self.bytes[self.offset + 1],
                self.bytes[self.offset + 2],
            ]),
            _ => 0,
        };
        self.offset += 1 + operand_len as usize;
        Some(Instruction {
            address,
            opcode,
            op,
            operand,
        })
    }
}

/// Renders a full listing with addresses and instruction bytes.
pub fn listing(bytes: &[u8], base: u16) -> String {
    let mut out = String::new();
    for ins in Disassembler::new(bytes, base) {
        let start = (ins.address.wrapping_sub(base)) as usize;
        let mut hex = String::new();
        for i in 0..ins.len() as usize {
            if i > 0 {
                hex.push(' ');
            }
            let _ = write!(hex, "{:02X}", bytes[start + i]);
        }
        let _ = writeln!(out, "{:04X}: {:<12} {}", ins.address, hex, ins.format());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_store_sequence() {
        // STA $D404, STA $D40B
        let bytes = [0x8D, 0x04, 0xD4, 0x8D, 0x0B, 0xD4];
        let instructions: Vec<_> = Disassembler::new(&bytes, 0x1000).collect();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].address, 0x1000);
        assert_eq!(instructions[0].absolute_operand(), Some(0xD404));
        assert_eq!(instructions[1].address, 0x1003);
        assert_eq!(instructions[1].absolute_operand(), Some(0xD40B));
    }

    #[test]
    fn zero_page_operand_is_not_absolute() {
        let bytes = [0x85, 0x20]; // STA $20
        let ins = Disassembler::new(&bytes, 0).next().unwrap();
        assert_eq!(ins.absolute_operand(), None);
    }

    #[test]
    fn undecodable_byte_advances_one() {
        let bytes = [0x02, 0xEA]; // KIL, NOP
        let instructions: Vec<_> = Disassembler::new(&bytes, 0x2000).collect();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[0].op.is_none());
        assert_eq!(instructions[0].format(), ".byte $02");
        assert_eq!(instructions[1].format(), "NOP");
    }

    #[test]
    fn truncated_instruction_degrades_to_byte() {
        let bytes = [0x8D, 0x04]; // STA missing its high byte
        let instructions: Vec<_> = Disassembler::new(&bytes, 0).collect();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[0].op.is_none());
    }

    #[test]
    fn branch_target_formatting() {
        // BNE *-2 encoded as D0 FC at $1002
        let bytes = [0xD0, 0xFC];
        let ins = Disassembler::new(&bytes, 0x1002).next().unwrap();
        assert_eq!(ins.format(), "BNE $1000");
    }

    #[test]
    fn indirect_jmp_formatting() {
        let bytes = [0x6C, 0x34, 0x12];
        let ins = Disassembler::new(&bytes, 0).next().unwrap();
        assert_eq!(ins.format(), "JMP ($1234)");
        assert_eq!(ins.absolute_operand(), Some(0x1234));
    }

    #[test]
    fn listing_includes_hex_and_mnemonic() {
        let text = listing(&[0xA9, 0x01, 0x60], 0x1000);
        assert!(text.contains("1000: A9 01        LDA #$01"));
        assert!(text.contains("RTS"));
    }
}
