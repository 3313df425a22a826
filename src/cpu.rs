// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! MOS 6502 interpreter used to run SID init/play routines.
//!
//! Implements the 56 documented instructions plus the LAX/NOP-class illegal
//! opcodes that rippers left behind in real tunes. KIL-class bytes and the
//! remaining illegals surface as a recoverable [`Error::UnknownOpcode`];
//! the CPU state stays valid and may be inspected by the caller.

use crate::error::{Error, Result};
use crate::memory::MemoryImage;

/// Default instruction budget for one init/play call (2^20).
pub const DEFAULT_BUDGET: u32 = 1_048_576;

/// PC value that signals the sentinel return address has been popped.
const RETURN_SENTINEL: u16 = 0x0000;

const STACK_BASE: u16 = 0x0100;
const IRQ_VECTOR: u16 = 0xFFFE;

// Status register bits (NV-BDIZC)
const CARRY: u8 = 0x01;
const ZERO: u8 = 0x02;
const IRQ_DISABLE: u8 = 0x04;
const DECIMAL: u8 = 0x08;
const BREAK: u8 = 0x10;
const UNUSED: u8 = 0x20;
const OVERFLOW: u8 = 0x40;
const NEGATIVE: u8 = 0x80;

/// Addressing modes of the NMOS 6502.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

impl Mode {
    /// Operand size in bytes (instruction length minus the opcode).
    pub const fn operand_len(self) -> u16 {
        match self {
            Mode::Implied | Mode::Accumulator => 0,
            Mode::Immediate
            | Mode::ZeroPage
            | Mode::ZeroPageX
            | Mode::ZeroPageY
            | Mode::IndirectX
            | Mode::IndirectY
            | Mode::Relative => 1,
            Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 2,
        }
    }

    /// True if the operand is a 16-bit address embedded in the code stream.
    /// These are the operands the relocator may need to patch.
    pub const fn has_absolute_operand(self) -> bool {
        matches!(
            self,
            Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect
        )
    }
}

/// Instruction classes. One entry per documented mnemonic plus LAX.
/// Illegal NOP variants share `Nop` and differ only in addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lax, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror,
    Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs,
    Tya,
}

impl Mnemonic {
    /// Canonical assembler spelling.
    pub const fn name(self) -> &'static str {
        match self {
            Mnemonic::Adc => "ADC", Mnemonic::And => "AND", Mnemonic::Asl => "ASL",
            Mnemonic::Bcc => "BCC", Mnemonic::Bcs => "BCS", Mnemonic::Beq => "BEQ",
            Mnemonic::Bit => "BIT", Mnemonic::Bmi => "BMI", Mnemonic::Bne => "BNE",
            Mnemonic::Bpl => "BPL", Mnemonic::Brk => "BRK", Mnemonic::Bvc => "BVC",
            Mnemonic::Bvs => "BVS", Mnemonic::Clc => "CLC", Mnemonic::Cld => "CLD",
            Mnemonic::Cli => "CLI", Mnemonic::Clv => "CLV", Mnemonic::Cmp => "CMP",
            Mnemonic::Cpx => "CPX", Mnemonic::Cpy => "CPY", Mnemonic::Dec => "DEC",
            Mnemonic::Dex => "DEX", Mnemonic::Dey => "DEY", Mnemonic::Eor => "EOR",
            Mnemonic::Inc => "INC", Mnemonic::Inx => "INX", Mnemonic::Iny => "INY",
            Mnemonic::Jmp => "JMP", Mnemonic::Jsr => "JSR", Mnemonic::Lax => "LAX",
            Mnemonic::Lda => "LDA", Mnemonic::Ldx => "LDX", Mnemonic::Ldy => "LDY",
            Mnemonic::Lsr => "LSR", Mnemonic::Nop => "NOP", Mnemonic::Ora => "ORA",
            Mnemonic::Pha => "PHA", Mnemonic::Php => "PHP", Mnemonic::Pla => "PLA",
            Mnemonic::Plp => "PLP", Mnemonic::Rol => "ROL", Mnemonic::Ror => "ROR",
            Mnemonic::Rti => "RTI", Mnemonic::Rts => "RTS", Mnemonic::Sbc => "SBC",
            Mnemonic::Sec => "SEC", Mnemonic::Sed => "SED", Mnemonic::Sei => "SEI",
            Mnemonic::Sta => "STA", Mnemonic::Stx => "STX", Mnemonic::Sty => "STY",
            Mnemonic::Tax => "TAX", Mnemonic::Tay => "TAY", Mnemonic::Tsx => "TSX",
            Mnemonic::Txa => "TXA", Mnemonic::Txs => "TXS", Mnemonic::Tya => "TYA",
        }
    }
}

/// Decoded instruction metadata: class, addressing mode, base cycle cost and
/// whether an index crossing a page boundary adds a cycle.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub mnemonic: Mnemonic,
    pub mode: Mode,
    pub cycles: u8,
    pub page_penalty: bool,
}

impl Op {
    /// Total instruction length in bytes including the opcode.
    pub const fn len(self) -> u16 {
        1 + self.mode.operand_len()
    }
}

const fn op(mnemonic: Mnemonic, mode: Mode, cycles: u8) -> Op {
    Op { mnemonic, mode, cycles, page_penalty: false }
}

const fn op_pg(mnemonic: Mnemonic, mode: Mode, cycles: u8) -> Op {
    Op { mnemonic, mode, cycles, page_penalty: true }
}

/// Decodes an opcode byte. Returns `None` for KIL-class bytes and the
/// illegal opcodes this emulator does not model.
#[rustfmt::skip]
pub const fn decode(opcode: u8) -> Option<Op> {
    use Mnemonic::*;
    use Mode::*;
    Some(match opcode {
        0x69 => op(Adc, Immediate, 2),    0x65 => op(Adc, ZeroPage, 3),
        0x75 => op(Adc, ZeroPageX, 4),    0x6D => op(Adc, Absolute, 4),
        0x7D => op_pg(Adc, AbsoluteX, 4), 0x79 => op_pg(Adc, AbsoluteY, 4),
        0x61 => op(Adc, IndirectX, 6),    0x71 => op_pg(Adc, IndirectY, 5),

        0x29 => op(And, Immediate, 2),    0x25 => op(And, ZeroPage, 3),
        0x35 => op(And, ZeroPageX, 4),    0x2D => op(And, Absolute, 4),
        0x3D => op_pg(And, AbsoluteX, 4), 0x39 => op_pg(And, AbsoluteY, 4),
        0x21 => op(And, IndirectX, 6),    0x31 => op_pg(And, IndirectY, 5),

        0x0A => op(Asl, Accumulator, 2),  0x06 => op(Asl, ZeroPage, 5),
        0x16 => op(Asl, ZeroPageX, 6),    0x0E => op(Asl, Absolute, 6),
        0x1E => op(Asl, AbsoluteX, 7),

        0x90 => op(Bcc, Relative, 2),     0xB0 => op(Bcs, Relative, 2),
        0xF0 => op(Beq, Relative, 2),     0x30 => op(Bmi, Relative, 2),
        0xD0 => op(Bne, Relative, 2),     0x10 => op(Bpl, Relative, 2),
        0x50 => op(Bvc, Relative, 2),     0x70 => op(Bvs, Relative, 2),

        0x24 => op(Bit, ZeroPage, 3),     0x2C => op(Bit, Absolute, 4),

        0x00 => op(Brk, Implied, 7),

        0x18 => op(Clc, Implied, 2),      0xD8 => op(Cld, Implied, 2),
        0x58 => op(Cli, Implied, 2),      0xB8 => op(Clv, Implied, 2),

        0xC9 => op(Cmp, Immediate, 2),    0xC5 => op(Cmp, ZeroPage, 3),
        0xD5 => op(Cmp, ZeroPageX, 4),    0xCD => op(Cmp, Absolute, 4),
        0xDD => op_pg(Cmp, AbsoluteX, 4), 0xD9 => op_pg(Cmp, AbsoluteY, 4),
        0xC1 => op(Cmp, IndirectX, 6),    0xD1 => op_pg(Cmp, IndirectY, 5),

        0xE0 => op(Cpx, Immediate, 2),    0xE4 => op(Cpx, ZeroPage, 3),
        0xEC => op(Cpx, Absolute, 4),
        0xC0 => op(Cpy, Immediate, 2),    0xC4 => op(Cpy, ZeroPage, 3),
        0xCC => op(Cpy, Absolute, 4),

        0xC6 => op(Dec, ZeroPage, 5),     0xD6 => op(Dec, ZeroPageX, 6),
        0xCE => op(Dec, Absolute, 6),     0xDE => op(Dec, AbsoluteX, 7),
        0xCA => op(Dex, Implied, 2),      0x88 => op(Dey, Implied, 2),

        0x49 => op(Eor, Immediate, 2),    0x45 => op(Eor, ZeroPage, 3),
        0x55 => op(Eor, ZeroPageX, 4),    0x4D => op(Eor, Absolute, 4),
        0x5D => op_pg(Eor, AbsoluteX, 4), 0x59 => op_pg(Eor, AbsoluteY, 4),
        0x41 => op(Eor, IndirectX, 6),    0x51 => op_pg(Eor, IndirectY, 5),

        0xE6 => op(Inc, ZeroPage, 5),     0xF6 => op(Inc, ZeroPageX, 6),
        0xEE => op(Inc, Absolute, 6),     0xFE => op(Inc, AbsoluteX, 7),
        0xE8 => op(Inx, Implied, 2),      0xC8 => op(Iny, Implied, 2),

        0x4C => op(Jmp, Absolute, 3),     0x6C => op(Jmp, Indirect, 5),
        0x20 => op(Jsr, Absolute, 6),

        0xA9 => op(Lda, Immediate, 2),    0xA5 => op(Lda, ZeroPage, 3),
        0xB5 => op(Lda, ZeroPageX, 4),    0xAD => op(Lda, Absolute, 4),
        0xBD => op_pg(Lda, AbsoluteX, 4), 0xB9 => op_pg(Lda, AbsoluteY, 4),
        0xA1 => op(Lda, IndirectX, 6),    0xB1 => op_pg(Lda, IndirectY, 5),

        0xA2 => op(Ldx, Immediate, 2),    0xA6 => op(Ldx, ZeroPage, 3),
        0xB6 => op(Ldx, ZeroPageY, 4),    0xAE => op(Ldx, Absolute, 4),
        0xBE => op_pg(Ldx, AbsoluteY, 4),

        0xA0 => op(Ldy, Immediate, 2),    0xA4 => op(Ldy, ZeroPage, 3),
        0xB4 => op(Ldy, ZeroPageX, 4),    0xAC => op(Ldy, Absolute, 4),
        0xBC => op_pg(Ldy, AbsoluteX, 4),

        0x4A => op(Lsr, Accumulator, 2),  0x46 => op(Lsr, ZeroPage, 5),
        0x56 => op(Lsr, ZeroPageX, 6),    0x4E => op(Lsr, Absolute, 6),
        0x5E => op(Lsr, AbsoluteX, 7),

        0xEA => op(Nop, Implied, 2),

        0x09 => op(Ora, Immediate, 2),    0x05 => op(Ora, ZeroPage, 3),
        0x15 => op(Ora, ZeroPageX, 4),    0x0D => op(Ora, Absolute, 4),
        0x1D => op_pg(Ora, AbsoluteX, 4), 0x19 => op_pg(Ora, AbsoluteY, 4),
        0x01 => op(Ora, IndirectX, 6),    0x11 => op_pg(Ora, IndirectY, 5),

        0x48 => op(Pha, Implied, 3),      0x08 => op(Php, Implied, 3),
        0x68 => op(Pla, Implied, 4),      0x28 => op(Plp, Implied, 4),

        0x2A => op(Rol, Accumulator, 2),  0x26 => op(Rol, ZeroPage, 5),
        0x36 => op(Rol, ZeroPageX, 6),    0x2E => op(Rol, Absolute, 6),
        0x3E => op(Rol, AbsoluteX, 7),

        0x6A => op(Ror, Accumulator, 2),  0x66 => op(Ror, ZeroPage, 5),
        0x76 => op(Ror, ZeroPageX, 6),    0x6E => op(Ror, Absolute, 6),
        0x7E => op(Ror, AbsoluteX, 7),

        0x40 => op(Rti, Implied, 6),      0x60 => op(Rts, Implied, 6),

        0xE9 => op(Sbc, Immediate, 2),    0xE5 => op(Sbc, ZeroPage, 3),
        0xF5 => op(Sbc, ZeroPageX, 4),    0xED => op(Sbc, Absolute, 4),
        0xFD => op_pg(Sbc, AbsoluteX, 4), 0xF9 => op_pg(Sbc, AbsoluteY, 4),
        0xE1 => op(Sbc, IndirectX, 6),    0xF1 => op_pg(Sbc, IndirectY, 5),
        // Illegal $EB behaves exactly like documented SBC immediate
        0xEB => op(Sbc, Immediate, 2),

        0x38 => op(Sec, Implied, 2),      0xF8 => op(Sed, Implied, 2),
        0x78 => op(Sei, Implied, 2),

        0x85 => op(Sta, ZeroPage, 3),     0x95 => op(Sta, ZeroPageX, 4),
        0x8D => op(Sta, Absolute, 4),     0x9D => op(Sta, AbsoluteX, 5),
        0x99 => op(Sta, AbsoluteY, 5),    0x81 => op(Sta, IndirectX, 6),
        0x91 => op(Sta, IndirectY, 6),

        0x86 => op(Stx, ZeroPage, 3),     0x96 => op(Stx, ZeroPageY, 4),
        0x8E => op(Stx, Absolute, 4),
        0x84 => op(Sty, ZeroPage, 3),     0x94 => op(Sty, ZeroPageX, 4),
        0x8C => op(Sty, Absolute, 4),

        0xAA => op(Tax, Implied, 2),      0xA8 => op(Tay, Implied, 2),
        0xBA => op(Tsx, Implied, 2),      0x8A => op(Txa, Implied, 2),
        0x9A => op(Txs, Implied, 2),      0x98 => op(Tya, Implied, 2),

        // LAX: load A and X together (illegal, common in ripped players)
        0xA7 => op(Lax, ZeroPage, 3),     0xB7 => op(Lax, ZeroPageY, 4),
        0xAF => op(Lax, Absolute, 4),     0xBF => op_pg(Lax, AbsoluteY, 4),
        0xA3 => op(Lax, IndirectX, 6),    0xB3 => op_pg(Lax, IndirectY, 5),

        // Illegal NOP variants: consume their operand, touch nothing
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => op(Nop, Implied, 2),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => op(Nop, Immediate, 2),
        0x04 | 0x44 | 0x64 => op(Nop, ZeroPage, 3),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => op(Nop, ZeroPageX, 4),
        0x0C => op(Nop, Absolute, 4),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => op_pg(Nop, AbsoluteX, 4),

        _ => return None,
    })
}

/// The 6502 CPU. Owns its memory image, following the PSID flat RAM model.
pub struct Cpu {
    /// 64KB RAM plus SID/VIC shims
    pub memory: MemoryImage,
    /// Accumulator
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Stack pointer (offset into page $01)
    pub sp: u8,
    /// Program counter
    pub pc: u16,
    /// Status register (NV-BDIZC)
    pub status: u8,
    /// Total elapsed cycles
    pub cycles: u64,
}

impl Cpu {
    /// Creates a CPU around an existing memory image.
    pub fn new(memory: MemoryImage) -> Self {
        Self {
            memory,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            pc: 0,
            status: UNUSED | IRQ_DISABLE,
            cycles: 0,
        }
    }

    /// Calls a subroutine the way a player expects to be called via JSR.
    ///
    /// A sentinel return address of $FFFF is pushed so that the routine's
    /// final RTS wraps the PC to $0000, which we detect as completion. Runs
    /// at most `budget` instructions; exceeding it reports
    /// [`Error::BudgetExhausted`] but leaves the CPU state intact for
    /// inspection.
    pub fn call_subroutine(
        &mut self,
        address: u16,
        accumulator: u8,
        budget: u32,
        routine: &'static str,
    ) -> Result<()> {
        self.sp = 0xFD;
        self.memory.write(0x01FF, 0xFF);
        self.memory.write(0x01FE, 0xFF);
        self.a = accumulator;
        self.pc = address;

        for _ in 0..budget {
            if self.pc == RETURN_SENTINEL {
                return Ok(());
            }
            self.step_one()?;
        }
        if self.pc == RETURN_SENTINEL {
            Ok(())
        } else {
            Err(Error::BudgetExhausted { routine, budget })
        }
    }

    /// Executes exactly one instruction, updating flags, PC and cycles.
    pub fn step_one(&mut self) -> Result<()> {
        let pc = self.pc;
        let opcode = self.memory.read(pc);
        let Some(op) = decode(opcode) else {
            return Err(Error::UnknownOpcode { pc, opcode });
        };
        self.pc = pc.wrapping_add(1);
        self.cycles += u64::from(op.cycles);
        self.execute(op);
        Ok(())
    }

    fn execute(&mut self, op: Op) {
        use Mnemonic::*;
        match op.mnemonic {
            Lda => {
                let v = self.load_operand(op);
                self.a = v;
                self.set_nz(v);
            }
            Ldx => {
                let v = self.load_operand(op);
                self.x = v;
                self.set_nz(v);
            }
            Ldy => {
                let v = self.load_operand(op);
                self.y = v;
                self.set_nz(v);
            }
            Lax => {
                let v = self.load_operand(op);
                self.a = v;
                self.x = v;
                self.set_nz(v);
            }
            Sta => {
                let addr = self.operand_address(op);
                self.memory.write(addr, self.a);
            }
            Stx => {
                let addr = self.operand_address(op);
                self.memory.write(addr, self.x);
            }
            Sty => {
                let addr = self.operand_address(op);
                self.memory.write(addr, self.y);
            }

            Adc => {
                let v = self.load_operand(op);
                self.adc(v);
            }
            Sbc => {
                let v = self.load_operand(op);
                self.sbc(v);
            }
            And => {
                let v = self.load_operand(op);
                self.a &= v;
                self.set_nz(self.a);
            }
            Ora => {
                let v = self.load_operand(op);
                self.a |= v;
                self.set_nz(self.a);
            }
            Eor => {
                let v = self.load_operand(op);
                self.a ^= v;
                self.set_nz(self.a);
            }
            Cmp => {
                let v = self.load_operand(op);
                self.compare(self.a, v);
            }
            Cpx => {
                let v = self.load_operand(op);
                self.compare(self.x, v);
            }
            Cpy => {
                let v = self.load_operand(op);
                self.compare(self.y, v);
            }
            Bit => {
                let v = self.load_operand(op);
                self.set_flag(ZERO, self.a & v == 0);
                self.set_flag(NEGATIVE, v & 0x80 != 0);
                self.set_flag(OVERFLOW, v & 0x40 != 0);
            }

            Asl => self.read_modify_write(op, |cpu, v| {
                cpu.set_flag(CARRY, v & 0x80 != 0);
                v << 1
            }),
            Lsr => self.read_modify_write(op, |cpu, v| {
                cpu.set_flag(CARRY, v & 0x01 != 0);
                v >> 1
            }),
            Rol => self.read_modify_write(op, |cpu, v| {
                let carry_in = u8::from(cpu.status & CARRY != 0);
                cpu.set_flag(CARRY, v & 0x80 != 0);
                (v << 1) | carry_in
            }),
            Ror => self.read_modify_write(op, |cpu, v| {
                let carry_in = u8::from(cpu.status & CARRY != 0) << 7;
                cpu.set_flag(CARRY, v & 0x01 != 0);
                (v >> 1) | carry_in
            }),
            Inc => self.read_modify_write(op, |_, v| v.wrapping_add(1)),
            Dec => self.read_modify_write(op, |_, v| v.wrapping_sub(1)),

            Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_nz(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_nz(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_nz(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_nz(self.y);
            }

            Tax => {
                self.x = self.a;
                self.set_nz(self.x);
            }
            Tay => {
                self.y = self.a;
                self.set_nz(self.y);
            }
            Txa => {
                self.a = self.x;
                self.set_nz(self.a);
            }
            Tya => {
                self.a = self.y;
                self.set_nz(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.set_nz(self.x);
            }
            Txs => self.sp = self.x, // no flags

            Jmp => {
                let addr = self.operand_address(op);
                self.pc = addr;
            }
            Jsr => {
                let target = self.fetch_word();
                let ret = self.pc.wrapping_sub(1);
                self.push((ret >> 8) as u8);
                self.push(ret as u8);
                self.pc = target;
            }
            Rts => {
                let lo = self.pop();
                let hi = self.pop();
                self.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            Rti => {
                let flags = self.pop();
                self.status = (flags | UNUSED) & !BREAK;
                let lo = self.pop();
                let hi = self.pop();
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            Brk => {
                // BRK has a padding byte; the pushed PC skips it
                let ret = self.pc.wrapping_add(1);
                self.push((ret >> 8) as u8);
                self.push(ret as u8);
                self.push(self.status | BREAK | UNUSED);
                self.set_flag(IRQ_DISABLE, true);
                self.pc = u16::from_le_bytes([
                    self.memory.read(IRQ_VECTOR),
                    self.memory.read(IRQ_VECTOR.wrapping_add(1)),
                ]);
            }

            Bcc => self.branch(op, self.status & CARRY == 0),
            Bcs => self.branch(op, self.status & CARRY != 0),
            Bne => self.branch(op, self.status & ZERO == 0),
            Beq => self.branch(op, self.status & ZERO != 0),
            Bpl => self.branch(op, self.status & NEGATIVE == 0),
            Bmi => self.branch(op, self.status & NEGATIVE != 0),
            Bvc => self.branch(op, self.status & OVERFLOW == 0),
            Bvs => self.branch(op, self.status & OVERFLOW != 0),

            Pha => self.push(self.a),
            Php => self.push(self.status | BREAK | UNUSED),
            Pla => {
                self.a = self.pop();
                self.set_nz(self.a);
            }
            Plp => {
                let flags = self.pop();
                self.status = (flags | UNUSED) & !BREAK;
            }

            Clc => self.set_flag(CARRY, false),
            Sec => self.set_flag(CARRY, true),
            Cld => self.set_flag(DECIMAL, false),
            Sed => self.set_flag(DECIMAL, true),
            Cli => self.set_flag(IRQ_DISABLE, false),
            Sei => self.set_flag(IRQ_DISABLE, true),
            Clv => self.set_flag(OVERFLOW, false),

            Nop => {
                if op.mode != Mode::Implied {
                    // Illegal NOPs still perform the operand fetch
                    let _ = self.operand_address(op);
                }
            }
        }
    }

    // --- operand resolution -------------------------------------------------

    fn fetch_byte(&mut self) -> u8 {
        let v = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        v
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte();
        let hi = self.fetch_byte();
        u16::from_le_bytes([lo, hi])
    }

    /// Reads a pointer from the zero page; the high byte wraps inside page 0.
    fn read_zp_word(&mut self, zp: u8) -> u16 {
        let lo = self.memory.read(u16::from(zp));
        let hi = self.memory.read(u16::from(zp.wrapping_add(1)));
        u16::from_le_bytes([lo, hi])
    }

    fn operand_address(&mut self, op: Op) -> u16 {
        match op.mode {
            Mode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                addr
            }
            Mode::ZeroPage => u16::from(self.fetch_byte()),
            Mode::ZeroPageX => u16::from(self.fetch_byte().wrapping_add(self.x)),
            Mode::ZeroPageY => u16::from(self.fetch_byte().wrapping_add(self.y)),
            Mode::Absolute => self.fetch_word(),
            Mode::AbsoluteX => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(u16::from(self.x));
                self.page_cross_penalty(op, base, addr);
                addr
            }
            Mode::AbsoluteY => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(u16::from(self.y));
                self.page_cross_penalty(op, base, addr);
                addr
            }
            Mode::Indirect => {
                // NMOS bug: the pointer's high byte never crosses the page
                let ptr = self.fetch_word();
                let lo = self.memory.read(ptr);
                let hi_addr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let hi = self.memory.read(hi_addr);
                u16::from_le_bytes([lo, hi])
            }
            Mode::IndirectX => {
                let zp = self.fetch_byte().wrapping_add(self.x);
                self.read_zp_word(zp)
            }
            Mode::IndirectY => {
                let zp = self.fetch_byte();
                let base = self.read_zp_word(zp);
                let addr = base.wrapping_add(u16::from(self.y));
                self.page_cross_penalty(op, base, addr);
                addr
            }
            Mode::Implied | Mode::Accumulator | Mode::Relative => {
                unreachable!("no operand address for {:?}", op.mode)
            }
        }
    }

    fn load_operand(&mut self, op: Op) -> u8 {
        let addr = self.operand_address(op);
        self.memory.read(addr)
    }

    fn page_cross_penalty(&mut self, op: Op, base: u16, addr: u16) {
        if op.page_penalty && base & 0xFF00 != addr & 0xFF00 {
            self.cycles += 1;
        }
    }

    fn read_modify_write(&mut self, op: Op, f: impl FnOnce(&mut Self, u8) -> u8) {
        if op.mode == Mode::Accumulator {
            let result = f(self, self.a);
            self.a = result;
            self.set_nz(result);
        } else {
            let addr = self.operand_address(op);
            let value = self.memory.read(addr);
            let result = f(self, value);
            self.memory.write(addr, result);
            self.set_nz(result);
        }
    }

    fn branch(&mut self, op: Op, taken: bool) {
        debug_assert_eq!(op.mode, Mode::Relative);
        let offset = self.fetch_byte() as i8;
        if taken {
            self.cycles += 1;
            let base = self.pc;
            let target = base.wrapping_add(offset as u16);
            if base & 0xFF00 != target & 0xFF00 {
                self.cycles += 1;
            }
            self.pc = target;
        }
    }

    // --- arithmetic ---------------------------------------------------------

    fn adc(&mut self, value: u8) {
        let carry_in = u16::from(self.status & CARRY != 0);
        if self.status & DECIMAL != 0 {
            let a = self.a;
            let binary = u16::from(a) + u16::from(value) + carry_in;
            // NMOS: Z reflects the binary sum, N and V the BCD intermediate
            self.set_flag(ZERO, binary as u8 == 0);
            let mut lo = (a & 0x0F) + (value & 0x0F) + carry_in as u8;
            if lo > 9 {
                lo += 6;
            }
            let mut hi =
                u16::from(a >> 4) + u16::from(value >> 4) + u16::from(lo > 0x0F);
            let intermediate = ((hi as u8) << 4) | (lo & 0x0F);
            self.set_flag(NEGATIVE, intermediate & 0x80 != 0);
            self.set_flag(
                OVERFLOW,
                (a ^ value) & 0x80 == 0 && (a ^ intermediate) & 0x80 != 0,
            );
            if hi > 9 {
                hi += 6;
            }
            self.set_flag(CARRY, hi > 0x0F);
            self.a = ((hi as u8) << 4) | (lo & 0x0F);
        } else {
            let sum = u16::from(self.a) + u16::from(value) + carry_in;
            let result = sum as u8;
            self.set_flag(CARRY, sum > 0xFF);
            self.set_flag(OVERFLOW, (self.a ^ result) & (value ^ result) & 0x80 != 0);
            self.a = result;
            self.set_nz(result);
        }
    }

    fn sbc(&mut self, value: u8) {
        let borrow = i16::from(self.status & CARRY == 0);
        let a = self.a;
        let diff = i16::from(a) - i16::from(value) - borrow;
        let binary = diff as u8;
        // In SBC all flags follow the binary result, decimal mode or not
        self.set_flag(CARRY, diff >= 0);
        self.set_flag(OVERFLOW, (a ^ value) & (a ^ binary) & 0x80 != 0);
        self.set_nz(binary);
        if self.status & DECIMAL != 0 {
            let mut lo = i16::from(a & 0x0F) - i16::from(value & 0x0F) - borrow;
            let mut hi = i16::from(a >> 4) - i16::from(value >> 4);
            if lo < 0 {
                lo -= 6;
                hi -= 1;
            }
            if hi < 0 {
                hi -= 6;
            }
            self.a = (((hi as u8) & 0x0F) << 4) | ((lo as u8) & 0x0F);
        } else {
            self.a = binary;
        }
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(CARRY, register >= value);
        self.set_nz(result);
    }

    // --- stack and flags ----------------------------------------------------

    fn push(&mut self, value: u8) {
        self.memory.write(STACK_BASE + u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.memory.read(STACK_BASE + u16::from(self.sp))
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.set_flag(ZERO, value == 0);
        self.set_flag(NEGATIVE, value & 0x80 != 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loads a program at $1000 and returns a CPU with PC pointing at it.
    fn cpu_with(program: &[u8]) -> Cpu {
        let mut mem = MemoryImage::new();
        mem.load(0x1000, program);
        let mut cpu = Cpu::new(mem);
        cpu.pc = 0x1000;
        cpu
    }

    fn run(cpu: &mut Cpu, instructions: usize) {
        for _ in 0..instructions {
            cpu.step_one().expect("step");
        }
    }

    #[test]
    fn lda_sta_roundtrip() {
        // LDA #$55, STA $2000
        let mut cpu = cpu_with(&[0xA9, 0x55, 0x8D, 0x00, 0x20]);
        run(&mut cpu, 2);
        assert_eq!(cpu.memory.peek(0x2000), 0x55);
        assert_eq!(cpu.cycles, 6);
    }

    #[test]
    fn call_subroutine_returns_on_sentinel_rts() {
        // LDA #$42, STA $D400, RTS
        let mut cpu = cpu_with(&[0xA9, 0x42, 0x8D, 0x00, 0xD4, 0x60]);
        cpu.call_subroutine(0x1000, 0x00, DEFAULT_BUDGET, "init")
            .expect("routine returns");
        assert_eq!(cpu.memory.peek(0xD400), 0x42);
        assert_eq!(cpu.pc, 0x0000);
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        // Tight loop: BNE *-2 after INX keeps Z clear most of the time;
        // use JMP $1000 for a guaranteed infinite loop.
        let mut cpu = cpu_with(&[0x4C, 0x00, 0x10]);
        let err = cpu
            .call_subroutine(0x1000, 0x00, 1000, "init")
            .expect_err("never returns");
        match err {
            Error::BudgetExhausted { routine, budget } => {
                assert_eq!(routine, "init");
                assert_eq!(budget, 1000);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn budget_of_one_executes_single_instruction() {
        // NOP then RTS: budget 1 runs only the NOP
        let mut cpu = cpu_with(&[0xEA, 0x60]);
        let err = cpu.call_subroutine(0x1000, 0x00, 1, "init");
        assert!(err.is_err());
        assert_eq!(cpu.pc, 0x1001);
    }

    #[test]
    fn budget_of_one_accepts_immediate_rts() {
        let mut cpu = cpu_with(&[0x60]);
        cpu.call_subroutine(0x1000, 0x00, 1, "init")
            .expect("single RTS returns");
    }

    #[test]
    fn unknown_opcode_reports_pc_and_byte() {
        // KIL at entry
        let mut cpu = cpu_with(&[0x02]);
        let err = cpu.step_one().expect_err("KIL is unknown");
        match err {
            Error::UnknownOpcode { pc, opcode } => {
                assert_eq!(pc, 0x1000);
                assert_eq!(opcode, 0x02);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn jsr_rts_nest() {
        // $1000: JSR $1006; STA $2000   $1006: LDA #$77; RTS
        let mut mem = MemoryImage::new();
        mem.load(0x1000, &[0x20, 0x06, 0x10, 0x8D, 0x00, 0x20]);
        mem.load(0x1006, &[0xA9, 0x77, 0x60]);
        let mut cpu = Cpu::new(mem);
        cpu.pc = 0x1000;
        run(&mut cpu, 4); // JSR, LDA, RTS, STA
        assert_eq!(cpu.memory.peek(0x2000), 0x77);
    }

    #[test]
    fn branch_cycle_accounting() {
        // BNE taken, no page cross: 3 cycles. Z clear after LDX #$01.
        let mut cpu = cpu_with(&[0xA2, 0x01, 0xD0, 0x01, 0xEA, 0xEA]);
        run(&mut cpu, 2); // LDX (2) + BNE taken (3)
        assert_eq!(cpu.cycles, 5);
        assert_eq!(cpu.pc, 0x1005);
    }

    #[test]
    fn page_cross_adds_cycle_for_indexed_read() {
        // LDA $10FF,X with X=1 crosses into $1100: 4+1 cycles
        let mut cpu = cpu_with(&[0xBD, 0xFF, 0x10]);
        cpu.x = 1;
        run(&mut cpu, 1);
        assert_eq!(cpu.cycles, 5);
    }

    #[test]
    fn store_never_pays_page_cross() {
        // STA $10FF,X with X=1: always 5 cycles
        let mut cpu = cpu_with(&[0x9D, 0xFF, 0x10]);
        cpu.x = 1;
        cpu.a = 0xAB;
        run(&mut cpu, 1);
        assert_eq!(cpu.cycles, 5);
        assert_eq!(cpu.memory.peek(0x1100), 0xAB);
    }

    #[test]
    fn indirect_jmp_page_wrap_bug() {
        // JMP ($10FF): high byte read from $1000, not $1100
        let mut mem = MemoryImage::new();
        mem.load(0x1000, &[0x40]); // high byte source (bug)
        mem.load(0x10FF, &[0x20]); // pointer low byte
        mem.load(0x1100, &[0x99]); // would be high byte without the bug
        mem.load(0x2000, &[0x6C, 0xFF, 0x10]);
        let mut cpu = Cpu::new(mem);
        cpu.pc = 0x2000;
        run(&mut cpu, 1);
        assert_eq!(cpu.pc, 0x4020);
    }

    #[test]
    fn lax_loads_a_and_x() {
        let mut cpu = cpu_with(&[0xAF, 0x00, 0x20]); // LAX $2000
        cpu.memory.write(0x2000, 0x5A);
        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x5A);
        assert_eq!(cpu.x, 0x5A);
    }

    #[test]
    fn illegal_nop_consumes_operand() {
        // $04 is a zero-page NOP: two bytes, no effect
        let mut cpu = cpu_with(&[0x04, 0x12, 0xA9, 0x01]);
        run(&mut cpu, 2);
        assert_eq!(cpu.a, 0x01);
        assert_eq!(cpu.pc, 0x1004);
    }

    #[test]
    fn adc_binary_overflow_and_carry() {
        let mut cpu = cpu_with(&[0xA9, 0x7F, 0x69, 0x01]); // LDA #$7F, ADC #$01
        run(&mut cpu, 2);
        assert_eq!(cpu.a, 0x80);
        assert_ne!(cpu.status & OVERFLOW, 0);
        assert_eq!(cpu.status & CARRY, 0);
        assert_ne!(cpu.status & NEGATIVE, 0);
    }

    #[test]
    fn adc_decimal_mode() {
        // SED, LDA #$19, ADC #$01 -> $20 BCD
        let mut cpu = cpu_with(&[0xF8, 0xA9, 0x19, 0x69, 0x01]);
        run(&mut cpu, 3);
        assert_eq!(cpu.a, 0x20);
        assert_eq!(cpu.status & CARRY, 0);
    }

    #[test]
    fn sbc_decimal_mode() {
        // SED, SEC, LDA #$20, SBC #$01 -> $19 BCD
        let mut cpu = cpu_with(&[0xF8, 0x38, 0xA9, 0x20, 0xE9, 0x01]);
        run(&mut cpu, 4);
        assert_eq!(cpu.a, 0x19);
        assert_ne!(cpu.status & CARRY, 0);
    }

    #[test]
    fn zero_page_x_wraps() {
        // LDA $F0,X with X=$20 reads $10, not $110
        let mut cpu = cpu_with(&[0xB5, 0xF0]);
        cpu.x = 0x20;
        cpu.memory.write(0x0010, 0x99);
        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x99);
    }

    #[test]
    fn indirect_y_load() {
        // LDA ($40),Y with pointer $2000 and Y=5 reads $2005
        let mut cpu = cpu_with(&[0xB1, 0x40]);
        cpu.memory.write(0x0040, 0x00);
        cpu.memory.write(0x0041, 0x20);
        cpu.memory.write(0x2005, 0x77);
        cpu.y = 5;
        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x77);
    }

    #[test]
    fn php_plp_roundtrip_masks_break() {
        let mut cpu = cpu_with(&[0x38, 0x08, 0x18, 0x28]); // SEC, PHP, CLC, PLP
        run(&mut cpu, 4);
        assert_ne!(cpu.status & CARRY, 0);
        assert_eq!(cpu.status & BREAK, 0);
    }
}
