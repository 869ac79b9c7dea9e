// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Static description of all 256 opcodes of the 6510, including the
//! undocumented ones that real SID players depend on.

use std::fmt;

/// The thirteen 6502 addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No operand, e.g. `tax`
    Implied,
    /// `lda #$07`
    Immediate,
    /// `lda $ee`
    ZeroPage,
    /// `sta $00,x`
    ZeroPageX,
    /// `stx $00,y`
    ZeroPageY,
    /// `lda $16a0`
    Absolute,
    /// `sta $1000,x`
    AbsoluteX,
    /// `sta $1000,y`
    AbsoluteY,
    /// `jmp ($0020)`
    Indirect,
    /// `lda ($40,x)`
    IndirectX,
    /// `lda ($46),y`
    IndirectY,
    /// `beq $04`
    Relative,
    /// `asl`
    Accumulator,
}

/// Instruction mnemonics, documented and undocumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // Names are the documentation
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
    // Undocumented
    Slo, Rla, Sre, Rra, Sax, Lax, Dcp, Isc, Anc, Alr, Arr, Xaa, Axs,
    Ahx, Shy, Shx, Tas, Las, Kil,
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format!("{self:?}").to_ascii_lowercase())
    }
}

/// One row of the opcode table.
#[derive(Debug, Clone, Copy)]
pub struct Opcode {
    /// Instruction mnemonic
    pub mnemonic: Mnemonic,
    /// Addressing mode
    pub mode: Mode,
    /// Total instruction size in bytes (1..=3)
    pub size: u8,
    /// Base cycle count, before page-cross and branch penalties
    pub cycles: u8,
    /// True for undocumented encodings
    pub illegal: bool,
}

/// Looks up the table row for an opcode byte.
pub const fn decode(opcode: u8) -> &'static Opcode {
    &OPCODES[opcode as usize]
}

macro_rules! op {
    ($mn:ident, $mode:ident, $size:expr, $cycles:expr) => {
        Opcode {
            mnemonic: Mnemonic::$mn,
            mode: Mode::$mode,
            size: $size,
            cycles: $cycles,
            illegal: false,
        }
    };
    ($mn:ident, $mode:ident, $size:expr, $cycles:expr, illegal) => {
        Opcode {
            mnemonic: Mnemonic::$mn,
            mode: Mode::$mode,
            size: $size,
            cycles: $cycles,
            illegal: true,
        }
    };
}

/// The full 6510 opcode table, indexed by opcode byte.
pub static OPCODES: [Opcode; 256] = [
    // 0x00-0x0F
    op!(Brk, Implied, 1, 7),
    op!(Ora, IndirectX, 2, 6),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Slo, IndirectX, 2, 8, illegal),
    op!(Nop, ZeroPage, 2, 3, illegal),
    op!(Ora, ZeroPage, 2, 3),
    op!(Asl, ZeroPage, 2, 5),
    op!(Slo, ZeroPage, 2, 5, illegal),
    op!(Php, Implied, 1, 3),
    op!(Ora, Immediate, 2, 2),
    op!(Asl, Accumulator, 1, 2),
    op!(Anc, Immediate, 2, 2, illegal),
    op!(Nop, Absolute, 3, 4, illegal),
    op!(Ora, Absolute, 3, 4),
    op!(Asl, Absolute, 3, 6),
    op!(Slo, Absolute, 3, 6, illegal),
    // 0x10-0x1F
    op!(Bpl, Relative, 2, 2),
    op!(Ora, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Slo, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(Ora, ZeroPageX, 2, 4),
    op!(Asl, ZeroPageX, 2, 6),
    op!(Slo, ZeroPageX, 2, 6, illegal),
    op!(Clc, Implied, 1, 2),
    op!(Ora, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Slo, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(Ora, AbsoluteX, 3, 4),
    op!(Asl, AbsoluteX, 3, 7),
    op!(Slo, AbsoluteX, 3, 7, illegal),
    // 0x20-0x2F
    op!(Jsr, Absolute, 3, 6),
    op!(And, IndirectX, 2, 6),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Rla, IndirectX, 2, 8, illegal),
    op!(Bit, ZeroPage, 2, 3),
    op!(And, ZeroPage, 2, 3),
    op!(Rol, ZeroPage, 2, 5),
    op!(Rla, ZeroPage, 2, 5, illegal),
    op!(Plp, Implied, 1, 4),
    op!(And, Immediate, 2, 2),
    op!(Rol, Accumulator, 1, 2),
    op!(Anc, Immediate, 2, 2, illegal),
    op!(Bit, Absolute, 3, 4),
    op!(And, Absolute, 3, 4),
    op!(Rol, Absolute, 3, 6),
    op!(Rla, Absolute, 3, 6, illegal),
    // 0x30-0x3F
    op!(Bmi, Relative, 2, 2),
    op!(And, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Rla, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(And, ZeroPageX, 2, 4),
    op!(Rol, ZeroPageX, 2, 6),
    op!(Rla, ZeroPageX, 2, 6, illegal),
    op!(Sec, Implied, 1, 2),
    op!(And, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Rla, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(And, AbsoluteX, 3, 4),
    op!(Rol, AbsoluteX, 3, 7),
    op!(Rla, AbsoluteX, 3, 7, illegal),
    // 0x40-0x4F
    op!(Rti, Implied, 1, 6),
    op!(Eor, IndirectX, 2, 6),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Sre, IndirectX, 2, 8, illegal),
    op!(Nop, ZeroPage, 2, 3, illegal),
    op!(Eor, ZeroPage, 2, 3),
    op!(Lsr, ZeroPage, 2, 5),
    op!(Sre, ZeroPage, 2, 5, illegal),
    op!(Pha, Implied, 1, 3),
    op!(Eor, Immediate, 2, 2),
    op!(Lsr, Accumulator, 1, 2),
    op!(Alr, Immediate, 2, 2, illegal),
    op!(Jmp, Absolute, 3, 3),
    op!(Eor, Absolute, 3, 4),
    op!(Lsr, Absolute, 3, 6),
    op!(Sre, Absolute, 3, 6, illegal),
    // 0x50-0x5F
    op!(Bvc, Relative, 2, 2),
    op!(Eor, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Sre, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(Eor, ZeroPageX, 2, 4),
    op!(Lsr, ZeroPageX, 2, 6),
    op!(Sre, ZeroPageX, 2, 6, illegal),
    op!(Cli, Implied, 1, 2),
    op!(Eor, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Sre, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(Eor, AbsoluteX, 3, 4),
    op!(Lsr, AbsoluteX, 3, 7),
    op!(Sre, AbsoluteX, 3, 7, illegal),
    // 0x60-0x6F
    op!(Rts, Implied, 1, 6),
    op!(Adc, IndirectX, 2, 6),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Rra, IndirectX, 2, 8, illegal),
    op!(Nop, ZeroPage, 2, 3, illegal),
    op!(Adc, ZeroPage, 2, 3),
    op!(Ror, ZeroPage, 2, 5),
    op!(Rra, ZeroPage, 2, 5, illegal),
    op!(Pla, Implied, 1, 4),
    op!(Adc, Immediate, 2, 2),
    op!(Ror, Accumulator, 1, 2),
    op!(Arr, Immediate, 2, 2, illegal),
    op!(Jmp, Indirect, 3, 5),
    op!(Adc, Absolute, 3, 4),
    op!(Ror, Absolute, 3, 6),
    op!(Rra, Absolute, 3, 6, illegal),
    // 0x70-0x7F
    op!(Bvs, Relative, 2, 2),
    op!(Adc, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Rra, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(Adc, ZeroPageX, 2, 4),
    op!(Ror, ZeroPageX, 2, 6),
    op!(Rra, ZeroPageX, 2, 6, illegal),
    op!(Sei, Implied, 1, 2),
    op!(Adc, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Rra, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(Adc, AbsoluteX, 3, 4),
    op!(Ror, AbsoluteX, 3, 7),
    op!(Rra, AbsoluteX, 3, 7, illegal),
    // 0x80-0x8F
    op!(Nop, Immediate, 2, 2, illegal),
    op!(Sta, IndirectX, 2, 6),
    op!(Nop, Immediate, 2, 2, illegal),
    op!(Sax, IndirectX, 2, 6, illegal),
    op!(Sty, ZeroPage, 2, 3),
    op!(Sta, ZeroPage, 2, 3),
    op!(Stx, ZeroPage, 2, 3),
    op!(Sax, ZeroPage, 2, 3, illegal),
    op!(Dey, Implied, 1, 2),
    op!(Nop, Immediate, 2, 2, illegal),
    op!(Txa, Implied, 1, 2),
    op!(Xaa, Immediate, 2, 2, illegal),
    op!(Sty, Absolute, 3, 4),
    op!(Sta, Absolute, 3, 4),
    op!(Stx, Absolute, 3, 4),
    op!(Sax, Absolute, 3, 4, illegal),
    // 0x90-0x9F
    op!(Bcc, Relative, 2, 2),
    op!(Sta, IndirectY, 2, 6),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Ahx, IndirectY, 2, 6, illegal),
    op!(Sty, ZeroPageX, 2, 4),
    op!(Sta, ZeroPageX, 2, 4),
    op!(Stx, ZeroPageY, 2, 4),
    op!(Sax, ZeroPageY, 2, 4, illegal),
    op!(Tya, Implied, 1, 2),
    op!(Sta, AbsoluteY, 3, 5),
    op!(Txs, Implied, 1, 2),
    op!(Tas, AbsoluteY, 3, 5, illegal),
    op!(Shy, AbsoluteX, 3, 5, illegal),
    op!(Sta, AbsoluteX, 3, 5),
    op!(Shx, AbsoluteY, 3, 5, illegal),
    op!(Ahx, AbsoluteY, 3, 5, illegal),
    // 0xA0-0xAF
    op!(Ldy, Immediate, 2, 2),
    op!(Lda, IndirectX, 2, 6),
    op!(Ldx, Immediate, 2, 2),
    op!(Lax, IndirectX, 2, 6, illegal),
    op!(Ldy, ZeroPage, 2, 3),
    op!(Lda, ZeroPage, 2, 3),
    op!(Ldx, ZeroPage, 2, 3),
    op!(Lax, ZeroPage, 2, 3, illegal),
    op!(Tay, Implied, 1, 2),
    op!(Lda, Immediate, 2, 2),
    op!(Tax, Implied, 1, 2),
    op!(Lax, Immediate, 2, 2, illegal),
    op!(Ldy, Absolute, 3, 4),
    op!(Lda, Absolute, 3, 4),
    op!(Ldx, Absolute, 3, 4),
    op!(Lax, Absolute, 3, 4, illegal),
    // 0xB0-0xBF
    op!(Bcs, Relative, 2, 2),
    op!(Lda, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Lax, IndirectY, 2, 5, illegal),
    op!(Ldy, ZeroPageX, 2, 4),
    op!(Lda, ZeroPageX, 2, 4),
    op!(Ldx, ZeroPageY, 2, 4),
    op!(Lax, ZeroPageY, 2, 4, illegal),
    op!(Clv, Implied, 1, 2),
    op!(Lda, AbsoluteY, 3, 4),
    op!(Tsx, Implied, 1, 2),
    op!(Las, AbsoluteY, 3, 4, illegal),
    op!(Ldy, AbsoluteX, 3, 4),
    op!(Lda, AbsoluteX, 3, 4),
    op!(Ldx, AbsoluteY, 3, 4),
    op!(Lax, AbsoluteY, 3, 4, illegal),
    // 0xC0-0xCF
    op!(Cpy, Immediate, 2, 2),
    op!(Cmp, IndirectX, 2, 6),
    op!(Nop, Immediate, 2, 2, illegal),
    op!(Dcp, IndirectX, 2, 8, illegal),
    op!(Cpy, ZeroPage, 2, 3),
    op!(Cmp, ZeroPage, 2, 3),
    op!(Dec, ZeroPage, 2, 5),
    op!(Dcp, ZeroPage, 2, 5, illegal),
    op!(Iny, Implied, 1, 2),
    op!(Cmp, Immediate, 2, 2),
    op!(Dex, Implied, 1, 2),
    op!(Axs, Immediate, 2, 2, illegal),
    op!(Cpy, Absolute, 3, 4),
    op!(Cmp, Absolute, 3, 4),
    op!(Dec, Absolute, 3, 6),
    op!(Dcp, Absolute, 3, 6, illegal),
    // 0xD0-0xDF
    op!(Bne, Relative, 2, 2),
    op!(Cmp, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Dcp, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(Cmp, ZeroPageX, 2, 4),
    op!(Dec, ZeroPageX, 2, 6),
    op!(Dcp, ZeroPageX, 2, 6, illegal),
    op!(Cld, Implied, 1, 2),
    op!(Cmp, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Dcp, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(Cmp, AbsoluteX, 3, 4),
    op!(Dec, AbsoluteX, 3, 7),
    op!(Dcp, AbsoluteX, 3, 7, illegal),
    // 0xE0-0xEF
    op!(Cpx, Immediate, 2, 2),
    op!(Sbc, IndirectX, 2, 6),
    op!(Nop, Immediate, 2, 2, illegal),
    op!(Isc, IndirectX, 2, 8, illegal),
    op!(Cpx, ZeroPage, 2, 3),
    op!(Sbc, ZeroPage, 2, 3),
    op!(Inc, ZeroPage, 2, 5),
    op!(Isc, ZeroPage, 2, 5, illegal),
    op!(Inx, Implied, 1, 2),
    op!(Sbc, Immediate, 2, 2),
    op!(Nop, Implied, 1, 2),
    op!(Sbc, Immediate, 2, 2, illegal),
    op!(Cpx, Absolute, 3, 4),
    op!(Sbc, Absolute, 3, 4),
    op!(Inc, Absolute, 3, 6),
    op!(Isc, Absolute, 3, 6, illegal),
    // 0xF0-0xFF
    op!(Beq, Relative, 2, 2),
    op!(Sbc, IndirectY, 2, 5),
    op!(Kil, Implied, 1, 0, illegal),
    op!(Isc, IndirectY, 2, 8, illegal),
    op!(Nop, ZeroPageX, 2, 4, illegal),
    op!(Sbc, ZeroPageX, 2, 4),
    op!(Inc, ZeroPageX, 2, 6),
    op!(Isc, ZeroPageX, 2, 6, illegal),
    op!(Sed, Implied, 1, 2),
    op!(Sbc, AbsoluteY, 3, 4),
    op!(Nop, Implied, 1, 2, illegal),
    op!(Isc, AbsoluteY, 3, 7, illegal),
    op!(Nop, AbsoluteX, 3, 4, illegal),
    op!(Sbc, AbsoluteX, 3, 4),
    op!(Inc, AbsoluteX, 3, 7),
    op!(Isc, AbsoluteX, 3, 7, illegal),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes_match_modes() {
        for (byte, op) in OPCODES.iter().enumerate() {
            let expected = match op.mode {
                Mode::Implied | Mode::Accumulator => 1,
                Mode::Immediate
                | Mode::ZeroPage
                | Mode::ZeroPageX
                | Mode::ZeroPageY
                | Mode::IndirectX
                | Mode::IndirectY
                | Mode::Relative => 2,
                Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 3,
            };
            assert_eq!(op.size, expected, "size mismatch for ${byte:02X}");
        }
    }

    #[test]
    fn documented_spot_checks() {
        assert_eq!(decode(0xA9).mnemonic, Mnemonic::Lda);
        assert_eq!(decode(0xA9).mode, Mode::Immediate);
        assert_eq!(decode(0x8D).mnemonic, Mnemonic::Sta);
        assert_eq!(decode(0x8D).cycles, 4);
        assert_eq!(decode(0x6C).mode, Mode::Indirect);
        assert_eq!(decode(0x60).mnemonic, Mnemonic::Rts);
        assert_eq!(decode(0x60).cycles, 6);
        assert!(!decode(0xEA).illegal);
    }

    #[test]
    fn indexed_stores_carry_fixed_penalty() {
        // STA abs,X / abs,Y always pay the page-cross cycle
        assert_eq!(decode(0x9D).cycles, 5);
        assert_eq!(decode(0x99).cycles, 5);
        assert_eq!(decode(0x91).cycles, 6);
    }

    #[test]
    fn illegal_spot_checks() {
        assert_eq!(decode(0xA7).mnemonic, Mnemonic::Lax);
        assert!(decode(0xA7).illegal);
        assert_eq!(decode(0x87).mnemonic, Mnemonic::Sax);
        assert_eq!(decode(0xC7).mnemonic, Mnemonic::Dcp);
        assert_eq!(decode(0xE7).mnemonic, Mnemonic::Isc);
        assert_eq!(decode(0x02).mnemonic, Mnemonic::Kil);
        assert_eq!(decode(0xCB).mnemonic, Mnemonic::Axs);
        // Undocumented SBC alias
        assert_eq!(decode(0xEB).mnemonic, Mnemonic::Sbc);
        assert!(decode(0xEB).illegal);
    }

    #[test]
    fn mnemonics_render_lowercase() {
        assert_eq!(Mnemonic::Lda.to_string(), "lda");
        assert_eq!(Mnemonic::Kil.to_string(), "kil");
    }
}
