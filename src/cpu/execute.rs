// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Per-opcode semantics.
//!
//! Cycle accounting: the table's base count plus a page-cross penalty for
//! read-type indexed accesses (indexed stores and read-modify-writes
//! already carry the penalty in their base count, as on real silicon)
//! plus branch penalties (+1 taken, +1 more when the branch crosses a
//! page). Arithmetic is binary-only: the D flag is kept but never
//! consulted, a documented limitation.

use super::opcodes::{Mnemonic, Mode, Opcode};
use super::{CompareRecord, Cpu, Origin, Status};
use crate::memory::WriteSource;

impl Cpu {
    /// Executes one decoded instruction. PC sits just past the opcode
    /// byte; operand fetches advance it the rest of the way.
    pub(crate) fn execute(&mut self, op: &Opcode) {
        use Mnemonic::*;
        let mut cycles = u64::from(op.cycles);

        match op.mnemonic {
            // --- loads ----------------------------------------------------
            Lda => {
                let (v, crossed, origin) = self.load_value(op.mode);
                self.a = v;
                self.origin_a = origin;
                self.set_zn(v);
                cycles += u64::from(crossed);
            }
            Ldx => {
                let (v, crossed, origin) = self.load_value(op.mode);
                self.x = v;
                self.origin_x = origin;
                self.set_zn(v);
                cycles += u64::from(crossed);
            }
            Ldy => {
                let (v, crossed, origin) = self.load_value(op.mode);
                self.y = v;
                self.origin_y = origin;
                self.set_zn(v);
                cycles += u64::from(crossed);
            }
            Lax => {
                let (v, crossed, origin) = self.load_value(op.mode);
                self.a = v;
                self.x = v;
                self.origin_a = origin;
                self.origin_x = origin;
                self.set_zn(v);
                cycles += u64::from(crossed);
            }

            // --- stores ---------------------------------------------------
            Sta => {
                let addr = self.resolve(op.mode).addr;
                let src = self.store_source(self.origin_a, WriteSource::RegA(self.instr_pc));
                self.write_tracked(addr, self.a, src);
            }
            Stx => {
                let addr = self.resolve(op.mode).addr;
                let src = self.store_source(self.origin_x, WriteSource::RegX(self.instr_pc));
                self.write_tracked(addr, self.x, src);
            }
            Sty => {
                let addr = self.resolve(op.mode).addr;
                let src = self.store_source(self.origin_y, WriteSource::RegY(self.instr_pc));
                self.write_tracked(addr, self.y, src);
            }
            Sax => {
                let addr = self.resolve(op.mode).addr;
                let value = self.a & self.x;
                self.write_tracked(addr, value, WriteSource::RegA(self.instr_pc));
            }

            // --- transfers ------------------------------------------------
            Tax => {
                self.x = self.a;
                self.origin_x = self.origin_a;
                self.set_zn(self.x);
            }
            Tay => {
                self.y = self.a;
                self.origin_y = self.origin_a;
                self.set_zn(self.y);
            }
            Txa => {
                self.a = self.x;
                self.origin_a = self.origin_x;
                self.set_zn(self.a);
            }
            Tya => {
                self.a = self.y;
                self.origin_a = self.origin_y;
                self.set_zn(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.origin_x = Origin::Unknown;
                self.set_zn(self.x);
            }
            Txs => self.sp = self.x,

            // --- arithmetic -----------------------------------------------
            Adc => {
                let (v, crossed, _) = self.load_value(op.mode);
                self.adc(v);
                cycles += u64::from(crossed);
            }
            Sbc => {
                let (v, crossed, _) = self.load_value(op.mode);
                self.sbc(v);
                cycles += u64::from(crossed);
            }
            Cmp => {
                let (v, crossed, origin) = self.load_value(op.mode);
                self.compare(self.a, v, origin);
                cycles += u64::from(crossed);
            }
            Cpx => {
                let (v, _, origin) = self.load_value(op.mode);
                self.compare(self.x, v, origin);
            }
            Cpy => {
                let (v, _, origin) = self.load_value(op.mode);
                self.compare(self.y, v, origin);
            }

            Inc => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr).wrapping_add(1);
                self.write_rmw(addr, v);
                self.set_zn(v);
            }
            Dec => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr).wrapping_sub(1);
                self.write_rmw(addr, v);
                self.set_zn(v);
            }
            Inx => {
                self.x = self.x.wrapping_add(1);
                self.origin_x = Origin::Unknown;
                self.set_zn(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.origin_y = Origin::Unknown;
                self.set_zn(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.origin_x = Origin::Unknown;
                self.set_zn(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.origin_y = Origin::Unknown;
                self.set_zn(self.y);
            }

            // --- logic ----------------------------------------------------
            And => {
                let (v, crossed, _) = self.load_value(op.mode);
                self.a &= v;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
                cycles += u64::from(crossed);
            }
            Ora => {
                let (v, crossed, _) = self.load_value(op.mode);
                self.a |= v;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
                cycles += u64::from(crossed);
            }
            Eor => {
                let (v, crossed, _) = self.load_value(op.mode);
                self.a ^= v;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
                cycles += u64::from(crossed);
            }
            Bit => {
                let (v, _, _) = self.load_value(op.mode);
                self.status.set(Status::Z, self.a & v == 0);
                self.status.set(Status::N, v & 0x80 != 0);
                self.status.set(Status::V, v & 0x40 != 0);
            }

            // --- shifts and rotates --------------------------------------
            Asl => {
                if op.mode == Mode::Accumulator {
                    self.status.set(Status::C, self.a & 0x80 != 0);
                    self.a <<= 1;
                    self.origin_a = Origin::Unknown;
                    self.set_zn(self.a);
                } else {
                    let addr = self.resolve(op.mode).addr;
                    let v = self.read_memory(addr);
                    self.status.set(Status::C, v & 0x80 != 0);
                    let res = v << 1;
                    self.write_rmw(addr, res);
                    self.set_zn(res);
                }
            }
            Lsr => {
                if op.mode == Mode::Accumulator {
                    self.status.set(Status::C, self.a & 0x01 != 0);
                    self.a >>= 1;
                    self.origin_a = Origin::Unknown;
                    self.set_zn(self.a);
                } else {
                    let addr = self.resolve(op.mode).addr;
                    let v = self.read_memory(addr);
                    self.status.set(Status::C, v & 0x01 != 0);
                    let res = v >> 1;
                    self.write_rmw(addr, res);
                    self.set_zn(res);
                }
            }
            Rol => {
                let carry_in = u8::from(self.status.contains(Status::C));
                if op.mode == Mode::Accumulator {
                    self.status.set(Status::C, self.a & 0x80 != 0);
                    self.a = (self.a << 1) | carry_in;
                    self.origin_a = Origin::Unknown;
                    self.set_zn(self.a);
                } else {
                    let addr = self.resolve(op.mode).addr;
                    let v = self.read_memory(addr);
                    self.status.set(Status::C, v & 0x80 != 0);
                    let res = (v << 1) | carry_in;
                    self.write_rmw(addr, res);
                    self.set_zn(res);
                }
            }
            Ror => {
                let carry_in = u8::from(self.status.contains(Status::C)) << 7;
                if op.mode == Mode::Accumulator {
                    self.status.set(Status::C, self.a & 0x01 != 0);
                    self.a = (self.a >> 1) | carry_in;
                    self.origin_a = Origin::Unknown;
                    self.set_zn(self.a);
                } else {
                    let addr = self.resolve(op.mode).addr;
                    let v = self.read_memory(addr);
                    self.status.set(Status::C, v & 0x01 != 0);
                    let res = (v >> 1) | carry_in;
                    self.write_rmw(addr, res);
                    self.set_zn(res);
                }
            }

            // --- branches -------------------------------------------------
            Bpl => self.branch(!self.status.contains(Status::N), &mut cycles),
            Bmi => self.branch(self.status.contains(Status::N), &mut cycles),
            Bvc => self.branch(!self.status.contains(Status::V), &mut cycles),
            Bvs => self.branch(self.status.contains(Status::V), &mut cycles),
            Bcc => self.branch(!self.status.contains(Status::C), &mut cycles),
            Bcs => self.branch(self.status.contains(Status::C), &mut cycles),
            Bne => self.branch(!self.status.contains(Status::Z), &mut cycles),
            Beq => self.branch(self.status.contains(Status::Z), &mut cycles),

            // --- jumps and returns ---------------------------------------
            Jmp => {
                let target = match op.mode {
                    Mode::Absolute => self.fetch_operand_word(),
                    _ => self.resolve(Mode::Indirect).addr,
                };
                self.memory_mut().mark_jump_target(target);
                self.pc = target;
            }
            Jsr => {
                let target = self.fetch_operand_word();
                let ret = self.pc.wrapping_sub(1);
                self.push_raw((ret >> 8) as u8);
                self.push_raw((ret & 0xFF) as u8);
                self.memory_mut().mark_jump_target(target);
                self.pc = target;
            }
            Rts => {
                let lo = self.pop();
                let hi = self.pop();
                self.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            Rti => {
                let p = self.pop();
                self.status = (Status::from_bits_retain(p) - Status::B) | Status::U;
                let lo = self.pop();
                let hi = self.pop();
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            Brk => {
                self.fetch_operand_byte(); // padding byte
                let ret = self.pc;
                self.push_raw((ret >> 8) as u8);
                self.push_raw((ret & 0xFF) as u8);
                self.push_raw((self.status | Status::B | Status::U).bits());
                self.status.insert(Status::I);
                let lo = self.read_memory(0xFFFE);
                let hi = self.read_memory(0xFFFF);
                self.pc = u16::from_le_bytes([lo, hi]);
            }

            // --- stack ----------------------------------------------------
            Pha => self.push_raw(self.a),
            Php => self.push_raw((self.status | Status::B | Status::U).bits()),
            Pla => {
                self.a = self.pop();
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Plp => {
                let p = self.pop();
                self.status = (Status::from_bits_retain(p) - Status::B) | Status::U;
            }

            // --- flag toggles ---------------------------------------------
            Clc => self.status.remove(Status::C),
            Sec => self.status.insert(Status::C),
            Cli => self.status.remove(Status::I),
            Sei => self.status.insert(Status::I),
            Clv => self.status.remove(Status::V),
            Cld => self.status.remove(Status::D),
            Sed => self.status.insert(Status::D),

            // --- undocumented read-modify-writes -------------------------
            Slo => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr);
                self.status.set(Status::C, v & 0x80 != 0);
                let res = v << 1;
                self.write_rmw(addr, res);
                self.a |= res;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Rla => {
                let carry_in = u8::from(self.status.contains(Status::C));
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr);
                self.status.set(Status::C, v & 0x80 != 0);
                let res = (v << 1) | carry_in;
                self.write_rmw(addr, res);
                self.a &= res;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Sre => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr);
                self.status.set(Status::C, v & 0x01 != 0);
                let res = v >> 1;
                self.write_rmw(addr, res);
                self.a ^= res;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Rra => {
                let carry_in = u8::from(self.status.contains(Status::C)) << 7;
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr);
                self.status.set(Status::C, v & 0x01 != 0);
                let res = (v >> 1) | carry_in;
                self.write_rmw(addr, res);
                self.adc(res);
            }
            Dcp => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr).wrapping_sub(1);
                self.write_rmw(addr, v);
                self.compare(self.a, v, Origin::Memory(addr));
            }
            Isc => {
                let addr = self.resolve(op.mode).addr;
                let v = self.read_memory(addr).wrapping_add(1);
                self.write_rmw(addr, v);
                self.sbc(v);
            }

            // --- undocumented immediates ---------------------------------
            Anc => {
                let (v, _, _) = self.load_value(Mode::Immediate);
                self.a &= v;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
                self.status.set(Status::C, self.a & 0x80 != 0);
            }
            Alr => {
                let (v, _, _) = self.load_value(Mode::Immediate);
                self.a &= v;
                self.status.set(Status::C, self.a & 0x01 != 0);
                self.a >>= 1;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Arr => {
                let (v, _, _) = self.load_value(Mode::Immediate);
                let carry_in = u8::from(self.status.contains(Status::C)) << 7;
                let res = ((self.a & v) >> 1) | carry_in;
                self.status.set(Status::C, res & 0x40 != 0);
                self.status
                    .set(Status::V, ((res >> 6) ^ (res >> 5)) & 1 != 0);
                self.a = res;
                self.origin_a = Origin::Unknown;
                self.set_zn(res);
            }
            Xaa => {
                // Unstable on real silicon; the common A = X & imm model.
                let (v, _, _) = self.load_value(Mode::Immediate);
                self.a = self.x & v;
                self.origin_a = Origin::Unknown;
                self.set_zn(self.a);
            }
            Axs => {
                let (v, _, _) = self.load_value(Mode::Immediate);
                let base = self.a & self.x;
                self.status.set(Status::C, base >= v);
                self.x = base.wrapping_sub(v);
                self.origin_x = Origin::Unknown;
                self.set_zn(self.x);
            }

            // --- undocumented high-byte stores ---------------------------
            Ahx => {
                let addr = self.resolve(op.mode).addr;
                let value = self.a & self.x & ((addr >> 8) as u8).wrapping_add(1);
                self.write_tracked(addr, value, WriteSource::RegA(self.instr_pc));
            }
            Shy => {
                let addr = self.resolve(op.mode).addr;
                let value = self.y & ((addr >> 8) as u8).wrapping_add(1);
                self.write_tracked(addr, value, WriteSource::RegY(self.instr_pc));
            }
            Shx => {
                let addr = self.resolve(op.mode).addr;
                let value = self.x & ((addr >> 8) as u8).wrapping_add(1);
                self.write_tracked(addr, value, WriteSource::RegX(self.instr_pc));
            }
            Tas => {
                let addr = self.resolve(op.mode).addr;
                self.sp = self.a & self.x;
                let value = self.sp & ((addr >> 8) as u8).wrapping_add(1);
                self.write_tracked(addr, value, WriteSource::RegA(self.instr_pc));
            }
            Las => {
                let (v, crossed, _) = self.load_value(op.mode);
                let res = v & self.sp;
                self.a = res;
                self.x = res;
                self.sp = res;
                self.origin_a = Origin::Unknown;
                self.origin_x = Origin::Unknown;
                self.set_zn(res);
                cycles += u64::from(crossed);
            }

            // --- no-ops ---------------------------------------------------
            Nop => match op.mode {
                Mode::Implied => {}
                Mode::Immediate => {
                    self.fetch_operand_byte();
                }
                _ => {
                    let r = self.resolve(op.mode);
                    self.read_memory(r.addr);
                    cycles += u64::from(r.page_crossed);
                }
            },

            // Trapped in `step` before dispatch.
            Kil => unreachable!("kil is rejected before execution"),
        }

        self.cycles += cycles;
    }

    /// Fetches the operand value for a read-type instruction, reporting
    /// page crossings and the value's provenance.
    fn load_value(&mut self, mode: Mode) -> (u8, bool, Origin) {
        match mode {
            Mode::Immediate => {
                let operand = self.pc;
                let value = self.fetch_operand_byte();
                (value, false, Origin::Immediate { value, operand })
            }
            _ => {
                let r = self.resolve(mode);
                let value = self.read_memory(r.addr);
                (value, r.page_crossed, Origin::Memory(r.addr))
            }
        }
    }

    /// Read-modify-write writeback; the new value derives from the cell
    /// itself.
    fn write_rmw(&mut self, addr: u16, value: u8) {
        self.write_tracked(
            addr,
            value,
            WriteSource::Memory {
                src: addr,
                pc: self.instr_pc,
            },
        );
    }

    fn adc(&mut self, v: u8) {
        let carry = u16::from(self.status.contains(Status::C));
        let sum = u16::from(self.a) + u16::from(v) + carry;
        let result = sum as u8;
        self.status.set(Status::C, sum > 0xFF);
        self.status
            .set(Status::V, (self.a ^ result) & (v ^ result) & 0x80 != 0);
        self.a = result;
        self.origin_a = Origin::Unknown;
        self.set_zn(result);
    }

    fn sbc(&mut self, v: u8) {
        let borrow = u16::from(!self.status.contains(Status::C));
        let diff = u16::from(self.a)
            .wrapping_sub(u16::from(v))
            .wrapping_sub(borrow);
        let result = diff as u8;
        self.status.set(Status::C, diff < 0x100);
        self.status
            .set(Status::V, (self.a ^ result) & (!v ^ result) & 0x80 != 0);
        self.a = result;
        self.origin_a = Origin::Unknown;
        self.set_zn(result);
    }

    fn compare(&mut self, reg: u8, v: u8, origin: Origin) {
        self.status.set(Status::C, reg >= v);
        self.set_zn(reg.wrapping_sub(v));
        let source = match origin {
            Origin::Memory(addr) => Some(addr),
            _ => None,
        };
        self.record_comparison(CompareRecord {
            pc: self.instr_pc,
            value: v,
            source,
            next_pc: self.pc,
        });
    }

    fn branch(&mut self, taken: bool, cycles: &mut u64) {
        let offset = self.fetch_operand_byte() as i8;
        if taken {
            let target = self.pc.wrapping_add(offset as u16);
            *cycles += 1;
            if (target & 0xFF00) != (self.pc & 0xFF00) {
                *cycles += 1;
            }
            self.memory_mut().mark_jump_target(target);
            self.pc = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Access;

    /// Loads a program at $1000 and steps through `steps` instructions.
    fn run(program: &[u8], steps: usize) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, program);
        cpu.pc = 0x1000;
        for _ in 0..steps {
            cpu.step().expect("step");
        }
        cpu
    }

    #[test]
    fn lda_immediate_sets_zn() {
        let cpu = run(&[0xA9, 0x00], 1);
        assert_eq!(cpu.a, 0);
        assert!(cpu.status.contains(Status::Z));
        let cpu = run(&[0xA9, 0x80], 1);
        assert!(cpu.status.contains(Status::N));
        assert_eq!(cpu.cycles, 2);
    }

    #[test]
    fn page_cross_costs_a_cycle() {
        // lda $10ff,x with x=1: effective $1100, 4 + 1 cycles
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0xBD, 0xFF, 0x10]);
        cpu.pc = 0x1000;
        cpu.x = 1;
        cpu.step().expect("step");
        assert_eq!(cpu.cycles, 5);
        assert!(cpu.memory().access(0x1100).contains(Access::READ));
    }

    #[test]
    fn indexed_store_pays_fixed_penalty() {
        // sta $1080,x with x=0: no crossing, still 5 cycles
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0x9D, 0x80, 0x10]);
        cpu.pc = 0x1000;
        cpu.step().expect("step");
        assert_eq!(cpu.cycles, 5);
    }

    #[test]
    fn adc_stays_binary_with_decimal_flag_set() {
        // sed / lda #$09 / clc / adc #$01 -> binary $0A, not BCD $10
        let cpu = run(&[0xF8, 0xA9, 0x09, 0x18, 0x69, 0x01], 4);
        assert_eq!(cpu.a, 0x0A);
        assert!(cpu.status.contains(Status::D));
    }

    #[test]
    fn adc_sets_carry_and_overflow() {
        // lda #$7f / clc / adc #$01: signed overflow
        let cpu = run(&[0xA9, 0x7F, 0x18, 0x69, 0x01], 3);
        assert_eq!(cpu.a, 0x80);
        assert!(cpu.status.contains(Status::V));
        assert!(!cpu.status.contains(Status::C));
        // lda #$ff / sec / adc #$01: carry out
        let cpu = run(&[0xA9, 0xFF, 0x38, 0x69, 0x01], 3);
        assert_eq!(cpu.a, 0x01);
        assert!(cpu.status.contains(Status::C));
    }

    #[test]
    fn sbc_carry_means_no_borrow() {
        // lda #$05 / sec / sbc #$03
        let cpu = run(&[0xA9, 0x05, 0x38, 0xE9, 0x03], 3);
        assert_eq!(cpu.a, 0x02);
        assert!(cpu.status.contains(Status::C));
        // lda #$03 / sec / sbc #$05: borrow
        let cpu = run(&[0xA9, 0x03, 0x38, 0xE9, 0x05], 3);
        assert_eq!(cpu.a, 0xFE);
        assert!(!cpu.status.contains(Status::C));
    }

    #[test]
    fn branch_cycle_penalties() {
        // beq not taken: 2 cycles
        let cpu = run(&[0xA9, 0x01, 0xF0, 0x10], 2);
        assert_eq!(cpu.cycles, 2 + 2);
        // bne taken, same page: 3 cycles
        let cpu = run(&[0xA9, 0x01, 0xD0, 0x10], 2);
        assert_eq!(cpu.cycles, 2 + 3);
        // bne taken across a page: 4 cycles
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x10F0, &[0xA9, 0x01, 0xD0, 0x20]);
        cpu.pc = 0x10F0;
        cpu.step().expect("lda");
        cpu.step().expect("bne");
        assert_eq!(cpu.pc, 0x1114);
        assert_eq!(cpu.cycles, 2 + 4);
    }

    #[test]
    fn branch_target_is_marked() {
        let cpu = run(&[0xA9, 0x01, 0xD0, 0x02], 2);
        assert!(cpu.memory().access(0x1006).contains(Access::JUMP_TARGET));
    }

    #[test]
    fn jsr_pushes_return_minus_one() {
        let mut cpu = run(&[0x20, 0x34, 0x12], 1);
        assert_eq!(cpu.pc, 0x1234);
        // popped in RTS order: lo then hi of $1002
        assert_eq!(cpu.pop(), 0x02);
        assert_eq!(cpu.pop(), 0x10);
    }

    #[test]
    fn rts_jumps_to_popped_plus_one() {
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0x60]);
        cpu.pc = 0x1000;
        cpu.push_raw(0x12);
        cpu.push_raw(0x33);
        cpu.step().expect("rts");
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn indirect_jmp_uses_page_wrap() {
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0x6C, 0xFF, 0x10]);
        cpu.memory_mut().poke(0x10FF, 0x34);
        cpu.memory_mut().poke(0x1000, 0x6C); // high byte from $1000, not $1100
        cpu.memory_mut().poke(0x1100, 0x99);
        cpu.pc = 0x1000;
        cpu.step().expect("jmp");
        assert_eq!(cpu.pc, 0x6C34);
        assert_eq!(cpu.cycles, 5);
    }

    #[test]
    fn brk_pushes_and_vectors() {
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0x00]);
        cpu.memory_mut().poke(0xFFFE, 0x00);
        cpu.memory_mut().poke(0xFFFF, 0x80);
        cpu.pc = 0x1000;
        cpu.step().expect("brk");
        assert_eq!(cpu.pc, 0x8000);
        assert!(cpu.status.contains(Status::I));
        let flags = cpu.pop();
        assert!(Status::from_bits_retain(flags).contains(Status::B));
        assert_eq!(cpu.pop(), 0x02); // return lo: $1002
        assert_eq!(cpu.pop(), 0x10);
    }

    #[test]
    fn php_plp_roundtrip_preserves_flags() {
        // sec / php / clc / plp
        let cpu = run(&[0x38, 0x08, 0x18, 0x28], 4);
        assert!(cpu.status.contains(Status::C));
        assert!(cpu.status.contains(Status::U));
        assert!(!cpu.status.contains(Status::B));
    }

    #[test]
    fn immediate_store_records_operand_provenance() {
        // lda #$34 / sta $20
        let cpu = run(&[0xA9, 0x34, 0x85, 0x20], 2);
        assert_eq!(
            cpu.memory().write_source(0x0020),
            WriteSource::Immediate {
                value: 0x34,
                operand: 0x1001
            }
        );
        assert_eq!(cpu.memory().last_writer(0x0020), 0x1002);
    }

    #[test]
    fn memory_copy_records_flow_source() {
        // lda $2000 / sta $3000
        let mut cpu = Cpu::new();
        cpu.memory_mut()
            .bulk_load(0x1000, &[0xAD, 0x00, 0x20, 0x8D, 0x00, 0x30]);
        cpu.memory_mut().poke(0x2000, 0x55);
        cpu.pc = 0x1000;
        cpu.step().expect("lda");
        cpu.step().expect("sta");
        assert_eq!(cpu.memory().peek(0x3000), 0x55);
        assert_eq!(
            cpu.memory().write_source(0x3000),
            WriteSource::Memory {
                src: 0x2000,
                pc: 0x1003
            }
        );
    }

    #[test]
    fn computed_store_falls_back_to_register_source() {
        // lda #$10 / asl / sta $20
        let cpu = run(&[0xA9, 0x10, 0x0A, 0x85, 0x20], 3);
        assert_eq!(
            cpu.memory().write_source(0x0020),
            WriteSource::RegA(0x1003)
        );
    }

    #[test]
    fn lax_loads_both_registers() {
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0xA7, 0x20]);
        cpu.memory_mut().poke(0x0020, 0x5A);
        cpu.pc = 0x1000;
        cpu.step().expect("lax");
        assert_eq!(cpu.a, 0x5A);
        assert_eq!(cpu.x, 0x5A);
        assert_eq!(cpu.cycles, 3);
    }

    #[test]
    fn sax_stores_a_and_x() {
        // lda #$f0 / ldx #$3c / sax $20
        let cpu = run(&[0xA9, 0xF0, 0xA2, 0x3C, 0x87, 0x20], 3);
        assert_eq!(cpu.memory().peek(0x0020), 0x30);
    }

    #[test]
    fn dcp_decrements_then_compares() {
        // lda #$41 / dcp $20 (with $20 = $42 -> $41, compare equal)
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0xA9, 0x41, 0xC7, 0x20]);
        cpu.memory_mut().poke(0x0020, 0x42);
        cpu.pc = 0x1000;
        cpu.step().expect("lda");
        cpu.step().expect("dcp");
        assert_eq!(cpu.memory().peek(0x0020), 0x41);
        assert!(cpu.status.contains(Status::Z));
        assert!(cpu.status.contains(Status::C));
    }

    #[test]
    fn isc_increments_then_subtracts() {
        // sec / lda #$10 / isc $20 (with $20 = $04 -> $05, a = $0b)
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &[0x38, 0xA9, 0x10, 0xE7, 0x20]);
        cpu.memory_mut().poke(0x0020, 0x04);
        cpu.pc = 0x1000;
        for _ in 0..3 {
            cpu.step().expect("step");
        }
        assert_eq!(cpu.memory().peek(0x0020), 0x05);
        assert_eq!(cpu.a, 0x0B);
    }

    #[test]
    fn axs_subtracts_from_a_and_x() {
        // lda #$f0 / ldx #$3c / axs #$10 -> x = $30 - $10 = $20
        let cpu = run(&[0xA9, 0xF0, 0xA2, 0x3C, 0xCB, 0x10], 3);
        assert_eq!(cpu.x, 0x20);
        assert!(cpu.status.contains(Status::C));
    }

    #[test]
    fn nop_aliases_consume_bytes_and_cycles() {
        // nop $20 (zp, 3 cycles) then nop #$01 (2 cycles)
        let cpu = run(&[0x04, 0x20, 0x80, 0x01], 2);
        assert_eq!(cpu.pc, 0x1004);
        assert_eq!(cpu.cycles, 5);
    }

    #[test]
    fn cmp_records_comparison_for_selfmod_scan() {
        let cpu = run(&[0xA9, 0x20, 0xC9, 0x18], 2);
        let rec = cpu
            .comparisons()
            .find(|r| r.pc == 0x1002)
            .expect("comparison recorded");
        assert_eq!(rec.value, 0x18);
        assert_eq!(rec.source, None);
        assert_eq!(rec.next_pc, 0x1004);
    }

    #[test]
    fn cycle_totals_accumulate_per_instruction() {
        // lda #$01 (2) + sta $20 (3) + inc $20 (5)
        let cpu = run(&[0xA9, 0x01, 0x85, 0x20, 0xE6, 0x20], 3);
        assert_eq!(cpu.cycles, 10);
        assert_eq!(cpu.memory().peek(0x0020), 0x02);
    }
}
