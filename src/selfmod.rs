// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Self-modifying-code detection over the recorded execution log.
//!
//! Two phases after emulation ends: first every write that landed on an
//! operand byte of an executed instruction is collected from the memory
//! image's provenance arrays; then comparison instructions are grouped by
//! 32-byte region and correlated with nearby modifications, flagging the
//! pointer-test-then-patch idiom. Observed indirect pointers assembled
//! from immediate halves additionally yield operand fixups the relocator
//! applies when it rewrites the program at a new address.

use crate::cpu::Cpu;
use crate::cpu::opcodes;
use crate::memory::{Access, WriteSource};
use log::debug;
use std::collections::BTreeMap;
use std::ops::Range;

/// Comparisons are grouped into regions of this alignment.
const REGION_SIZE: u16 = 32;
/// Two comparisons this close are treated as one 16-bit pointer test.
const PAIR_DISTANCE: u16 = 20;
/// Modifications within this many bytes after a comparison pair belong
/// to its pattern.
const CORRELATION_WINDOW: u16 = 100;

/// A write that landed inside another instruction.
#[derive(Debug, Clone, Copy)]
pub struct ModificationRecord {
    /// The operand byte that was overwritten
    pub target: u16,
    /// First byte of the instruction being modified
    pub instr_start: u16,
    /// Offset within that instruction (1 = low byte, 2 = high byte)
    pub offset: u8,
    /// PC of the storing instruction
    pub writer_pc: u16,
    /// Provenance of the stored value
    pub source: WriteSource,
}

/// A comparison sequence correlated with the modifications it guards.
#[derive(Debug, Clone)]
pub struct ModificationPattern {
    /// PCs of the grouped comparison instructions
    pub comparison_pcs: Vec<u16>,
    /// Operand writes attributed to this pattern
    pub modifications: Vec<ModificationRecord>,
    /// First PC of the pattern
    pub start_pc: u16,
    /// Last PC of the pattern
    pub end_pc: u16,
}

/// How an immediate operand byte must be rewritten when the program
/// moves: as the low or high half of an address inside the footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFixup {
    /// Byte is the low half of the given address
    Lo(u16),
    /// Byte is the high half of the given address
    Hi(u16),
}

/// Result of the scan.
#[derive(Debug, Default)]
pub struct SelfModReport {
    /// All operand-byte writes found in the footprint
    pub modifications: Vec<ModificationRecord>,
    /// Comparison-guarded patterns
    pub patterns: Vec<ModificationPattern>,
    /// Immediate operand bytes that encode addresses, keyed by the
    /// address of the operand byte itself
    pub fixups: BTreeMap<u16, OperandFixup>,
}

/// Scans the finished execution log. `indirect_reads` carries the
/// `(pc, zero-page pointer, effective address)` events observed by the
/// driver.
pub fn analyze(cpu: &Cpu, footprint: Range<u16>, indirect_reads: &[(u16, u8, u16)]) -> SelfModReport {
    let mut report = SelfModReport::default();
    report.modifications = collect_modifications(cpu, &footprint);
    report.patterns = correlate(cpu, &report.modifications);
    report.fixups = pointer_fixups(cpu, &footprint, indirect_reads, &report.modifications);
    report
}

/// Phase one: writes that landed at offset 1 or 2 of an executed
/// instruction.
fn collect_modifications(cpu: &Cpu, footprint: &Range<u16>) -> Vec<ModificationRecord> {
    let mut records = Vec::new();
    let memory = cpu.memory();
    for addr in footprint.clone() {
        if !memory.access(addr).contains(Access::WRITE) {
            continue;
        }
        // Look back for the opcode byte whose instruction covers addr.
        for back in 1..=2u16 {
            let Some(start) = addr.checked_sub(back) else {
                break;
            };
            if !memory.access(start).contains(Access::OPCODE) {
                continue;
            }
            let size = u16::from(opcodes::decode(memory.peek(start)).size);
            if back < size {
                records.push(ModificationRecord {
                    target: addr,
                    instr_start: start,
                    offset: back as u8,
                    writer_pc: memory.last_writer(addr),
                    source: memory.write_source(addr),
                });
            }
            break;
        }
    }
    records
}

/// Phase two: group comparisons by region, pair the close ones, and
/// attach the modifications that follow within the correlation window.
fn correlate(cpu: &Cpu, modifications: &[ModificationRecord]) -> Vec<ModificationPattern> {
    let mut by_region: BTreeMap<u16, Vec<&crate::cpu::CompareRecord>> = BTreeMap::new();
    for rec in cpu.comparisons() {
        by_region.entry(rec.pc & !(REGION_SIZE - 1)).or_default().push(rec);
    }

    let mut patterns = Vec::new();
    for comps in by_region.values_mut() {
        comps.sort_by_key(|c| c.pc);
        for pair in comps.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.pc.wrapping_sub(a.pc) >= PAIR_DISTANCE {
                continue;
            }
            // Pointer tests compare against plausible address bytes.
            let pointerish = |v: u8| (0x10..=0x9F).contains(&v);
            if !pointerish(a.value) && !pointerish(b.value) {
                continue;
            }
            let start_pc = a.pc.min(b.pc);
            let mut end_pc = a.next_pc.max(b.next_pc);
            let guarded: Vec<ModificationRecord> = modifications
                .iter()
                .filter(|m| {
                    m.writer_pc >= end_pc && m.writer_pc <= end_pc.saturating_add(CORRELATION_WINDOW)
                })
                .copied()
                .collect();
            if guarded.is_empty() {
                continue;
            }
            debug!(
                "pointer test at ${:04X}/${:04X} against ${:02X}/${:02X} (sources {:?}/{:?})",
                a.pc, b.pc, a.value, b.value, a.source, b.source
            );
            for m in &guarded {
                end_pc = end_pc.max(m.writer_pc.saturating_add(3));
            }
            patterns.push(ModificationPattern {
                comparison_pcs: vec![a.pc, b.pc],
                modifications: guarded,
                start_pc,
                end_pc,
            });
        }
    }
    patterns
}

/// Derives `#<label` / `#>label` rewrites for immediates that build
/// addresses into the footprint, either through observed zero-page
/// pointers or by patching another instruction's absolute operand.
fn pointer_fixups(
    cpu: &Cpu,
    footprint: &Range<u16>,
    indirect_reads: &[(u16, u8, u16)],
    modifications: &[ModificationRecord],
) -> BTreeMap<u16, OperandFixup> {
    let memory = cpu.memory();
    let mut fixups = BTreeMap::new();

    // Zero-page pointers: the pointer target was actually dereferenced,
    // so both halves are known good.
    for &(_, zp, target) in indirect_reads {
        if !footprint.contains(&target) {
            continue;
        }
        let zp_lo = u16::from(zp);
        let zp_hi = u16::from(zp.wrapping_add(1));
        if let WriteSource::Immediate { value, operand } = memory.write_source(zp_lo) {
            if value == (target & 0xFF) as u8 && footprint.contains(&operand) {
                fixups.insert(operand, OperandFixup::Lo(target));
            }
        }
        if let WriteSource::Immediate { value, operand } = memory.write_source(zp_hi) {
            if value == (target >> 8) as u8 && footprint.contains(&operand) {
                fixups.insert(operand, OperandFixup::Hi(target));
            }
        }
    }

    // Patched absolute operands: combine the written half with the other
    // operand byte of the patched instruction (post-restore, so the other
    // byte holds its load-time value unless it was patched too).
    for m in modifications {
        let WriteSource::Immediate { value, operand } = m.source else {
            continue;
        };
        if !footprint.contains(&operand) {
            continue;
        }
        let op = opcodes::decode(memory.peek(m.instr_start));
        if op.size != 3 {
            continue;
        }
        let (lo, hi) = match m.offset {
            1 => (value, other_half(memory, modifications, m.instr_start.wrapping_add(2))),
            _ => (other_half(memory, modifications, m.instr_start.wrapping_add(1)), value),
        };
        let target = u16::from_le_bytes([lo, hi]);
        if footprint.contains(&target) {
            let fixup = if m.offset == 1 {
                OperandFixup::Lo(target)
            } else {
                OperandFixup::Hi(target)
            };
            fixups.insert(operand, fixup);
        }
    }

    fixups
}

/// The companion operand byte: its written value when it was patched
/// from an immediate too, otherwise the clean in-memory byte.
fn other_half(
    memory: &crate::memory::MemoryImage,
    modifications: &[ModificationRecord],
    addr: u16,
) -> u8 {
    for m in modifications {
        if m.target == addr {
            if let WriteSource::Immediate { value, .. } = m.source {
                return value;
            }
        }
    }
    memory.peek(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Cpu;

    /// Runs a program at $1000 until its final RTS.
    fn run(program: &[u8]) -> (Cpu, Vec<(u16, u8, u16)>) {
        use std::cell::RefCell;
        use std::rc::Rc;
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, program);
        let reads = Rc::new(RefCell::new(Vec::new()));
        let sink = reads.clone();
        cpu.set_indirect_read_hook(Box::new(move |pc, zp, target| {
            sink.borrow_mut().push((pc, zp, target));
        }));
        cpu.execute_function(0x1000).expect("program runs");
        cpu.clear_hooks();
        let reads = Rc::try_unwrap(reads).ok().expect("sole owner").into_inner();
        (cpu, reads)
    }

    #[test]
    fn operand_write_is_detected() {
        // lda #$22 / sta $100c / ... / lda $2000 at $100b (operand patched)
        let program = [
            0xA9, 0x22, // lda #$22
            0x8D, 0x0C, 0x10, // sta $100c (low operand byte of the lda below)
            0x60, 0x60, 0x60, 0x60, 0x60, 0x60, // filler
            0xAD, 0x00, 0x20, // $100b: lda $2000
            0x60, // rts
        ];
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &program);
        cpu.execute_function(0x1000).expect("first part");
        // Execute the patched instruction so its opcode byte is marked.
        cpu.execute_function(0x100B).expect("patched lda");
        let report = analyze(&cpu, 0x1000..0x1010, &[]);
        let m = report
            .modifications
            .iter()
            .find(|m| m.target == 0x100C)
            .expect("modification found");
        assert_eq!(m.instr_start, 0x100B);
        assert_eq!(m.offset, 1);
        assert_eq!(m.writer_pc, 0x1002);
    }

    #[test]
    fn immediate_pointer_halves_get_fixups() {
        // lda #$34 / sta $fb / lda #$10 / sta $fc / ldy #$00 / lda ($fb),y / rts
        // The pointer $1034 lands inside the footprint.
        let program = [
            0xA9, 0x34, 0x85, 0xFB, // lda #$34 / sta $fb
            0xA9, 0x10, 0x85, 0xFC, // lda #$10 / sta $fc
            0xA0, 0x00, // ldy #$00
            0xB1, 0xFB, // lda ($fb),y
            0x60, // rts
        ];
        let (cpu, reads) = run(&program);
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].2, 0x1034);
        let report = analyze(&cpu, 0x1000..0x1100, &reads);
        assert_eq!(report.fixups.get(&0x1001), Some(&OperandFixup::Lo(0x1034)));
        assert_eq!(report.fixups.get(&0x1005), Some(&OperandFixup::Hi(0x1034)));
    }

    #[test]
    fn pointer_outside_footprint_is_ignored() {
        let program = [
            0xA9, 0x00, 0x85, 0xFB, // lda #$00 / sta $fb
            0xA9, 0xC0, 0x85, 0xFC, // lda #$c0 / sta $fc -> pointer $c000
            0xA0, 0x00, 0xB1, 0xFB, // ldy #$00 / lda ($fb),y
            0x60,
        ];
        let (cpu, reads) = run(&program);
        let report = analyze(&cpu, 0x1000..0x1100, &reads);
        assert!(report.fixups.is_empty());
    }

    #[test]
    fn comparison_guarded_patch_forms_a_pattern() {
        // Compare both pointer halves, then patch an operand byte:
        // lda $fb / cmp #$10 / bne +0 / lda $fc / cmp #$20 / bne +0 /
        // lda #$40 / sta $1019 / ... $1018: lda $2000 / rts
        let program = [
            0xA5, 0xFB, // $1000: lda $fb
            0xC9, 0x10, // $1002: cmp #$10
            0xD0, 0x00, // $1004: bne +0
            0xA5, 0xFC, // $1006: lda $fc
            0xC9, 0x20, // $1008: cmp #$20
            0xD0, 0x00, // $100a: bne +0
            0xA9, 0x40, // $100c: lda #$40
            0x8D, 0x19, 0x10, // $100e: sta $1019
            0x60, 0x60, 0x60, 0x60, 0x60, 0x60, 0x60, // filler to $1018
            0xAD, 0x00, 0x20, // $1018: lda $2000
            0x60, // rts
        ];
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x1000, &program);
        cpu.execute_function(0x1000).expect("guard code");
        cpu.execute_function(0x1018).expect("patched lda");
        let report = analyze(&cpu, 0x1000..0x1020, &[]);
        let pattern = report.patterns.first().expect("pattern detected");
        assert_eq!(pattern.comparison_pcs, vec![0x1002, 0x1008]);
        assert_eq!(pattern.modifications.len(), 1);
        assert_eq!(pattern.modifications[0].target, 0x1019);
    }

    #[test]
    fn patched_absolute_operand_yields_fixup() {
        // The immediate $08 is stored over the high operand byte of the
        // lda at $0809, turning it into lda $0800 inside the footprint.
        let program = [
            0xA9, 0x08, // lda #$08
            0x8D, 0x0B, 0x08, // sta $080b (high byte of operand below)
            0x60, 0x60, 0x60, 0x60, // filler
            0xAD, 0x00, 0x20, // $0809: lda $2000 -> patched to lda $0800
            0x60, // rts
        ];
        let mut cpu = Cpu::new();
        cpu.memory_mut().bulk_load(0x0800, &program);
        cpu.execute_function(0x0800).expect("patch");
        cpu.execute_function(0x0809).expect("patched lda");
        let report = analyze(&cpu, 0x0800..0x0900, &[]);
        // Patched operand $080b: immediate $08 is the high half of $0800
        assert_eq!(report.fixups.get(&0x0801), Some(&OperandFixup::Hi(0x0800)));
    }
}
