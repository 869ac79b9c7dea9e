// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Execution-guided disassembly.
//!
//! Pass one walks the footprint: bytes the emulator marked as opcode
//! starts become instruction heads, their trailing bytes operands, and
//! everything else data. Pass two emits KickAss-style source in which
//! absolute references into the footprint become `LNNNN` labels, so
//! assembling at a different base address relocates every internal
//! reference while leaving I/O and external RAM references untouched.

use crate::cpu::Cpu;
use crate::cpu::opcodes::{self, Mode};
use crate::memory::Access;
use crate::selfmod::OperandFixup;
use crate::sid_file::SidFile;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Runs of at least this many never-touched bytes become `.fill` padding.
const PAD_RUN: usize = 16;
/// Data bytes per `.byte` row.
const BYTES_PER_ROW: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteKind {
    OpcodeStart,
    Operand,
    Data,
}

/// Generated source plus anything the walk found suspicious.
pub struct Disassembly {
    /// Assembler source text
    pub source: String,
    /// Misaligned execution and similar oddities
    pub warnings: Vec<String>,
}

/// Emits assembler source from the post-emulation memory image.
pub struct Disassembler<'a> {
    cpu: &'a Cpu,
    sid: &'a SidFile,
    fixups: &'a BTreeMap<u16, OperandFixup>,
    symbols: &'a BTreeMap<u16, String>,
}

impl<'a> Disassembler<'a> {
    /// Creates a disassembler over an analysed CPU. `fixups` rewrites
    /// immediate operands that encode addresses; `symbols` overrides
    /// generated label names.
    pub fn new(
        cpu: &'a Cpu,
        sid: &'a SidFile,
        fixups: &'a BTreeMap<u16, OperandFixup>,
        symbols: &'a BTreeMap<u16, String>,
    ) -> Self {
        Self {
            cpu,
            sid,
            fixups,
            symbols,
        }
    }

    /// Generates source that assembles at `new_base`.
    pub fn generate(&self, new_base: u16) -> Disassembly {
        let load = usize::from(self.sid.load_address);
        let end = load + self.sid.data.len();
        let memory = self.cpu.memory();
        let mut warnings = Vec::new();

        // Pass 1: byte classification from execution flags.
        let mut kinds = vec![ByteKind::Data; self.sid.data.len()];
        let mut illegal_count = 0usize;
        let mut i = load;
        while i < end {
            let addr = i as u16;
            let access = memory.access(addr);
            if access.contains(Access::OPCODE) {
                let op = opcodes::decode(memory.peek(addr));
                if op.illegal {
                    illegal_count += 1;
                }
                let size = usize::from(op.size);
                if i + size <= end {
                    kinds[i - load] = ByteKind::OpcodeStart;
                    for k in 1..size {
                        kinds[i - load + k] = ByteKind::Operand;
                    }
                    i += size;
                    continue;
                }
                warnings.push(format!("instruction at ${addr:04X} runs past the image end"));
            } else if access.contains(Access::EXECUTE) {
                warnings.push(format!("misaligned execution at ${addr:04X}"));
            }
            i += 1;
        }
        if illegal_count > 0 {
            warnings.push(format!(
                "{illegal_count} undocumented instruction(s); the assembler must support them"
            ));
        }

        let in_footprint = |addr: u16| (load..end).contains(&usize::from(addr));
        let kind_of = |addr: u16| kinds[usize::from(addr) - load];

        // Collect label positions: jump targets, entry points, operand
        // targets and fixup targets inside the footprint.
        let mut label_addrs: BTreeSet<u16> = BTreeSet::new();
        for addr in load..end {
            if memory.access(addr as u16).contains(Access::JUMP_TARGET) {
                label_addrs.insert(addr as u16);
            }
        }
        for entry in [self.sid.init_address, self.sid.play_address] {
            if in_footprint(entry) {
                label_addrs.insert(entry);
            }
        }
        for addr in load..end {
            let addr = addr as u16;
            if kind_of(addr) != ByteKind::OpcodeStart {
                continue;
            }
            let op = opcodes::decode(memory.peek(addr));
            match op.mode {
                Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => {
                    let target = self.operand_word(addr);
                    if in_footprint(target) {
                        label_addrs.insert(target);
                    }
                }
                Mode::Relative => {
                    let target = self.branch_target(addr);
                    if in_footprint(target) {
                        label_addrs.insert(target);
                    }
                }
                _ => {}
            }
        }
        for fixup in self.fixups.values() {
            let target = match *fixup {
                OperandFixup::Lo(t) | OperandFixup::Hi(t) => t,
            };
            if in_footprint(target) {
                label_addrs.insert(target);
            }
        }

        // Labels inside instructions become equates on the enclosing
        // instruction's label.
        let mut equates: Vec<(u16, u16)> = Vec::new(); // (label, instr start)
        for &addr in label_addrs.clone().iter() {
            if kind_of(addr) == ByteKind::Operand {
                let mut start = addr;
                while kind_of(start) != ByteKind::OpcodeStart {
                    start -= 1;
                }
                label_addrs.insert(start);
                equates.push((addr, start));
            }
        }

        let name_of = |addr: u16| -> String {
            self.symbols
                .get(&addr)
                .cloned()
                .unwrap_or_else(|| format!("L{addr:04X}"))
        };

        // Live-byte map for data slicing: anything touched, plus the
        // observed index windows of table accesses.
        let mut live = vec![false; self.sid.data.len()];
        for addr in load..end {
            if !memory.access(addr as u16).is_empty() {
                live[addr - load] = true;
            }
        }
        for addr in load..end {
            let addr = addr as u16;
            if kind_of(addr) != ByteKind::OpcodeStart {
                continue;
            }
            let op = opcodes::decode(memory.peek(addr));
            if !matches!(op.mode, Mode::AbsoluteX | Mode::AbsoluteY) {
                continue;
            }
            let base = self.operand_word(addr);
            if let Some((min, max)) = self.cpu.index_range(addr) {
                for index in min..=max {
                    let t = base.wrapping_add(u16::from(index));
                    if in_footprint(t) {
                        live[usize::from(t) - load] = true;
                    }
                }
            }
        }

        // Pass 2: emission.
        let mut out = String::new();
        let _ = writeln!(out, "// {}", self.sid.name);
        if !self.sid.author.is_empty() {
            let _ = writeln!(out, "// {}", self.sid.author);
        }
        if !self.sid.released.is_empty() {
            let _ = writeln!(out, "// {}", self.sid.released);
        }
        let _ = writeln!(
            out,
            "// originally at ${:04X}, init ${:04X}, play ${:04X}",
            self.sid.load_address, self.sid.init_address, self.sid.play_address
        );
        let _ = writeln!(out);
        for &(label, start) in &equates {
            let _ = writeln!(
                out,
                ".label {} = {} + {}",
                name_of(label),
                name_of(start),
                label - start
            );
        }
        let _ = writeln!(out, "* = ${new_base:04X}");
        let _ = writeln!(out);

        let mut i = load;
        while i < end {
            let addr = i as u16;
            if label_addrs.contains(&addr) && kind_of(addr) != ByteKind::Operand {
                let _ = writeln!(out, "{}:", name_of(addr));
            }
            match kind_of(addr) {
                ByteKind::OpcodeStart => {
                    let size = usize::from(opcodes::decode(memory.peek(addr)).size);
                    let _ = writeln!(
                        out,
                        "    {}",
                        self.format_instruction(addr, &label_addrs, &name_of)
                    );
                    i += size;
                }
                _ => {
                    // Data run until the next instruction or label.
                    let run_end = (i + 1..end)
                        .find(|&j| {
                            kinds[j - load] == ByteKind::OpcodeStart
                                || label_addrs.contains(&(j as u16))
                        })
                        .unwrap_or(end);
                    self.emit_data(&mut out, i, run_end, load, &live);
                    i = run_end;
                }
            }
        }

        Disassembly {
            source: out,
            warnings,
        }
    }

    fn operand_word(&self, addr: u16) -> u16 {
        let memory = self.cpu.memory();
        u16::from_le_bytes([
            memory.peek(addr.wrapping_add(1)),
            memory.peek(addr.wrapping_add(2)),
        ])
    }

    fn branch_target(&self, addr: u16) -> u16 {
        let offset = self.cpu.memory().peek(addr.wrapping_add(1)) as i8;
        addr.wrapping_add(2).wrapping_add(offset as u16)
    }

    fn format_instruction(
        &self,
        addr: u16,
        labels: &BTreeSet<u16>,
        name_of: &dyn Fn(u16) -> String,
    ) -> String {
        let memory = self.cpu.memory();
        let op = opcodes::decode(memory.peek(addr));
        let mnemonic = op.mnemonic;

        let reference = |target: u16| -> String {
            if labels.contains(&target) {
                name_of(target)
            } else {
                format!("${target:04X}")
            }
        };

        match op.mode {
            Mode::Implied | Mode::Accumulator => format!("{mnemonic}"),
            Mode::Immediate => {
                let operand_addr = addr.wrapping_add(1);
                let value = memory.peek(operand_addr);
                match self.fixups.get(&operand_addr) {
                    Some(OperandFixup::Lo(target)) => {
                        format!("{mnemonic} #<{}", reference(*target))
                    }
                    Some(OperandFixup::Hi(target)) => {
                        format!("{mnemonic} #>{}", reference(*target))
                    }
                    None => format!("{mnemonic} #${value:02X}"),
                }
            }
            Mode::ZeroPage => format!("{mnemonic} ${:02X}", memory.peek(addr.wrapping_add(1))),
            Mode::ZeroPageX => {
                format!("{mnemonic} ${:02X},x", memory.peek(addr.wrapping_add(1)))
            }
            Mode::ZeroPageY => {
                format!("{mnemonic} ${:02X},y", memory.peek(addr.wrapping_add(1)))
            }
            Mode::Absolute => format!("{mnemonic} {}", reference(self.operand_word(addr))),
            Mode::AbsoluteX => format!("{mnemonic} {},x", reference(self.operand_word(addr))),
            Mode::AbsoluteY => format!("{mnemonic} {},y", reference(self.operand_word(addr))),
            Mode::Indirect => format!("{mnemonic} ({})", reference(self.operand_word(addr))),
            Mode::IndirectX => {
                format!("{mnemonic} (${:02X},x)", memory.peek(addr.wrapping_add(1)))
            }
            Mode::IndirectY => {
                format!("{mnemonic} (${:02X}),y", memory.peek(addr.wrapping_add(1)))
            }
            Mode::Relative => {
                format!("{mnemonic} {}", reference(self.branch_target(addr)))
            }
        }
    }

    /// Emits one data run, folding long untouched stretches into fills.
    fn emit_data(&self, out: &mut String, start: usize, end: usize, load: usize, live: &[bool]) {
        let memory = self.cpu.memory();
        // Dead-stretch length starting at a given index.
        let dead_at = |i: usize| (i..end).take_while(|&j| !live[j - load]).count();
        let mut i = start;
        while i < end {
            let dead = dead_at(i);
            if dead >= PAD_RUN {
                let _ = writeln!(out, "    .fill {dead}, 0");
                i += dead;
                continue;
            }
            // A row of literal bytes, stopping before a big pad run.
            let mut row_end = (i + BYTES_PER_ROW).min(end);
            for j in i + 1..row_end {
                if dead_at(j) >= PAD_RUN {
                    row_end = j;
                    break;
                }
            }
            let row: Vec<String> = (i..row_end)
                .map(|j| format!("${:02X}", memory.peek(j as u16)))
                .collect();
            let _ = writeln!(out, "    .byte {}", row.join(", "));
            i = row_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{EmulationOptions, Emulator};

    fn sid_with(init: u16, play: u16, load: u16, program: &[u8]) -> SidFile {
        SidFile {
            version: 2,
            data_offset: 0x7C,
            load_address: load,
            init_address: init,
            play_address: play,
            songs: 1,
            start_song: 1,
            speed: 0,
            name: "disasm test".into(),
            author: String::new(),
            released: String::new(),
            flags: 0,
            start_page: 0,
            page_length: 0,
            data: program.to_vec(),
            md5: String::new(),
            second_sid_byte: 0,
            third_sid_byte: 0,
        }
    }

    fn no_fixups() -> BTreeMap<u16, OperandFixup> {
        BTreeMap::new()
    }

    fn no_symbols() -> BTreeMap<u16, String> {
        BTreeMap::new()
    }

    fn analyse(sid: &SidFile, frames: usize) -> Cpu {
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, sid);
        let options = EmulationOptions {
            frames,
            ..EmulationOptions::default()
        };
        emulator.run(1, &options).expect("emulation runs");
        cpu
    }

    #[test]
    fn code_becomes_labelled_instructions() {
        // init: rts; play: lda #$0f / sta $d418 / rts
        let mut program = vec![0u8; 0x10];
        program[0] = 0x60;
        program[3..9].copy_from_slice(&[0xA9, 0x0F, 0x8D, 0x18, 0xD4, 0x60]);
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let cpu = analyse(&sid, 15);
        let fixups = no_fixups();
        let symbols = no_symbols();
        let disasm = Disassembler::new(&cpu, &sid, &fixups, &symbols).generate(0x2000);

        assert!(disasm.source.contains("* = $2000"));
        assert!(disasm.source.contains("L1000:"));
        assert!(disasm.source.contains("L1003:"));
        assert!(disasm.source.contains("lda #$0F"));
        // SID register reference stays literal
        assert!(disasm.source.contains("sta $D418"));
        assert!(disasm.warnings.is_empty());
    }

    #[test]
    fn internal_jump_gets_symbolic_target() {
        // play: jmp $1006 / (gap) / $1006: rts
        let mut program = vec![0u8; 0x08];
        program[0] = 0x60; // init: rts
        program[3..6].copy_from_slice(&[0x4C, 0x06, 0x10]);
        program[6] = 0x60;
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let cpu = analyse(&sid, 15);
        let fixups = no_fixups();
        let symbols = no_symbols();
        let disasm = Disassembler::new(&cpu, &sid, &fixups, &symbols).generate(0x3000);
        assert!(disasm.source.contains("jmp L1006"));
        assert!(disasm.source.contains("L1006:"));
    }

    #[test]
    fn table_reads_slice_data_by_index_range() {
        // play cycles x through 0..=3 and reads an 8-byte table at $1020;
        // only the first four entries are ever touched, and a long
        // untouched tail follows.
        let mut program = vec![0u8; 0x40];
        program[0] = 0x60; // init
        program[3..13].copy_from_slice(&[
            0xE6, 0xFB, // inc $fb
            0xA5, 0xFB, // lda $fb
            0x29, 0x03, // and #$03
            0xAA, // tax
            0xBD, 0x20, 0x10, // lda $1020,x
        ]);
        program[13..17].copy_from_slice(&[0x8D, 0x00, 0xD4, 0x60]); // sta $d400 / rts
        for (i, v) in (0x20..0x28).enumerate() {
            program[0x20 + i] = v as u8 + 1; // table values
        }
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let cpu = analyse(&sid, 20);
        // x cycles through 0..=3
        assert_eq!(cpu.index_range(0x100A), Some((0, 3)));
        let fixups = no_fixups();
        let symbols = no_symbols();
        let disasm = Disassembler::new(&cpu, &sid, &fixups, &symbols).generate(0x2000);
        assert!(disasm.source.contains("lda L1020,x"));
        assert!(disasm.source.contains("L1020:"));
        // Live table bytes are literal data
        assert!(disasm.source.contains(".byte $21, $22, $23, $24"));
        // The untouched tail folds into padding
        assert!(disasm.source.contains(".fill"));
    }

    #[test]
    fn modified_operand_byte_gets_an_equate() {
        // init: lda #$22 / sta $100a / rts; play at $1009: lda $2000 / rts
        // The sta target $100a is the operand byte of the play lda.
        let mut program = vec![0u8; 0x10];
        program[..6].copy_from_slice(&[0xA9, 0x22, 0x8D, 0x0A, 0x10, 0x60]);
        program[9..13].copy_from_slice(&[0xAD, 0x00, 0x20, 0x60]);
        let sid = sid_with(0x1000, 0x1009, 0x1000, &program);
        let cpu = analyse(&sid, 15);
        let fixups = no_fixups();
        let symbols = no_symbols();
        let disasm = Disassembler::new(&cpu, &sid, &fixups, &symbols).generate(0x2000);
        assert!(disasm.source.contains(".label L100A = L1009 + 1"));
        assert!(disasm.source.contains("sta L100A"));
    }

    #[test]
    fn immediate_fixup_rewrites_operand() {
        // play: lda #$00 / sta $fb / lda #$10 / sta $fc / ldy #0 /
        //       lda ($fb),y / rts, assembling the pointer $1000.
        let mut program = vec![0u8; 0x20];
        program[0] = 0x60; // init
        program[3..16].copy_from_slice(&[
            0xA9, 0x00, 0x85, 0xFB, 0xA9, 0x10, 0x85, 0xFC, 0xA0, 0x00, 0xB1, 0xFB, 0x60,
        ]);
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        let outcome = emulator
            .run(1, &EmulationOptions {
                frames: 15,
                ..EmulationOptions::default()
            })
            .expect("emulation runs");
        let report = crate::selfmod::analyze(&cpu, 0x1000..0x1020, &outcome.indirect_reads);
        let symbols = no_symbols();
        let disasm = Disassembler::new(&cpu, &sid, &report.fixups, &symbols).generate(0x2000);
        assert!(disasm.source.contains("lda #<L1000"));
        assert!(disasm.source.contains("lda #>L1000"));
    }

    #[test]
    fn human_symbols_override_generated_names() {
        let mut program = vec![0u8; 0x08];
        program[0] = 0x60;
        program[3] = 0x60;
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let cpu = analyse(&sid, 15);
        let fixups = no_fixups();
        let mut symbols = BTreeMap::new();
        symbols.insert(0x1000u16, "music_init".to_string());
        symbols.insert(0x1003u16, "music_play".to_string());
        let disasm = Disassembler::new(&cpu, &sid, &fixups, &symbols).generate(0x2000);
        assert!(disasm.source.contains("music_init:"));
        assert!(disasm.source.contains("music_play:"));
    }
}
