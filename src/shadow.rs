// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Shadow-register discovery.
//!
//! The SID registers are write-only, so players that want read-back keep
//! RAM copies. The finder scans memory after each frame for locations
//! whose byte equals the most recent write to each register, and keeps
//! the candidates that stay in sync reliably enough.

use crate::memory::{MEMORY_SIZE, SID_REGISTER_COUNT, is_io};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Frames to skip before checking candidates; the first calls often
/// carry leftover init state.
pub const DEFAULT_WARMUP_FRAMES: usize = 10;
/// New candidates are only discovered before this frame.
const DISCOVERY_END_FRAME: usize = 100;
/// Candidates falling below this reliability are dropped early.
const DROP_THRESHOLD: f32 = 0.5;
/// Checks required before the drop rule applies.
const DROP_MIN_CHECKS: u32 = 100;

/// Match statistics for one candidate address.
#[derive(Debug, Clone, Copy, Default)]
pub struct Candidate {
    /// Frames where the byte equalled the register value
    pub matches: u32,
    /// Frames checked
    pub checks: u32,
}

impl Candidate {
    /// Fraction of checks that matched.
    pub fn reliability(&self) -> f32 {
        if self.checks == 0 {
            0.0
        } else {
            self.matches as f32 / self.checks as f32
        }
    }
}

/// Scans RAM for locations mirroring SID register values.
#[derive(Debug)]
pub struct ShadowRegisterFinder {
    current_values: [u8; SID_REGISTER_COUNT],
    active: [bool; SID_REGISTER_COUNT],
    // BTreeMap keeps candidate iteration in address order, making the
    // lower-address tie-break deterministic.
    candidates: [BTreeMap<u16, Candidate>; SID_REGISTER_COUNT],
    map: [Option<u16>; SID_REGISTER_COUNT],
    frame_count: usize,
    warmup_frames: usize,
}

impl ShadowRegisterFinder {
    /// Creates a finder with the given warm-up frame count.
    pub fn new(warmup_frames: usize) -> Self {
        Self {
            current_values: [0; SID_REGISTER_COUNT],
            active: [false; SID_REGISTER_COUNT],
            candidates: std::array::from_fn(|_| BTreeMap::new()),
            map: [None; SID_REGISTER_COUNT],
            frame_count: 0,
            warmup_frames,
        }
    }

    /// Clears all state, keeping the warm-up setting.
    pub fn reset(&mut self) {
        let warmup = self.warmup_frames;
        *self = Self::new(warmup);
    }

    /// Tracks the latest value written to each SID register.
    pub fn record_sid_write(&mut self, addr: u16, value: u8) {
        if (0xD400..0xD400 + SID_REGISTER_COUNT as u16).contains(&addr) {
            let reg = usize::from(addr - 0xD400);
            self.current_values[reg] = value;
            self.active[reg] = true;
        }
    }

    /// Scans memory after one frame: re-checks known candidates and,
    /// during the early discovery window, looks for new ones in pages
    /// that contain the target value at all.
    pub fn check_frame(&mut self, memory: &[u8; MEMORY_SIZE]) {
        self.frame_count += 1;
        if self.frame_count <= self.warmup_frames {
            return;
        }

        for reg in 0..SID_REGISTER_COUNT {
            if !self.active[reg] {
                continue;
            }
            let target = self.current_values[reg];
            let candidates = &mut self.candidates[reg];

            candidates.retain(|&addr, info| {
                info.checks += 1;
                if memory[usize::from(addr)] == target {
                    info.matches += 1;
                    return true;
                }
                info.reliability() >= DROP_THRESHOLD || info.checks <= DROP_MIN_CHECKS
            });

            if self.frame_count < DISCOVERY_END_FRAME && target != 0 {
                for page in 0..=0xFFu16 {
                    let base = usize::from(page) << 8;
                    if !memory[base..base + 0x100].contains(&target) {
                        continue;
                    }
                    for offset in 0..0x100 {
                        let addr = (base + offset) as u16;
                        if is_io(addr)
                            || memory[base + offset] != target
                            || candidates.contains_key(&addr)
                        {
                            continue;
                        }
                        candidates.insert(
                            addr,
                            Candidate {
                                matches: 1,
                                checks: 1,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Picks the best candidate per register. Requires `min_checks`
    /// samples and `threshold` reliability; ties go to the lower address.
    pub fn analyze(&mut self, threshold: f32, min_checks: u32) {
        self.map = [None; SID_REGISTER_COUNT];
        for reg in 0..SID_REGISTER_COUNT {
            let mut best: Option<(u16, f32)> = None;
            for (&addr, info) in &self.candidates[reg] {
                if info.checks < min_checks {
                    continue;
                }
                let reliability = info.reliability();
                if reliability < threshold {
                    continue;
                }
                // Strictly better only: earlier (lower) addresses win ties
                if best.is_none_or(|(_, r)| reliability > r) {
                    best = Some((addr, reliability));
                }
            }
            self.map[reg] = best.map(|(addr, _)| addr);
        }
    }

    /// Shadow address for a register, if one was accepted.
    pub fn shadow_for(&self, reg: u8) -> Option<u16> {
        self.map.get(usize::from(reg)).copied().flatten()
    }

    /// Number of registers with an accepted shadow.
    pub fn shadow_count(&self) -> usize {
        (0..SID_REGISTER_COUNT)
            .filter(|&r| self.active[r] && self.map[r].is_some())
            .count()
    }

    /// Statistics for one candidate, mostly for diagnostics.
    #[allow(dead_code)] // For diagnostics
    pub fn candidate(&self, reg: u8, addr: u16) -> Option<Candidate> {
        self.candidates
            .get(usize::from(reg))?
            .get(&addr)
            .copied()
    }

    /// Renders the mapping as assembler definitions for player builds.
    pub fn helpful_data_section(&self) -> String {
        let mut out = String::new();
        for reg in 0..SID_REGISTER_COUNT {
            if !self.active[reg] {
                let _ = writeln!(out, "#define D4{reg:02X}_SHADOW");
                let _ = writeln!(out, "#define D4{reg:02X}_SHADOW_NEVER_USED");
            } else if let Some(addr) = self.shadow_for(reg as u8) {
                let _ = writeln!(out, "#define D4{reg:02X}_SHADOW");
                let _ = writeln!(out, ".var D4{reg:02X}_SHADOW_REGISTER = ${addr:04X}");
            }
        }
        out
    }

    /// Human-readable summary of findings.
    pub fn summary(&self) -> String {
        let count = self.shadow_count();
        let never_used = (0..SID_REGISTER_COUNT).filter(|&r| !self.active[r]).count();
        if count == 0 && never_used == 0 {
            return "No shadow registers found.".into();
        }
        let mut out = format!(
            "Shadow register analysis:\n  Found shadow registers for {count} of {SID_REGISTER_COUNT} SID registers\n"
        );
        if never_used > 0 {
            let _ = writeln!(out, "  {never_used} SID registers were never written to");
        }
        for reg in 0..SID_REGISTER_COUNT {
            if !self.active[reg] {
                let _ = writeln!(out, "  $D4{reg:02X} -> (never written)");
            } else if let Some(addr) = self.map[reg] {
                let _ = writeln!(out, "  $D4{reg:02X} -> ${addr:04X}");
            }
        }
        out
    }
}
