// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! SID register write-order tracking.
//!
//! Players tend to bang the SID registers in a fixed order every frame.
//! Knowing that order lets a visualiser re-issue writes the same way, so
//! the tracker records the first write to each register per frame and
//! infers a canonical order across frames.

use crate::memory::{SID_REGISTER_COUNT, is_sid, sid_register};
use std::fmt::Write as _;

/// Per-frame first-write-wins register log and the inferred write order.
#[derive(Default, Debug)]
pub struct WriteTracker {
    current: Vec<(u8, u8)>,
    frames: Vec<Vec<(u8, u8)>>,
    write_order: Vec<u8>,
    consistent: bool,
}

impl WriteTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all recorded frames and analysis results.
    pub fn reset(&mut self) {
        self.current.clear();
        self.frames.clear();
        self.write_order.clear();
        self.consistent = false;
    }

    /// Records a write if it lands in the SID window. Only the first
    /// write to a register per frame counts towards order inference.
    pub fn record_write(&mut self, addr: u16, value: u8) {
        if !is_sid(addr) {
            return;
        }
        let reg = sid_register(addr);
        if usize::from(reg) >= SID_REGISTER_COUNT {
            return;
        }
        if !self.current.iter().any(|&(r, _)| r == reg) {
            self.current.push((reg, value));
        }
    }

    /// Closes the current frame and appends it to the log.
    pub fn end_frame(&mut self) {
        if !self.current.is_empty() {
            self.frames.push(std::mem::take(&mut self.current));
        }
    }

    /// Infers the canonical write order: the registers that appear in
    /// every frame, provided any two registers keep the same relative
    /// order in every frame where both appear.
    pub fn analyze(&mut self) {
        self.write_order.clear();
        self.consistent = false;
        if self.frames.is_empty() {
            return;
        }

        // Pairwise order must never flip between frames.
        for frame in &self.frames {
            for (i, &(a, _)) in frame.iter().enumerate() {
                for &(b, _) in &frame[i + 1..] {
                    if self.order_flips_somewhere(a, b) {
                        return;
                    }
                }
            }
        }

        // Registers present in every frame, ordered as in the first one.
        let order: Vec<u8> = self.frames[0]
            .iter()
            .map(|&(reg, _)| reg)
            .filter(|&reg| {
                self.frames
                    .iter()
                    .all(|f| f.iter().any(|&(r, _)| r == reg))
            })
            .collect();

        if !order.is_empty() {
            self.write_order = order;
            self.consistent = true;
        }
    }

    fn order_flips_somewhere(&self, a: u8, b: u8) -> bool {
        let mut seen = None;
        for frame in &self.frames {
            let pa = frame.iter().position(|&(r, _)| r == a);
            let pb = frame.iter().position(|&(r, _)| r == b);
            if let (Some(pa), Some(pb)) = (pa, pb) {
                let ordered = pa < pb;
                match seen {
                    None => seen = Some(ordered),
                    Some(prev) if prev != ordered => return true,
                    Some(_) => {}
                }
            }
        }
        false
    }

    /// True when `analyze` found a consistent order.
    pub fn has_consistent_pattern(&self) -> bool {
        self.consistent
    }

    /// The inferred register order, empty without a consistent pattern.
    pub fn write_order(&self) -> &[u8] {
        &self.write_order
    }

    /// Number of closed frames in the log.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Renders the order as assembler definitions for player builds.
    pub fn write_order_source(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, ".var SIDRegisterCount = {}", self.write_order.len());
        let mut list = String::from(".var SIDRegisterOrder = List()");
        for reg in &self.write_order {
            let _ = write!(list, ".add(${reg:02X})");
        }
        out.push_str(&list);
        out.push('\n');
        out
    }
}
