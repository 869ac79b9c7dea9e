// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Repeating-pattern detection over per-frame SID write logs.
//!
//! Most tunes settle into a loop after a few initialization frames: the
//! finder searches for the shortest `(init, period)` split such that
//! every frame from `init` onwards equals the frame one period later.
//! Frames are fingerprinted by hashing their writes sorted by register,
//! so intra-frame write order does not affect identity.

use crate::memory::{is_sid, sid_register};
use md5::{Digest, Md5};

/// Minimum number of recorded frames before pattern search is attempted.
const MIN_FRAMES: usize = 10;

/// A detected repetition: `init_frames` lead-in frames, then a loop of
/// `period` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    /// Frames before the loop starts
    pub init_frames: usize,
    /// Loop length in frames
    pub period: usize,
}

/// Collects per-frame SID writes and searches them for repetition.
#[derive(Default, Debug)]
pub struct PatternFinder {
    current: Vec<(u8, u8)>,
    frames: Vec<Vec<(u8, u8)>>,
    result: Option<Pattern>,
}

impl PatternFinder {
    /// Creates an empty finder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears recorded frames and any previous result.
    pub fn reset(&mut self) {
        self.current.clear();
        self.frames.clear();
        self.result = None;
    }

    /// Records a SID write; only the first write per register per frame
    /// contributes to the frame's identity.
    pub fn record_write(&mut self, addr: u16, value: u8) {
        if !is_sid(addr) {
            return;
        }
        let reg = sid_register(addr);
        if !self.current.iter().any(|&(r, _)| r == reg) {
            self.current.push((reg, value));
        }
    }

    /// Closes the current frame. Frames without SID writes are not logged.
    pub fn end_frame(&mut self) {
        if !self.current.is_empty() {
            self.frames.push(std::mem::take(&mut self.current));
        }
    }

    /// Number of logged frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Searches for the smallest `(init, period)` pair, preferring fewer
    /// init frames, then a shorter period. Returns the result, which is
    /// also kept for later queries.
    pub fn analyze(&mut self, max_init_frames: usize) -> Option<Pattern> {
        self.result = None;
        if self.frames.len() < MIN_FRAMES {
            return None;
        }

        let hashes: Vec<[u8; 16]> = self.frames.iter().map(|f| hash_frame(f)).collect();

        for init in 0..=max_init_frames.min(self.frames.len() / 2) {
            if let Some(period) = self.smallest_period(&hashes, init) {
                // Two full repetitions must fit: init + 2 * period may
                // land exactly on the recording length.
                if period <= (self.frames.len() - init) / 2 {
                    self.result = Some(Pattern {
                        init_frames: init,
                        period,
                    });
                    return self.result;
                }
            }
        }
        None
    }

    /// The result of the last `analyze` call.
    pub fn pattern(&self) -> Option<Pattern> {
        self.result
    }

    /// Human-readable summary of the analysis.
    pub fn description(&self) -> String {
        match self.result {
            None => format!(
                "No repeating pattern detected in {} frames of SID register writes.",
                self.frames.len()
            ),
            Some(p) => format!(
                "Detected repeating pattern: {} initialization frame(s), \
                 repeats every {} frame(s), {} frames analyzed.",
                p.init_frames,
                p.period,
                self.frames.len()
            ),
        }
    }

    fn smallest_period(&self, hashes: &[[u8; 16]], init: usize) -> Option<usize> {
        let tail = &hashes[init..];
        (1..=tail.len() / 2).find(|&period| verify_period(tail, period))
    }
}

/// True when every frame equals the frame one `period` later.
fn verify_period(hashes: &[[u8; 16]], period: usize) -> bool {
    if period == 0 || period * 2 > hashes.len() {
        return false;
    }
    (0..hashes.len() - period).all(|i| hashes[i] == hashes[i + period])
}

/// Order-independent frame fingerprint: writes sorted by register, then
/// digested.
fn hash_frame(frame: &[(u8, u8)]) -> [u8; 16] {
    let mut sorted = frame.to_vec();
    sorted.sort_by_key(|&(reg, _)| reg);
    let mut hasher = Md5::new();
    for (reg, value) in sorted {
        hasher.update([reg, value]);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_frame(finder: &mut PatternFinder, writes: &[(u8, u8)]) {
        for &(reg, value) in writes {
            finder.record_write(0xD400 + u16::from(reg), value);
        }
        finder.end_frame();
    }

    #[test]
    fn alternating_pattern_after_two_init_frames() {
        let mut finder = PatternFinder::new();
        // Two distinct init frames, then A B A B ...
        push_frame(&mut finder, &[(0x00, 0xAA), (0x01, 0x01)]);
        push_frame(&mut finder, &[(0x00, 0xBB), (0x01, 0x02)]);
        for _ in 0..8 {
            push_frame(&mut finder, &[(0x04, 0x11)]);
            push_frame(&mut finder, &[(0x04, 0x22)]);
        }
        let pattern = finder.analyze(15).expect("pattern found");
        assert_eq!(
            pattern,
            Pattern {
                init_frames: 2,
                period: 2
            }
        );
    }

    #[test]
    fn exactly_two_periods_are_accepted() {
        // Ten frames looping every five: the recording holds the loop
        // exactly twice, with no smaller repeat.
        let mut finder = PatternFinder::new();
        for _ in 0..2 {
            for i in 0..5u8 {
                push_frame(&mut finder, &[(0x04, i + 1)]);
            }
        }
        let pattern = finder.analyze(15).expect("pattern found");
        assert_eq!(
            pattern,
            Pattern {
                init_frames: 0,
                period: 5
            }
        );
    }

    #[test]
    fn constant_frames_have_period_one() {
        let mut finder = PatternFinder::new();
        for _ in 0..12 {
            push_frame(&mut finder, &[(0x00, 0x10), (0x04, 0x41)]);
        }
        let pattern = finder.analyze(15).expect("pattern found");
        assert_eq!(pattern.init_frames, 0);
        assert_eq!(pattern.period, 1);
    }

    #[test]
    fn random_frames_have_no_pattern() {
        let mut finder = PatternFinder::new();
        for i in 0..20u8 {
            push_frame(&mut finder, &[(0x00, i), (0x01, i.wrapping_mul(37))]);
        }
        assert_eq!(finder.analyze(15), None);
    }

    #[test]
    fn too_few_frames_yield_no_pattern() {
        let mut finder = PatternFinder::new();
        for _ in 0..MIN_FRAMES - 1 {
            push_frame(&mut finder, &[(0x00, 0x10)]);
        }
        assert_eq!(finder.analyze(15), None);
    }

    #[test]
    fn frame_identity_ignores_intra_frame_order() {
        let a = hash_frame(&[(0x00, 1), (0x04, 2)]);
        let b = hash_frame(&[(0x04, 2), (0x00, 1)]);
        assert_eq!(a, b);
        let c = hash_frame(&[(0x04, 3), (0x00, 1)]);
        assert_ne!(a, c);
    }

    #[test]
    fn pattern_invariant_holds() {
        // Whatever analyze returns, frame i must equal frame i + period.
        let mut finder = PatternFinder::new();
        push_frame(&mut finder, &[(0x00, 0xFF)]);
        for i in 0..15u8 {
            push_frame(&mut finder, &[(0x04, i % 3)]);
        }
        if let Some(p) = finder.analyze(15) {
            let hashes: Vec<_> = finder.frames.iter().map(|f| hash_frame(f)).collect();
            for i in p.init_frames..hashes.len() - p.period {
                assert_eq!(hashes[i], hashes[i + p.period]);
            }
        }
    }

    #[test]
    fn empty_frames_are_not_logged() {
        let mut finder = PatternFinder::new();
        finder.end_frame();
        finder.record_write(0xD400, 1);
        finder.end_frame();
        assert_eq!(finder.frame_count(), 1);
    }
}
