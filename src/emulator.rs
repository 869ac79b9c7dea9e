// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Emulation driver.
//!
//! Runs a loaded tune the way the player interrupt would: init once, a
//! warm-up period with observers disabled (some tunes behave oddly on
//! their first frames), init again, then the measured frames with
//! observers attached. Memory is backed up before and restored after, so
//! an experiment never contaminates the next one; the access-flag and
//! provenance arrays deliberately survive the restore.

use crate::cpu::Cpu;
use crate::error::EmulationError;
use crate::memory::MEMORY_SIZE;
use crate::pattern::{Pattern, PatternFinder};
use crate::shadow::ShadowRegisterFinder;
use crate::sid_file::SidFile;
use crate::trace::TraceLogger;
use crate::write_tracker::WriteTracker;
use log::{debug, info};
use std::cell::RefCell;
use std::rc::Rc;

/// Default number of measured frames per experiment.
pub const DEFAULT_EMULATION_FRAMES: usize = 1000;

/// Knobs for one emulation experiment.
#[derive(Debug, Clone)]
pub struct EmulationOptions {
    /// Measured frames (the warm-up runs the same count beforehand)
    pub frames: usize,
    /// Play calls per frame, for multi-speed tunes
    pub calls_per_frame: usize,
    /// Infer the canonical register write order
    pub track_registers: bool,
    /// Search for a repeating frame pattern
    pub detect_pattern: bool,
    /// Scan for shadow registers
    pub find_shadows: bool,
    /// Capture a per-frame write trace
    pub capture_trace: bool,
    /// Frames the shadow scan skips before checking candidates
    pub shadow_warmup_frames: usize,
    /// Shadow acceptance threshold
    pub shadow_reliability: f32,
    /// Shadow acceptance minimum sample count
    pub shadow_min_checks: u32,
    /// Most init frames the pattern search will consider
    pub max_init_frames: usize,
    /// Per-call cycle ceiling for init/play invocations
    pub cycle_budget: u64,
}

impl Default for EmulationOptions {
    fn default() -> Self {
        Self {
            frames: DEFAULT_EMULATION_FRAMES,
            calls_per_frame: 1,
            track_registers: true,
            detect_pattern: true,
            find_shadows: true,
            capture_trace: false,
            shadow_warmup_frames: crate::shadow::DEFAULT_WARMUP_FRAMES,
            shadow_reliability: 0.95,
            shadow_min_checks: 50,
            max_init_frames: 15,
            cycle_budget: crate::cpu::DEFAULT_CYCLE_BUDGET,
        }
    }
}

/// Everything one experiment produced.
#[derive(Debug)]
pub struct EmulationOutcome {
    /// Measured frames actually executed
    pub frames_executed: usize,
    /// Cycles spent across the measured frames
    pub total_cycles: u64,
    /// Average cycles per frame
    pub avg_cycles_per_frame: u64,
    /// Worst frame observed
    pub max_cycles_per_frame: u64,
    /// Register write-order tracker, analyzed
    pub tracker: WriteTracker,
    /// Frame-pattern finder, analyzed
    pub pattern_finder: PatternFinder,
    /// The detected pattern, if any
    pub pattern: Option<Pattern>,
    /// Shadow-register finder, analyzed
    pub shadows: ShadowRegisterFinder,
    /// Ordered per-frame write trace (empty unless requested)
    pub trace: TraceLogger,
    /// Observed `(pc, zero-page pointer, target)` indirect reads
    pub indirect_reads: Vec<(u16, u8, u16)>,
    /// Every tracked write during the measured frames
    pub total_writes: u64,
    /// Writes into the CIA timers; a non-empty list suggests CIA timing
    pub cia_writes: Vec<(u16, u8)>,
    /// Writes into the VIC-II; a non-empty list suggests raster tricks
    pub vic_writes: Vec<(u16, u8)>,
}

/// Drives init/play over an instrumented CPU.
pub struct Emulator<'a> {
    cpu: &'a mut Cpu,
    sid: &'a SidFile,
    /// Clean post-load snapshot, for per-song restarts
    clean: Box<[u8; MEMORY_SIZE]>,
}

impl<'a> Emulator<'a> {
    /// Plants the tune into CPU memory and snapshots the clean state.
    pub fn new(cpu: &'a mut Cpu, sid: &'a SidFile) -> Self {
        sid.plant(cpu.memory_mut());
        let clean = Box::new(*cpu.memory().bytes());
        Self { cpu, sid, clean }
    }

    /// Runs one experiment for one song (1-indexed). Memory is restored
    /// afterwards even when emulation fails mid-run.
    pub fn run(
        &mut self,
        song: u16,
        options: &EmulationOptions,
    ) -> Result<EmulationOutcome, EmulationError> {
        let backup = Box::new(*self.cpu.memory().bytes());
        let result = self.run_inner(song, options);
        self.cpu.clear_hooks();
        self.cpu.memory_mut().restore(&backup);
        result
    }

    /// Runs every song once, the start song last, restoring the clean
    /// post-load snapshot before each. Access flags accumulate across
    /// songs, so the final memory map covers the whole file; the
    /// returned outcome belongs to the start song.
    pub fn run_all_songs(
        &mut self,
        options: &EmulationOptions,
    ) -> Result<EmulationOutcome, EmulationError> {
        let start = self.sid.start_song.clamp(1, self.sid.songs);
        for song in (1..=self.sid.songs).filter(|&s| s != start) {
            debug!("analysing song {song}/{}", self.sid.songs);
            let clean = self.clean.clone();
            self.cpu.memory_mut().restore(&clean);
            self.run(song, options)?;
        }
        let clean = self.clean.clone();
        self.cpu.memory_mut().restore(&clean);
        self.run(start, options)
    }

    fn run_inner(
        &mut self,
        song: u16,
        options: &EmulationOptions,
    ) -> Result<EmulationOutcome, EmulationError> {
        let init = self.sid.init_address;
        let play = self.sid.play_address;
        let song0 = song.saturating_sub(1) as u8;
        self.cpu.cycle_budget = options.cycle_budget;

        // Some layouts keep a third entry point next to init; probing for
        // a JMP at init+3 / init+6 is a heuristic carried over from field
        // experience with real players.
        let mut extra = 0u16;
        if play == init.wrapping_add(3) {
            extra = init.wrapping_add(6);
        }
        if play == init.wrapping_add(6) {
            extra = init.wrapping_add(3);
        }
        if self.cpu.memory().peek(extra) != 0x4C {
            extra = 0;
        }

        // Init, observers off.
        self.call_init(init, song0)?;

        // Warm-up: run the playback without observers so first-frame
        // anomalies and init-time memory copies settle.
        for _ in 0..options.frames {
            for _ in 0..options.calls_per_frame {
                self.cpu.reset_registers_and_flags();
                self.cpu.execute_function(play)?;
            }
        }

        if extra != 0 {
            self.cpu.reset_registers_and_flags();
            self.cpu.execute_function(extra)?;
        }

        // Re-init to reset the player's internal state.
        self.call_init(init, song0)?;

        // The first play call after init can emit atypical writes; spend
        // it before attaching observers.
        self.cpu.reset_registers_and_flags();
        self.cpu.execute_function(play)?;

        let tracker = Rc::new(RefCell::new(WriteTracker::new()));
        let pattern_finder = Rc::new(RefCell::new(PatternFinder::new()));
        let trace = Rc::new(RefCell::new(TraceLogger::new()));
        let shadows = Rc::new(RefCell::new(ShadowRegisterFinder::new(
            options.shadow_warmup_frames,
        )));
        let indirect_reads = Rc::new(RefCell::new(Vec::new()));

        // Start each experiment from clean analysis state.
        if options.track_registers {
            tracker.borrow_mut().reset();
        }
        if options.detect_pattern {
            pattern_finder.borrow_mut().reset();
        }
        if options.find_shadows {
            shadows.borrow_mut().reset();
        }

        {
            let tracker = tracker.clone();
            let pattern_finder = pattern_finder.clone();
            let trace = trace.clone();
            let shadows = shadows.clone();
            let opts = options.clone();
            self.cpu.set_sid_write_hook(Box::new(move |addr, value| {
                if opts.track_registers {
                    tracker.borrow_mut().record_write(addr, value);
                }
                if opts.detect_pattern {
                    pattern_finder.borrow_mut().record_write(addr, value);
                }
                if opts.capture_trace {
                    trace.borrow_mut().record_write(addr, value);
                }
                if opts.find_shadows {
                    shadows.borrow_mut().record_sid_write(addr, value);
                }
            }));
        }
        {
            let indirect_reads = indirect_reads.clone();
            self.cpu
                .set_indirect_read_hook(Box::new(move |pc, zp, target| {
                    indirect_reads.borrow_mut().push((pc, zp, target));
                }));
        }
        let total_writes = Rc::new(RefCell::new(0u64));
        {
            let total_writes = total_writes.clone();
            self.cpu.set_any_write_hook(Box::new(move |_, _| {
                *total_writes.borrow_mut() += 1;
            }));
        }
        let cia_writes = Rc::new(RefCell::new(Vec::new()));
        {
            let cia_writes = cia_writes.clone();
            self.cpu.set_cia_write_hook(Box::new(move |addr, value| {
                cia_writes.borrow_mut().push((addr, value));
            }));
        }
        let vic_writes = Rc::new(RefCell::new(Vec::new()));
        {
            let vic_writes = vic_writes.clone();
            self.cpu.set_vic_write_hook(Box::new(move |addr, value| {
                vic_writes.borrow_mut().push((addr, value));
            }));
        }
        let flow_count = Rc::new(RefCell::new(0u64));
        {
            let flow_count = flow_count.clone();
            self.cpu.set_memory_flow_hook(Box::new(move |_, _, _, _| {
                *flow_count.borrow_mut() += 1;
            }));
        }

        let mut total_cycles = 0u64;
        let mut max_cycles_per_frame = 0u64;
        let mut frames_executed = 0usize;
        let mut last_cycles = self.cpu.cycles;

        for _ in 0..options.frames {
            for _ in 0..options.calls_per_frame {
                self.cpu.reset_registers_and_flags();
                self.cpu.execute_function(play)?;
            }

            let frame_cycles = self.cpu.cycles - last_cycles;
            max_cycles_per_frame = max_cycles_per_frame.max(frame_cycles);
            total_cycles += frame_cycles;
            last_cycles = self.cpu.cycles;

            if options.track_registers {
                tracker.borrow_mut().end_frame();
            }
            if options.detect_pattern {
                pattern_finder.borrow_mut().end_frame();
            }
            if options.capture_trace {
                trace.borrow_mut().log_frame_marker();
            }
            if options.find_shadows {
                shadows.borrow_mut().check_frame(self.cpu.memory().bytes());
            }
            frames_executed += 1;
        }

        if extra != 0 {
            self.cpu.reset_registers_and_flags();
            self.cpu.execute_function(extra)?;
        }

        self.cpu.clear_hooks();

        let mut tracker = Rc::try_unwrap(tracker).ok().expect("hooks dropped").into_inner();
        let mut pattern_finder = Rc::try_unwrap(pattern_finder)
            .ok()
            .expect("hooks dropped")
            .into_inner();
        let trace = Rc::try_unwrap(trace).ok().expect("hooks dropped").into_inner();
        let mut shadows = Rc::try_unwrap(shadows).ok().expect("hooks dropped").into_inner();
        let indirect_reads = Rc::try_unwrap(indirect_reads)
            .ok()
            .expect("hooks dropped")
            .into_inner();
        let total_writes = *total_writes.borrow();
        let cia_writes = Rc::try_unwrap(cia_writes).ok().expect("hooks dropped").into_inner();
        let vic_writes = Rc::try_unwrap(vic_writes).ok().expect("hooks dropped").into_inner();
        debug!(
            "{} writes, {} memory-to-memory copies, {} frames with SID writes",
            total_writes,
            *flow_count.borrow(),
            tracker.frame_count()
        );

        tracker.analyze();
        let pattern = pattern_finder.analyze(options.max_init_frames);
        shadows.analyze(options.shadow_reliability, options.shadow_min_checks);

        let avg = if frames_executed > 0 {
            total_cycles / frames_executed as u64
        } else {
            0
        };
        info!(
            "emulated {frames_executed} frames, avg {avg} cycles/frame, max {max_cycles_per_frame}"
        );

        Ok(EmulationOutcome {
            frames_executed,
            total_cycles,
            avg_cycles_per_frame: avg,
            max_cycles_per_frame,
            tracker,
            pattern_finder,
            pattern,
            shadows,
            trace,
            indirect_reads,
            total_writes,
            cia_writes,
            vic_writes,
        })
    }

    fn call_init(&mut self, init: u16, song0: u8) -> Result<(), EmulationError> {
        self.cpu.reset_registers_and_flags();
        self.cpu.a = song0;
        self.cpu.x = song0;
        self.cpu.y = song0;
        self.cpu.execute_function(init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmulationError;

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
            name: "test".into(),
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

    fn options(frames: usize) -> EmulationOptions {
        EmulationOptions {
            frames,
            shadow_warmup_frames: 2,
            ..EmulationOptions::default()
        }
    }

    #[test]
    fn silent_tune_runs_clean() {
        // Four RTS: init and play both return immediately.
        let sid = sid_with(0x1000, 0x1003, 0x1000, &[0x60, 0x60, 0x60, 0x60]);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        let outcome = emulator.run(1, &options(20)).expect("runs");
        assert_eq!(outcome.frames_executed, 20);
        assert_eq!(outcome.pattern, None);
        assert_eq!(outcome.tracker.frame_count(), 0);
        assert_eq!(outcome.shadows.shadow_count(), 0);
    }

    #[test]
    fn playing_tune_feeds_all_analyses() {
        // init: lda #0 / sta $fb / rts
        // play: inc $fb / lda $fb / sta $d401 / sta $0fb0 / lda #$21 /
        //       sta $d404 / rts
        let mut program = vec![0u8; 0x30];
        program[..5].copy_from_slice(&[0xA9, 0x00, 0x85, 0xFB, 0x60]);
        program[0x10..0x20].copy_from_slice(&[
            0xE6, 0xFB, 0xA5, 0xFB, 0x8D, 0x01, 0xD4, 0x8D, 0xB0, 0x0F, 0xA9, 0x21, 0x8D, 0x04,
            0xD4, 0x60,
        ]);
        let sid = sid_with(0x1000, 0x1010, 0x1000, &program);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        let mut opts = options(80);
        opts.capture_trace = true;
        let outcome = emulator.run(1, &opts).expect("runs");

        assert_eq!(outcome.frames_executed, 80);
        assert!(outcome.tracker.has_consistent_pattern());
        assert_eq!(outcome.tracker.write_order(), &[0x01, 0x04]);
        // Counter never repeats within 80 frames: no pattern.
        assert_eq!(outcome.pattern, None);
        // $fb mirrors D401 and wins the tie against $0fb0.
        assert_eq!(outcome.shadows.shadow_for(0x01), Some(0x00FB));
        assert_eq!(outcome.trace.frames().len(), 80);
        assert!(outcome.avg_cycles_per_frame > 0);
        assert!(outcome.max_cycles_per_frame >= outcome.avg_cycles_per_frame);
        assert!(outcome.total_writes > 0);
        assert!(outcome.cia_writes.is_empty());
        assert!(outcome.vic_writes.is_empty());
    }

    #[test]
    fn memory_is_restored_after_run() {
        // play: inc $1000 (self-modifying the init byte) / rts
        let mut program = vec![0u8; 0x20];
        program[0] = 0x60; // init: rts
        program[0x10..0x14].copy_from_slice(&[0xEE, 0x00, 0x10, 0x60]);
        let sid = sid_with(0x1000, 0x1010, 0x1000, &program);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        emulator.run(1, &options(20)).expect("runs");
        assert_eq!(cpu.memory().peek(0x1000), 0x60);
        // Provenance survives the restore.
        assert_eq!(cpu.memory().last_writer(0x1000), 0x1010);
    }

    #[test]
    fn halting_opcode_aborts_and_restores() {
        let mut program = vec![0u8; 0x20];
        program[0] = 0x60;
        program[0x10] = 0x02; // play: kil
        let sid = sid_with(0x1000, 0x1010, 0x1000, &program);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        match emulator.run(1, &options(10)) {
            Err(EmulationError::IllegalHaltingOpcode { pc: 0x1010, .. }) => {}
            other => panic!("expected halt, got {other:?}"),
        }
        assert_eq!(cpu.memory().peek(0x1010), 0x02);
    }

    #[test]
    fn extra_entry_heuristic_probes_for_jmp() {
        // init at $1000, play at $1003, jmp at $1006 targeting an rts.
        let mut program = vec![0u8; 0x20];
        program[0] = 0x60; // init
        program[3] = 0x60; // play
        program[6..9].copy_from_slice(&[0x4C, 0x09, 0x10]); // jmp $1009
        program[9] = 0x60;
        let sid = sid_with(0x1000, 0x1003, 0x1000, &program);
        let mut cpu = Cpu::new();
        let mut emulator = Emulator::new(&mut cpu, &sid);
        emulator.run(1, &options(15)).expect("runs");
        // The jmp target was taken, proving the extra entry fired.
        use crate::memory::Access;
        assert!(cpu.memory().access(0x1009).contains(Access::JUMP_TARGET));
    }
}
