// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! SID relocation.
//!
//! A relocation run emulates the tune to learn its memory map,
//! disassembles it with symbolic internal references, reassembles the
//! source at the new base address with an external cross-assembler, and
//! rewraps the result as a PSID file whose header fields match the
//! original apart from the moved entry points. Verification replays both
//! files and diffs their SID write traces; a mismatch is reported, not
//! fatal, since the artefacts are often still useful for inspection.

use crate::cpu::Cpu;
use crate::disasm::Disassembler;
use crate::emulator::{EmulationOptions, Emulator};
use crate::error::{AnalysisError, RelocationError};
use crate::selfmod;
use crate::sid_file::SidFile;
use crate::trace;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Caller-supplied metadata and address replacements.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    /// Replacement song title
    pub name: Option<String>,
    /// Replacement author
    pub author: Option<String>,
    /// Replacement release/copyright string
    pub released: Option<String>,
    /// Header load address override, applied before analysis
    pub load_address: Option<u16>,
    /// Header init address override
    pub init_address: Option<u16>,
    /// Header play address override
    pub play_address: Option<u16>,
}

impl MetadataOverrides {
    /// Applies the overrides to a parsed file.
    pub fn apply(&self, sid: &mut SidFile) {
        if let Some(name) = &self.name {
            sid.name = name.clone();
        }
        if let Some(author) = &self.author {
            sid.author = author.clone();
        }
        if let Some(released) = &self.released {
            sid.released = released.clone();
        }
        if let Some(load) = self.load_address {
            sid.load_address = load;
        }
        if let Some(init) = self.init_address {
            sid.init_address = init;
        }
        if let Some(play) = self.play_address {
            sid.play_address = play;
        }
    }
}

/// Inputs for one relocation run.
#[derive(Debug, Clone)]
pub struct RelocationParams {
    /// Source PSID file
    pub input: PathBuf,
    /// Destination PSID file
    pub output: PathBuf,
    /// New load address
    pub new_address: u16,
    /// Directory for generated artefacts
    pub temp_dir: PathBuf,
    /// Cross-assembler command line
    pub assembler: String,
    /// Measured frames for analysis and verification
    pub frames: usize,
    /// Play calls per frame
    pub calls_per_frame: usize,
    /// Metadata and address replacements
    pub overrides: MetadataOverrides,
}

/// What a relocation run produced; partial artefacts stay on disk for
/// inspection even after failures.
#[derive(Debug, Default)]
pub struct RelocationReport {
    /// Load address of the input
    pub original_load: u16,
    /// Init entry of the input
    pub original_init: u16,
    /// Play entry of the input
    pub original_play: u16,
    /// Load address of the output
    pub new_load: u16,
    /// Init entry of the output
    pub new_init: u16,
    /// Play entry of the output
    pub new_play: u16,
    /// Generated assembler source
    pub asm_path: PathBuf,
    /// Assembled program image
    pub prg_path: PathBuf,
    /// Trace of the input, when verification ran
    pub original_trace: Option<PathBuf>,
    /// Trace of the output, when verification ran
    pub relocated_trace: Option<PathBuf>,
    /// Diff report, when verification found differences
    pub diff_report: Option<PathBuf>,
    /// Verification verdict; `None` when verification did not run
    pub traces_match: Option<bool>,
    /// False when the output fell back to a raw binary
    pub output_is_sid: bool,
    /// Oddities worth telling the user about
    pub warnings: Vec<String>,
}

/// Relocates `params.input` to the new address and writes the output
/// file, without verification.
pub fn relocate(params: &RelocationParams) -> Result<RelocationReport, RelocationError> {
    for path in [&params.input, &params.output] {
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sid"))
        {
            return Err(RelocationError::NotSidFile { path: path.clone() });
        }
    }

    fs::create_dir_all(&params.temp_dir).map_err(|source| RelocationError::Io {
        path: params.temp_dir.clone(),
        source,
    })?;

    let mut sid = SidFile::load(&params.input)?;
    params.overrides.apply(&mut sid);
    if sid.requires_full_emulation() {
        return Err(crate::error::LoadError::UnsupportedVariant(
            "IRQ-driven tune (play address 0)".into(),
        )
        .into());
    }

    let mut report = RelocationReport {
        original_load: sid.load_address,
        original_init: sid.init_address,
        original_play: sid.play_address,
        new_load: params.new_address,
        new_init: params
            .new_address
            .wrapping_add(sid.init_address.wrapping_sub(sid.load_address)),
        new_play: params
            .new_address
            .wrapping_add(sid.play_address.wrapping_sub(sid.load_address)),
        ..RelocationReport::default()
    };
    info!(
        "relocating {} (md5 {}) from ${:04X} to ${:04X}",
        params.input.display(),
        sid.md5,
        report.original_load,
        report.new_load
    );

    // Learn the memory map by running every song.
    let mut cpu = Cpu::new();
    let options = EmulationOptions {
        frames: params.frames,
        calls_per_frame: params.calls_per_frame,
        capture_trace: false,
        ..EmulationOptions::default()
    };
    let outcome = {
        let mut emulator = Emulator::new(&mut cpu, &sid);
        emulator.run_all_songs(&options)?
    };
    if outcome.frames_executed == 0 {
        return Err(AnalysisError::NoDataCollected.into());
    }
    log::debug!("{}", outcome.pattern_finder.description());

    let footprint = sid.load_address..sid.load_address.wrapping_add(sid.data.len() as u16);
    let selfmod = selfmod::analyze(&cpu, footprint, &outcome.indirect_reads);
    for pattern in &selfmod.patterns {
        let guards: Vec<String> = pattern
            .comparison_pcs
            .iter()
            .map(|pc| format!("${pc:04X}"))
            .collect();
        report.warnings.push(format!(
            "{} operand write(s) at ${:04X}-${:04X} guarded by comparisons at {}; unexercised paths may not relocate",
            pattern.modifications.len(),
            pattern.start_pc,
            pattern.end_pc,
            guards.join(", ")
        ));
    }
    for modification in &selfmod.modifications {
        if let crate::memory::WriteSource::Memory { src, .. } = modification.source {
            report.warnings.push(format!(
                "operand byte ${:04X} is patched from memory ${src:04X} at runtime and cannot be fixed up",
                modification.target
            ));
        }
    }

    let basename = params
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "music".into());
    report.asm_path = params.temp_dir.join(format!("{basename}-relocated.asm"));
    report.prg_path = params.temp_dir.join(format!("{basename}-relocated.prg"));
    let assembler_log = params.temp_dir.join(format!("{basename}-assembler.log"));

    let symbols = BTreeMap::new();
    let disassembly =
        Disassembler::new(&cpu, &sid, &selfmod.fixups, &symbols).generate(params.new_address);
    for warning in &disassembly.warnings {
        warn!("{warning}");
    }
    report.warnings.extend(disassembly.warnings);
    fs::write(&report.asm_path, &disassembly.source).map_err(|source| RelocationError::Io {
        path: report.asm_path.clone(),
        source,
    })?;

    run_assembler(
        &params.assembler,
        &report.asm_path,
        &report.prg_path,
        &assembler_log,
    )?;

    let prg = fs::read(&report.prg_path).map_err(|source| RelocationError::Io {
        path: report.prg_path.clone(),
        source,
    })?;
    if prg.len() < 2 {
        // Not a loadable program; keep the raw output so the user gets
        // something to inspect.
        warn!("assembled output is not a PRG, saving raw binary");
        fs::copy(&report.prg_path, &params.output).map_err(|source| RelocationError::Io {
            path: params.output.clone(),
            source,
        })?;
        report
            .warnings
            .push("output saved as raw binary, not a SID file".into());
        return Ok(report);
    }

    let prg_load = u16::from_le_bytes([prg[0], prg[1]]);
    if prg_load != report.new_load {
        warn!(
            "assembled load address ${prg_load:04X} does not match requested ${:04X}",
            report.new_load
        );
        report.warnings.push(format!(
            "assembled load address ${prg_load:04X} adopted over requested ${:04X}",
            report.new_load
        ));
        report.new_load = prg_load;
    }

    // Header fields other than the entry points travel verbatim.
    let mut out = sid.clone();
    out.load_address = report.new_load;
    out.init_address = report.new_init;
    out.play_address = report.new_play;
    out.data = prg[2..].to_vec();
    out.save(&params.output)?;
    report.output_is_sid = true;
    info!("wrote {}", params.output.display());

    Ok(report)
}

/// Relocates and then verifies by replaying both files and diffing their
/// SID write traces. A mismatch sets `traces_match` to `Some(false)`
/// rather than failing, so callers can decide how hard to react.
pub fn relocate_and_verify(params: &RelocationParams) -> Result<RelocationReport, RelocationError> {
    let mut report = relocate(params)?;
    if !report.output_is_sid {
        warn!("output is not a SID file, skipping trace verification");
        return Ok(report);
    }

    let basename = params
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "music".into());
    let original_trace = params.temp_dir.join(format!("{basename}-original.trace"));
    let relocated_trace = params.temp_dir.join(format!("{basename}-relocated.trace"));
    let diff_report = params.temp_dir.join(format!("{basename}-diff.txt"));

    let mut cpu = Cpu::new();
    capture_trace(
        &mut cpu,
        &params.input,
        &original_trace,
        params.frames,
        params.calls_per_frame,
    )?;
    capture_trace(
        &mut cpu,
        &params.output,
        &relocated_trace,
        params.frames,
        params.calls_per_frame,
    )?;

    let matched = trace::compare_trace_logs(&original_trace, &relocated_trace, &diff_report)
        .map_err(|source| RelocationError::Io {
            path: diff_report.clone(),
            source,
        })?;

    report.original_trace = Some(original_trace);
    report.relocated_trace = Some(relocated_trace);
    report.traces_match = Some(matched);
    if matched {
        info!("relocation verified, before/after traces match");
    } else {
        report.diff_report = Some(diff_report);
        warn!("before/after traces differ");
    }
    Ok(report)
}

/// Replays a file on a freshly reset CPU and writes its SID write trace.
pub fn capture_trace(
    cpu: &mut Cpu,
    input: &Path,
    trace_path: &Path,
    frames: usize,
    calls_per_frame: usize,
) -> Result<(), RelocationError> {
    let sid = SidFile::load(input)?;
    cpu.reset();
    let options = EmulationOptions {
        frames,
        calls_per_frame,
        capture_trace: true,
        track_registers: false,
        detect_pattern: false,
        find_shadows: false,
        ..EmulationOptions::default()
    };
    let outcome = {
        let mut emulator = Emulator::new(cpu, &sid);
        emulator.run(sid.start_song.max(1), &options)?
    };
    info!(
        "captured {} trace frames from {}",
        outcome.trace.frames().len(),
        input.display()
    );
    outcome
        .trace
        .save(trace_path)
        .map_err(|source| RelocationError::Io {
            path: trace_path.to_path_buf(),
            source,
        })
}

/// Invokes the cross-assembler, capturing stdout and stderr to a log
/// file next to the generated source.
pub(crate) fn run_assembler(
    assembler: &str,
    source_file: &Path,
    output_file: &Path,
    log_file: &Path,
) -> Result<(), RelocationError> {
    let mut parts = assembler.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(RelocationError::AssemblerFailed {
            code: -1,
            log: log_file.to_path_buf(),
        });
    };

    let result = Command::new(program)
        .args(parts)
        .arg(source_file)
        .arg("-o")
        .arg(output_file)
        .output();

    match result {
        Ok(output) => {
            let mut captured = output.stdout;
            captured.extend_from_slice(&output.stderr);
            let _ = fs::write(log_file, &captured);
            if output.status.success() {
                Ok(())
            } else {
                Err(RelocationError::AssemblerFailed {
                    code: output.status.code().unwrap_or(-1),
                    log: log_file.to_path_buf(),
                })
            }
        }
        Err(spawn_error) => {
            let _ = fs::write(log_file, spawn_error.to_string());
            Err(RelocationError::AssemblerFailed {
                code: -1,
                log: log_file.to_path_buf(),
            })
        }
    }
}
