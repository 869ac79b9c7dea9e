// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Visualiser player linking.
//!
//! A player build joins a named player template (external KickAss
//! source, looked up under the configured player directory) with the
//! analysed music and a generated "helpful data" file carrying what the
//! emulation learned: which addresses the tune modifies, the canonical
//! register write order, the frame pattern, and any shadow registers a
//! visualiser can read instead of the write-only SID.

use crate::cpu::Cpu;
use crate::emulator::EmulationOutcome;
use crate::error::RelocationError;
use crate::memory::{Access, is_sid};
use crate::sid_file::SidFile;
use log::info;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Player build settings.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Template name under the player directory
    pub name: String,
    /// Address the player code assembles at
    pub address: u16,
    /// Play calls per frame the player should issue
    pub calls_per_frame: usize,
    /// Directory holding player templates
    pub player_directory: PathBuf,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            name: "SimpleRaster".into(),
            address: 0x4000,
            calls_per_frame: 1,
            player_directory: "players".into(),
        }
    }
}

/// Renders the helpful-data assembler include from an analysed run.
pub fn helpful_data_source(cpu: &Cpu, outcome: &EmulationOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated helpful data");
    let _ = writeln!(out);

    // Modified memory outside the SID window
    let modified: Vec<u16> = (0..=0xFFFFu16)
        .filter(|&addr| cpu.memory().access(addr).contains(Access::WRITE) && !is_sid(addr))
        .collect();
    let mut list = String::from(".var SIDModifiedMemory = List()");
    for addr in &modified {
        let _ = write!(list, ".add(${addr:04X})");
    }
    out.push_str(&list);
    out.push('\n');
    let _ = writeln!(
        out,
        ".var SIDModifiedMemoryCount = SIDModifiedMemory.size()  // {} total",
        modified.len()
    );
    let _ = writeln!(out);

    if outcome.tracker.has_consistent_pattern() {
        let _ = writeln!(out, "#define SID_REGISTER_REORDER_AVAILABLE");
        out.push_str(&outcome.tracker.write_order_source());
    } else {
        let _ = writeln!(out, ".var SIDRegisterCount = 0");
        let _ = writeln!(out, ".var SIDRegisterOrder = List()");
    }
    let _ = writeln!(out);

    match outcome.pattern_finder.pattern() {
        Some(pattern) => {
            let _ = writeln!(out, "#define SID_PATTERN_DETECTED");
            let _ = writeln!(out, ".var SIDInitFrames = {}", pattern.init_frames);
            let _ = writeln!(out, ".var SIDPatternPeriod = {}", pattern.period);
        }
        None => {
            let _ = writeln!(out, ".var SIDInitFrames = 0");
            let _ = writeln!(out, ".var SIDPatternPeriod = 0");
        }
    }
    let _ = writeln!(out);

    out.push_str(&outcome.shadows.helpful_data_section());
    out
}

/// Renders the linker source combining player template, helpful data and
/// the music binary.
pub fn linker_source(
    sid: &SidFile,
    options: &PlayerOptions,
    music_prg: &Path,
    helpful_data: &Path,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// {} player link for \"{}\"", options.name, sid.name);
    let _ = writeln!(out, ".var music_init = ${:04X}", sid.init_address);
    let _ = writeln!(out, ".var music_play = ${:04X}", sid.play_address);
    let _ = writeln!(out, ".var play_calls_per_frame = {}", options.calls_per_frame);
    let _ = writeln!(out, "#import \"{}\"", helpful_data.display());
    let _ = writeln!(out);
    let _ = writeln!(out, "* = ${:04X} \"Player\"", options.address);
    let _ = writeln!(
        out,
        "#import \"{}\"",
        options
            .player_directory
            .join(&options.name)
            .join(format!("{}.asm", options.name))
            .display()
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        ".var music = LoadBinary(\"{}\", BF_C64FILE)",
        music_prg.display()
    );
    let _ = writeln!(out, "* = music.getStartAddress() \"Music\"");
    let _ = writeln!(out, ".fill music.getSize(), music.get(i)");
    out
}

/// Builds a standalone player executable: helpful data, linker source,
/// then one assembler run producing `output`.
pub fn build_player(
    cpu: &Cpu,
    sid: &SidFile,
    outcome: &EmulationOutcome,
    options: &PlayerOptions,
    music_prg: &Path,
    temp_dir: &Path,
    assembler: &str,
    output: &Path,
) -> Result<(), RelocationError> {
    fs::create_dir_all(temp_dir).map_err(|source| RelocationError::Io {
        path: temp_dir.to_path_buf(),
        source,
    })?;

    let helpful_path = temp_dir.join("helpful-data.asm");
    fs::write(&helpful_path, helpful_data_source(cpu, outcome)).map_err(|source| {
        RelocationError::Io {
            path: helpful_path.clone(),
            source,
        }
    })?;

    let linker_path = temp_dir.join("player-link.asm");
    fs::write(
        &linker_path,
        linker_source(sid, options, music_prg, &helpful_path),
    )
    .map_err(|source| RelocationError::Io {
        path: linker_path.clone(),
        source,
    })?;

    let log_path = temp_dir.join("player-assembler.log");
    crate::relocate::run_assembler(assembler, &linker_path, output, &log_path)?;
    info!("built player executable {}", output.display());
    Ok(())
}
