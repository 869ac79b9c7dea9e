// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! SIDshift - analyzer, relocator and disassembler for C64 .sid files.

#![deny(missing_docs)]

mod config;
mod cpu;
mod disasm;
mod emulator;
mod error;
mod memory;
mod pattern;
mod player;
mod relocate;
mod selfmod;
mod shadow;
mod sid_file;
mod trace;
mod write_tracker;

use clap::Parser;
use config::Config;
use cpu::Cpu;
use disasm::Disassembler;
use emulator::{EmulationOptions, Emulator};
use error::RelocationError;
use log::warn;
use relocate::{MetadataOverrides, RelocationParams};
use sid_file::SidFile;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "sidshift",
    version,
    about = "SID tune analyzer, relocator and disassembler"
)]
struct Args {
    /// SID file to process
    input: PathBuf,

    /// Output file (required by --relocate and --player)
    output: Option<PathBuf>,

    /// Relocate the tune to this address, e.g. $2000
    #[arg(short, long, value_name = "ADDR", value_parser = parse_address)]
    relocate: Option<u16>,

    /// Write a SID register trace (.txt/.log mean text, else binary)
    #[arg(
        long,
        value_name = "FILE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "trace.bin"
    )]
    trace: Option<PathBuf>,

    /// Link the tune with a visualiser player template
    #[arg(
        long,
        value_name = "NAME",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "SimpleRaster"
    )]
    player: Option<String>,

    /// Emit assembler source for the tune
    #[arg(short, long)]
    disassemble: bool,

    /// Override the song title in the output header
    #[arg(long, value_name = "TEXT")]
    sidname: Option<String>,

    /// Override the author in the output header
    #[arg(long, value_name = "TEXT")]
    sidauthor: Option<String>,

    /// Override the copyright/release field in the output header
    #[arg(long, value_name = "TEXT")]
    sidcopyright: Option<String>,

    /// Override the header load address
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    sidloadaddr: Option<u16>,

    /// Override the header init address
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    sidinitaddr: Option<u16>,

    /// Override the header play address
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    sidplayaddr: Option<u16>,

    /// Address the player code assembles at
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    playeraddr: Option<u16>,

    /// Frames to emulate (default from config)
    #[arg(long)]
    frames: Option<usize>,

    /// Play calls per frame for multi-speed tunes
    #[arg(long, value_name = "N")]
    calls_per_frame: Option<usize>,

    /// Cross-assembler command line
    #[arg(long, value_name = "CMD")]
    assembler: Option<String>,

    /// Write the memory access map (E1RWJ flag rows) to a file
    #[arg(long, value_name = "FILE")]
    dump_access: Option<PathBuf>,
}

/// Accepts `$1000`, `0x1000` and `1000`, all hexadecimal.
fn parse_address(value: &str) -> Result<u16, String> {
    let digits = value
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| format!("not a hex address: {value}"))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("sidshift: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Box<dyn Error>> {
    let config = Config::load();
    let frames = args.frames.unwrap_or(config.emulation_frames);
    let calls_per_frame = args.calls_per_frame.unwrap_or(config.calls_per_frame);
    let assembler = args.assembler.clone().unwrap_or(config.assembler.clone());
    let overrides = MetadataOverrides {
        name: args.sidname.clone(),
        author: args.sidauthor.clone(),
        released: args.sidcopyright.clone(),
        load_address: args.sidloadaddr,
        init_address: args.sidinitaddr,
        play_address: args.sidplayaddr,
    };

    if let Some(new_address) = args.relocate {
        let output = args
            .output
            .clone()
            .ok_or("relocation needs an output file")?;
        let params = RelocationParams {
            input: args.input.clone(),
            output,
            new_address,
            temp_dir: config.temp_dir.clone(),
            assembler,
            frames,
            calls_per_frame,
            overrides,
        };
        let report = relocate::relocate_and_verify(&params)?;
        println!(
            "relocated ${:04X} -> ${:04X} (init ${:04X} -> ${:04X}, play ${:04X} -> ${:04X})",
            report.original_load,
            report.new_load,
            report.original_init,
            report.new_init,
            report.original_play,
            report.new_play
        );
        for warning in &report.warnings {
            warn!("{warning}");
        }
        if let (Some(original), Some(relocated)) =
            (&report.original_trace, &report.relocated_trace)
        {
            log::debug!(
                "traces at {} and {}",
                original.display(),
                relocated.display()
            );
        }
        if report.traces_match == Some(false) {
            let diff = report.diff_report.clone().unwrap_or_default();
            let mismatch = RelocationError::VerifyMismatch { diff };
            eprintln!("sidshift: {mismatch}");
            return Ok(ExitCode::from(2));
        }
        println!("verified: before/after traces match");
        return Ok(ExitCode::SUCCESS);
    }

    if args.disassemble {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| args.input.with_extension("asm"));
        let mut sid = SidFile::load(&args.input)?;
        overrides.apply(&mut sid);
        let (cpu, outcome) = analyse(&sid, frames, calls_per_frame, &config)?;
        let footprint = sid.load_address..sid.load_address.wrapping_add(sid.data.len() as u16);
        let report = selfmod::analyze(&cpu, footprint, &outcome.indirect_reads);
        let symbols = BTreeMap::new();
        let disassembly =
            Disassembler::new(&cpu, &sid, &report.fixups, &symbols).generate(sid.load_address);
        for warning in &disassembly.warnings {
            warn!("{warning}");
        }
        fs::write(&output, &disassembly.source)?;
        if let Some(path) = &args.dump_access {
            fs::write(path, cpu.memory().dump_access())?;
        }
        println!("wrote {}", output.display());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(name) = args.player.clone() {
        let output = args
            .output
            .clone()
            .ok_or("player build needs an output file")?;
        let mut sid = SidFile::load(&args.input)?;
        overrides.apply(&mut sid);
        let (cpu, outcome) = analyse(&sid, frames, calls_per_frame, &config)?;

        // The player links against the music as a plain PRG.
        let music_prg = config.temp_dir.join("music.prg");
        fs::create_dir_all(&config.temp_dir)?;
        let mut prg = sid.load_address.to_le_bytes().to_vec();
        prg.extend_from_slice(&sid.data);
        fs::write(&music_prg, prg)?;

        let options = player::PlayerOptions {
            name,
            address: args.playeraddr.unwrap_or(0x4000),
            calls_per_frame,
            player_directory: config.player_directory.clone(),
        };
        player::build_player(
            &cpu,
            &sid,
            &outcome,
            &options,
            &music_prg,
            &config.temp_dir,
            &assembler,
            &output,
        )?;
        println!("wrote {}", output.display());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(trace_path) = args.trace.clone() {
        let mut cpu = Cpu::new();
        relocate::capture_trace(&mut cpu, &args.input, &trace_path, frames, calls_per_frame)?;
        println!("wrote {}", trace_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    // No command: analyse and report.
    let mut sid = SidFile::load(&args.input)?;
    overrides.apply(&mut sid);
    let (cpu, outcome) = analyse(&sid, frames, calls_per_frame, &config)?;
    if let Some(path) = &args.dump_access {
        fs::write(path, cpu.memory().dump_access())?;
    }
    println!("Title:    {}", sid.name);
    println!("Author:   {}", sid.author);
    println!("Released: {}", sid.released);
    println!(
        "Load:     ${:04X}-${:04X}",
        sid.load_address,
        usize::from(sid.load_address) + sid.data.len() - 1
    );
    println!("Init:     ${:04X}", sid.init_address);
    println!("Play:     ${:04X}", sid.play_address);
    println!("Songs:    {} (start {})", sid.songs, sid.start_song);
    println!("Clock:    {}", if sid.is_pal() { "PAL" } else { "NTSC" });
    if let Some(addr) = sid.second_sid_address() {
        println!("2nd SID:  ${addr:04X}");
    }
    if let Some(addr) = sid.third_sid_address() {
        println!("3rd SID:  ${addr:04X}");
    }
    println!(
        "Cycles:   avg {}/frame, max {}, total {}",
        outcome.avg_cycles_per_frame, outcome.max_cycles_per_frame, outcome.total_cycles
    );
    println!(
        "Writes:   {} ({} frames with SID writes)",
        outcome.total_writes,
        outcome.pattern_finder.frame_count()
    );
    if !outcome.cia_writes.is_empty() {
        println!("Note:     tune writes the CIA timers (CIA-driven timing?)");
    }
    if !outcome.vic_writes.is_empty() {
        println!("Note:     tune writes the VIC-II (expects raster interrupts?)");
    }
    if outcome.tracker.has_consistent_pattern() {
        let order: Vec<String> = outcome
            .tracker
            .write_order()
            .iter()
            .map(|reg| format!("${reg:02X}"))
            .collect();
        println!("Order:    {}", order.join(" "));
    }
    match outcome.pattern {
        Some(p) => println!(
            "Pattern:  {} init frame(s), repeats every {} frame(s)",
            p.init_frames, p.period
        ),
        None => println!("Pattern:  none detected"),
    }
    println!("{}", outcome.shadows.summary());
    Ok(ExitCode::SUCCESS)
}

/// Runs the analysis phases over an already-parsed file.
fn analyse(
    sid: &SidFile,
    frames: usize,
    calls_per_frame: usize,
    config: &Config,
) -> Result<(Cpu, emulator::EmulationOutcome), Box<dyn Error>> {
    if sid.requires_full_emulation() {
        return Err("IRQ-driven tune (play address 0) cannot be driven by init/play calls".into());
    }
    let mut cpu = Cpu::new();
    let options = EmulationOptions {
        frames,
        calls_per_frame,
        shadow_warmup_frames: config.warmup_frames,
        shadow_reliability: config.shadow_reliability,
        shadow_min_checks: config.shadow_min_checks,
        max_init_frames: config.max_init_frames,
        ..EmulationOptions::default()
    };
    let outcome = {
        let mut emulator = Emulator::new(&mut cpu, sid);
        emulator.run_all_songs(&options)?
    };
    Ok((cpu, outcome))
}
