// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Error taxonomy shared across the toolkit.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing or planting a SID file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File is smaller than the fixed header.
    #[error("file too short: {size} bytes, need at least {need}")]
    FileTooShort {
        /// Actual file size
        size: usize,
        /// Minimum size for the claimed version
        need: usize,
    },
    /// Magic bytes are neither PSID nor RSID.
    #[error("bad magic {0:02X?}, not a SID file")]
    BadMagic([u8; 4]),
    /// RSID files need full machine emulation and are rejected.
    #[error("unsupported variant {0:?} (requires CIA/interrupt emulation)")]
    UnsupportedVariant(String),
    /// Header version outside 1..=4.
    #[error("unsupported SID version {0}")]
    UnsupportedVersion(u16),
    /// Header says the load address is embedded but the data is too short.
    #[error("load address 0 but no embedded address in program data")]
    MissingEmbeddedLoadAddress,
    /// Program image would run past $FFFF.
    #[error("program of {size} bytes at ${load:04X} overflows 64K memory")]
    ProgramOverflowsMemory {
        /// Resolved load address
        load: u16,
        /// Program byte count
        size: usize,
    },
    /// Underlying filesystem failure.
    #[error("cannot open {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// OS error
        source: std::io::Error,
    },
}

/// Errors raised by the CPU while executing 6502 code.
#[derive(Debug, Error)]
pub enum EmulationError {
    /// A call ran longer than the per-call cycle budget.
    #[error("cycle budget of {budget} exceeded at ${pc:04X}")]
    CycleBudgetExceeded {
        /// PC when the budget ran out
        pc: u16,
        /// Configured budget
        budget: u64,
    },
    /// A KIL/JAM opcode was fetched; the real chip would lock up.
    #[error("halting opcode ${opcode:02X} at ${pc:04X}")]
    IllegalHaltingOpcode {
        /// Offending opcode byte
        opcode: u8,
        /// Address of the opcode
        pc: u16,
    },
    /// RTS executed with nothing of ours left on the stack.
    #[error("stack underflow on RTS at ${pc:04X}")]
    StackUnderflow {
        /// Address of the RTS
        pc: u16,
    },
}

/// Errors raised by the analysis passes.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The emulation produced no frames to analyse.
    #[error("no frames collected, nothing to analyse")]
    NoDataCollected,
}

/// Errors raised during relocation. Partial artefacts stay on disk so the
/// user can inspect them; their paths travel in [`crate::relocate::RelocationReport`].
#[derive(Debug, Error)]
pub enum RelocationError {
    /// Relocation works on `.sid` files only.
    #[error("{path} must be a SID file (.sid)")]
    NotSidFile {
        /// Offending input or output path
        path: PathBuf,
    },
    /// The external assembler returned a non-zero exit code.
    #[error("assembler failed with exit code {code}, see {log}")]
    AssemblerFailed {
        /// Assembler exit code (-1 if killed by signal)
        code: i32,
        /// Captured assembler output
        log: PathBuf,
    },
    /// Before/after SID write traces differ. Non-fatal; exit code 2.
    #[error("verification failed: traces differ, see {diff}")]
    VerifyMismatch {
        /// Diff report path
        diff: PathBuf,
    },
    /// Loading the input (or reloading the output) failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Emulating the tune failed.
    #[error(transparent)]
    Emulation(#[from] EmulationError),
    /// Analysing the emulation output failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    /// Filesystem failure while writing artefacts.
    #[error("cannot write {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// OS error
        source: std::io::Error,
    },
}
