// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! User configuration persistence.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_assembler() -> String {
    "java -jar KickAss.jar -silentMode".into()
}

fn default_frames() -> usize {
    crate::emulator::DEFAULT_EMULATION_FRAMES
}

fn default_calls_per_frame() -> usize {
    1
}

fn default_shadow_reliability() -> f32 {
    0.95
}

fn default_shadow_min_checks() -> u32 {
    50
}

fn default_warmup_frames() -> usize {
    crate::shadow::DEFAULT_WARMUP_FRAMES
}

fn default_max_init_frames() -> usize {
    15
}

fn default_temp_dir() -> PathBuf {
    "temp".into()
}

fn default_player_directory() -> PathBuf {
    "players".into()
}

/// User configuration stored in config file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Cross-assembler command line
    #[serde(default = "default_assembler")]
    pub assembler: String,
    /// Measured emulation frames per experiment
    #[serde(default = "default_frames")]
    pub emulation_frames: usize,
    /// Play calls per frame unless overridden per run
    #[serde(default = "default_calls_per_frame")]
    pub calls_per_frame: usize,
    /// Shadow-register acceptance threshold
    #[serde(default = "default_shadow_reliability")]
    pub shadow_reliability: f32,
    /// Shadow-register minimum sample count
    #[serde(default = "default_shadow_min_checks")]
    pub shadow_min_checks: u32,
    /// Frames the shadow scan skips at the start
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: usize,
    /// Most init frames the pattern search considers
    #[serde(default = "default_max_init_frames")]
    pub max_init_frames: usize,
    /// Working directory for generated artefacts
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Directory holding visualiser player templates
    #[serde(default = "default_player_directory")]
    pub player_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assembler: default_assembler(),
            emulation_frames: default_frames(),
            calls_per_frame: default_calls_per_frame(),
            shadow_reliability: default_shadow_reliability(),
            shadow_min_checks: default_shadow_min_checks(),
            warmup_frames: default_warmup_frames(),
            max_init_frames: default_max_init_frames(),
            temp_dir: default_temp_dir(),
            player_directory: default_player_directory(),
        }
    }
}

impl Config {
    /// Loads config from file, returning defaults if not found or invalid.
    pub fn load() -> Self {
        config_path()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Saves config to file (best-effort, errors ignored).
    #[allow(dead_code)] // Exposed for a future `--save-config` flag
    pub fn save(&self) {
        let Some(path) = config_path() else { return };
        let Some(parent) = path.parent() else { return };
        let _ = fs::create_dir_all(parent);
        if let Ok(content) = toml::to_string_pretty(self) {
            let _ = fs::write(&path, content);
        }
    }
}

/// Returns the config file path (~/.config/sidshift/config.toml).
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sidshift").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert!(config.assembler.contains("KickAss"));
        assert_eq!(config.calls_per_frame, 1);
        assert!(config.shadow_reliability > 0.9);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("emulation_frames = 250\n").expect("parses");
        assert_eq!(config.emulation_frames, 250);
        assert_eq!(config.shadow_min_checks, 50);
    }
}
