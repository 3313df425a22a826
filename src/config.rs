// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! User configuration persistence.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default frame count for `dump` when none is given (30 seconds of PAL).
const fn default_dump_frames() -> usize {
    1500
}

/// Default driver hint for `convert`.
fn default_driver() -> String {
    "auto".to_string()
}

/// User configuration stored in config file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Driver hint used when `convert` is called without `--driver`
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Frames dumped when `dump` is called without `--frames`
    #[serde(default = "default_dump_frames")]
    pub dump_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            dump_frames: default_dump_frames(),
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
    pub fn save(&self) {
        let Some(path) = config_path() else { return };
        let Some(parent) = path.parent() else { return };
        let _ = fs::create_dir_all(parent);
        if let Ok(content) = toml::to_string_pretty(self) {
            let _ = fs::write(&path, content);
        }
    }
}

/// Returns the config file path (~/.config/sidwrap/config.toml).
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sidwrap").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = toml::from_str("").expect("empty config parses");
        assert_eq!(config.driver, "auto");
        assert_eq!(config.dump_frames, 1500);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: Config = toml::from_str("driver = \"laxity\"").expect("parse");
        assert_eq!(config.driver, "laxity");
        assert_eq!(config.dump_frames, 1500);
    }
}
