// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_workspace_root() -> String {
    ".dialogs".into()
}

fn default_driver_engine() -> DriverEngine {
    DriverEngine::V1
}

fn default_push_max() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    5
}

/// Which generation loop the driver should run. `v1` (the single-course
/// loop implemented by `dialog_core::Driver`) is the only engine wired up
/// so far; `v2` is recognized but not yet implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverEngine {
    V1,
    V2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiligenceConfig {
    /// Path (relative to the agent's task document directory) to the
    /// agent-specific diligence nudge text.
    pub file: Option<String>,
    /// Fallback diligence text used when `file` is absent or unreadable.
    pub generic_file: Option<String>,
    #[serde(default = "default_push_max")]
    pub push_max: u32,
}

impl Default for DiligenceConfig {
    fn default() -> Self {
        Self {
            file: None,
            generic_file: None,
            push_max: default_push_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Overrides the default `.dialogs/` directory location, relative to
    /// the process working directory unless absolute.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default = "default_driver_engine")]
    pub driver_engine: DriverEngine,
    #[serde(default)]
    pub diligence: DiligenceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            driver_engine: default_driver_engine(),
            diligence: DiligenceConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.workspace_root, ".dialogs");
        assert_eq!(cfg.driver_engine, DriverEngine::V1);
        assert_eq!(cfg.diligence.push_max, 3);
        assert_eq!(cfg.retry.max_retries, 5);
    }

    #[test]
    fn driver_engine_serializes_lowercase() {
        let yaml = serde_yaml::to_string(&DriverEngine::V2).unwrap();
        assert_eq!(yaml.trim(), "v2");
    }
}
