//! Engine settings. Values come from defaults or `COLFLOW_*` environment
//! variables, with an embedded manifest section layered on top.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PATH_DEPTH: usize = 16;
pub const DEFAULT_MAX_AUGMENT_ROUNDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluate map, link and merge columns only over rows added since the last run.
    pub incremental: bool,
    /// Longest column path, and deepest filter/product inheritance search.
    pub max_path_depth: usize,
    /// Fixpoint rounds allowed for augmentation before giving up.
    pub max_augment_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { incremental: false, max_path_depth: DEFAULT_MAX_PATH_DEPTH, max_augment_rounds: DEFAULT_MAX_AUGMENT_ROUNDS }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let incremental = std::env::var("COLFLOW_INCREMENTAL").ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let max_path_depth = std::env::var("COLFLOW_MAX_PATH_DEPTH").ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_PATH_DEPTH);
        let max_augment_rounds = std::env::var("COLFLOW_MAX_AUGMENT_ROUNDS").ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_AUGMENT_ROUNDS);
        Self { incremental, max_path_depth, max_augment_rounds }
    }

    pub fn with_incremental(mut self, on: bool) -> Self { self.incremental = on; self }

    /// Replace the fields `overrides` sets; everything else keeps its value.
    pub fn overlay(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(v) = overrides.incremental { self.incremental = v; }
        if let Some(v) = overrides.max_path_depth.filter(|v| *v > 0) { self.max_path_depth = v; }
        if let Some(v) = overrides.max_augment_rounds.filter(|v| *v > 0) { self.max_augment_rounds = v; }
        self
    }
}

/// Partial settings, as embedded in a workflow manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub incremental: Option<bool>,
    pub max_path_depth: Option<usize>,
    pub max_augment_rounds: Option<usize>,
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
