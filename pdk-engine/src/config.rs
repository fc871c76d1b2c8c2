// Configuration
// Layered discovery of `.pdkrc` / `pdk.config.json` plus environment overrides

use crate::error::{EngineError, EngineResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: &[&str] = &[".pdkrc", "pdk.config.json"];

const DEBOUNCE_MIN_MS: u64 = 100;
const DEBOUNCE_MAX_MS: u64 = 10_000;

/// User-facing configuration, merged from discovered files and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdkConfig {
    /// Runner policy: `docker`, `host`, or `auto`
    pub runner: Option<String>,
    /// Default step timeout in seconds
    pub timeout_seconds: Option<u64>,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
    /// Variables injected at the configuration-file layer
    pub variables: HashMap<String, String>,
    /// Named include/skip bundles for the step filter
    pub presets: HashMap<String, Preset>,
    pub masking: MaskingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    debounce_ms: Option<u64>,
}

impl WatchConfig {
    /// Effective debounce, clamped to the supported range.
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
            .unwrap_or(500)
            .clamp(DEBOUNCE_MIN_MS, DEBOUNCE_MAX_MS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// `trace|debug|information|warning|error`
    pub level: Option<String>,
    pub file: Option<PathBuf>,
    /// `text` or `json`
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaskingConfig {
    pub enabled: bool,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A named bundle of include/skip step specifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preset {
    pub steps: Vec<String>,
    pub skip_steps: Vec<String>,
}

impl PdkConfig {
    /// Load configuration for the given working directory: files discovered
    /// walking upward (nearest wins per field), then the home directory,
    /// then environment overrides on top.
    pub fn load(cwd: &Path) -> EngineResult<Self> {
        let mut config = PdkConfig::default();

        // Farthest first so nearer files override.
        let mut files: Vec<PathBuf> = Vec::new();
        if let Some(home) = dirs::home_dir() {
            for name in CONFIG_FILE_NAMES {
                let candidate = home.join(name);
                if candidate.is_file() {
                    files.push(candidate);
                }
            }
        }
        let mut ancestors: Vec<&Path> = cwd.ancestors().collect();
        ancestors.reverse();
        for dir in ancestors {
            for name in CONFIG_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() && !files.contains(&candidate) {
                    files.push(candidate);
                }
            }
        }

        for file in files {
            let parsed = Self::parse_file(&file)?;
            config.merge_from(parsed);
        }

        config.apply_environment();
        Ok(config)
    }

    fn parse_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::Config(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Overlay `other` on top of this config; fields set in `other` win.
    fn merge_from(&mut self, other: PdkConfig) {
        if other.runner.is_some() {
            self.runner = other.runner;
        }
        if other.timeout_seconds.is_some() {
            self.timeout_seconds = other.timeout_seconds;
        }
        if other.watch.debounce_ms.is_some() {
            self.watch.debounce_ms = other.watch.debounce_ms;
        }
        if other.logging.level.is_some() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }
        if other.logging.format.is_some() {
            self.logging.format = other.logging.format;
        }
        self.variables.extend(other.variables);
        self.presets.extend(other.presets);
        if !other.masking.enabled {
            self.masking.enabled = false;
        }
    }

    /// `PDK_*` environment overrides, applied after file merging.
    fn apply_environment(&mut self) {
        if let Ok(level) = std::env::var("PDK_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Ok(runner) = std::env::var("PDK_RUNNER") {
            self.runner = Some(runner);
        }
        if let Ok(ms) = std::env::var("PDK_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse() {
                self.watch.debounce_ms = Some(ms);
            }
        }
        if std::env::var_os("PDK_NO_REDACT").is_some() {
            self.masking.enabled = false;
        }
    }

    /// `PDK_VAR_*` variables with the prefix stripped.
    pub fn env_variables() -> HashMap<String, String> {
        std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix("PDK_VAR_")
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), v))
            })
            .collect()
    }
}
