use crate::compare::ComparisonSettings;
use crate::errors::ConfigError;
use crate::fieldchange::{TrackerSettings, FIELD_CHANGE_LOOKBACK};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "perfwatch.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfwatchConfig {
    #[serde(rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub comparison: ComparisonSettings,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Suite definition files, relative to the config file.
    #[serde(default)]
    pub suites: Vec<PathBuf>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub lookback: usize,
    pub estimate_stddev_from_history: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lookback: FIELD_CHANGE_LOOKBACK,
            estimate_stddev_from_history: false,
        }
    }
}

impl Default for PerfwatchConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            database: None,
            comparison: ComparisonSettings::default(),
            analysis: AnalysisConfig::default(),
            suites: Vec::new(),
            log_level: None,
        }
    }
}

impl PerfwatchConfig {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            lookback: self.analysis.lookback,
            estimate_stddev_from_history: self.analysis.estimate_stddev_from_history,
            comparison: self.comparison.clone(),
            ..TrackerSettings::default()
        }
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<PerfwatchConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);
    let mut cfg: PerfwatchConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // anchors and extension keys
    let meaningful_unknowns: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| *k != "definitions" && !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                meaningful_unknowns,
                path.display()
            )));
        }
        // Logging is not initialized yet when the CLI loads its config.
        eprintln!(
            "WARN: Ignored unknown config fields: {:?} (file: {})",
            meaningful_unknowns,
            path.display()
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    validate(&cfg)?;
    normalize_paths(&mut cfg, path);
    Ok(cfg)
}

fn validate(cfg: &PerfwatchConfig) -> Result<(), ConfigError> {
    let c = &cfg.comparison;
    if c.confidence_interval <= 0.0 {
        return Err(ConfigError("comparison.confidence_interval must be positive".into()));
    }
    if !(0.0..1.0).contains(&c.confidence_level) {
        return Err(ConfigError("comparison.confidence_level must be in [0, 1)".into()));
    }
    if cfg.analysis.lookback == 0 {
        return Err(ConfigError("analysis.lookback must be at least 1".into()));
    }
    Ok(())
}

fn normalize_paths(cfg: &mut PerfwatchConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    let resolve = |p: &PathBuf| {
        if p.is_absolute() {
            p.clone()
        } else {
            base.join(p)
        }
    };
    cfg.suites = cfg.suites.iter().map(resolve).collect();
    cfg.database = cfg.database.as_ref().map(resolve);
}
