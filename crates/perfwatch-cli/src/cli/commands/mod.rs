use super::args::*;
use perfwatch_core::config::{load_config, PerfwatchConfig, DEFAULT_CONFIG_FILE};
use perfwatch_core::storage::Store;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub mod compare;
pub mod migrate;
pub mod regenerate;
pub mod schema;
pub mod suite;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const REGRESSION_FOUND: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

const DEFAULT_DB: &str = ".perfwatch/perfwatch.db";

/// Settings shared by every command once flags and config are merged.
pub struct Session {
    pub config: PerfwatchConfig,
    pub db: PathBuf,
    pub format: OutputFormat,
}

impl Session {
    pub fn open_store(&self) -> anyhow::Result<Store> {
        ensure_parent_dir(&self.db)?;
        Store::open(&self.db)
    }

    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(value),
        }
        Ok(())
    }
}

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if let Command::Version = cli.cmd {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(exit_codes::OK);
    }

    let config = match resolve_config(&cli.global) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let level = cli
        .global
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    crate::init_logging(&level, cli.global.log_json);

    let db = cli
        .global
        .db
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    let session = Session {
        config,
        db,
        format: cli.global.format,
    };

    match cli.cmd {
        Command::Migrate(args) => migrate::cmd_migrate(args, &session),
        Command::Suite(args) => suite::cmd_suite(args, &session),
        Command::Schema(args) => schema::cmd_schema(args, &session),
        Command::Compare(args) => compare::cmd_compare(args, &session),
        Command::Regenerate(args) => regenerate::cmd_regenerate(args, &session),
        Command::Version => Ok(exit_codes::OK),
    }
}

fn resolve_config(global: &GlobalArgs) -> anyhow::Result<PerfwatchConfig> {
    let path = match &global.config {
        Some(p) => p.clone(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(PerfwatchConfig::default());
            }
            default
        }
    };
    load_config(&path, global.strict).map_err(|e| anyhow::anyhow!(e))
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
