use clap::{Parser, Subcommand, ValueEnum};
use perfwatch_core::compare::Aggregation;
use perfwatch_core::storage::Dialect;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "perfwatch",
    version,
    about = "Per-suite schema migrations and regression detection for performance data"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(clap::Args, Clone)]
pub struct GlobalArgs {
    /// config file (defaults to perfwatch.yaml in the working directory, if present)
    #[arg(long, global = true, env = "PERFWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// database path (overrides `database` from the config file)
    #[arg(long, global = true, env = "PERFWATCH_DB")]
    pub db: Option<PathBuf>,

    /// reject unknown config keys instead of warning
    #[arg(long, global = true)]
    pub strict: bool,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// tracing filter, e.g. `info` or `perfwatch_core=debug`
    #[arg(long, global = true, env = "PERFWATCH_LOG")]
    pub log_level: Option<String>,

    /// emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upgrade the database along the migration chain
    Migrate(MigrateArgs),
    /// Provision and evolve test suites
    Suite(SuiteArgs),
    /// Print the DDL of a suite's tables
    Schema(SchemaArgs),
    /// Classify a current measurement against a previous one
    Compare(CompareArgs),
    /// Recompute field changes and regressions for one run
    Regenerate(RegenerateArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct MigrateArgs {
    /// report the current version and pending steps without applying them
    #[arg(long)]
    pub status: bool,

    /// stop at this schema version
    #[arg(long, conflicts_with = "status")]
    pub to: Option<u32>,
}

#[derive(Parser, Clone)]
pub struct SuiteArgs {
    #[command(subcommand)]
    pub cmd: SuiteSub,
}

#[derive(Subcommand, Clone)]
pub enum SuiteSub {
    /// Create a suite from a YAML definition
    Create { path: PathBuf },
    /// Create or additively update suites from definitions (all configured suites if no path)
    Sync {
        path: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Append a sample field to a registered suite
    AddField {
        suite: String,
        name: String,
        #[arg(long = "type", default_value = "Real")]
        sample_type: String,
        #[arg(long)]
        info_key: Option<String>,
        /// Status field that gates this one
        #[arg(long)]
        status_field: Option<String>,
        #[arg(long)]
        bigger_is_better: bool,
    },
    List,
}

#[derive(Parser, Clone)]
pub struct SchemaArgs {
    /// registered suite to render
    #[arg(required_unless_present = "definition")]
    pub suite: Option<String>,

    /// render from a definition file instead of the database
    #[arg(long, conflicts_with = "suite")]
    pub definition: Option<PathBuf>,

    #[arg(long, default_value = "sqlite")]
    pub dialect: Dialect,

    /// schema version to render (defaults to the latest)
    #[arg(long)]
    pub schema_version: Option<u32>,
}

#[derive(Parser, Clone)]
pub struct CompareArgs {
    /// current samples, comma separated
    #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
    pub current: Vec<f64>,

    /// previous samples, comma separated
    #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
    pub previous: Vec<f64>,

    /// known standard deviation of the measurement
    #[arg(long, conflicts_with = "history")]
    pub stddev: Option<f64>,

    /// historical values used to estimate a standard deviation
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub history: Vec<f64>,

    #[arg(long)]
    pub bigger_is_better: bool,

    #[arg(long, value_enum, default_value_t = AggregationArg::Min)]
    pub aggregation: AggregationArg,

    #[arg(long)]
    pub current_failed: bool,

    #[arg(long)]
    pub previous_failed: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum AggregationArg {
    Min,
    Max,
    Mean,
    Median,
}

impl From<AggregationArg> for Aggregation {
    fn from(a: AggregationArg) -> Self {
        match a {
            AggregationArg::Min => Aggregation::Min,
            AggregationArg::Max => Aggregation::Max,
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Median => Aggregation::Median,
        }
    }
}

#[derive(Parser, Clone)]
pub struct RegenerateArgs {
    pub suite: String,
    pub run: i64,
}
