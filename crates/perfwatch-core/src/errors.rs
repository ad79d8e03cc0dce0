use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised while moving a database along the migration chain.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A step failed; the stored version stays at `from`.
    #[error("migration step {from} -> {to} ({name}) failed: {cause:#}")]
    Step {
        from: u32,
        to: u32,
        name: &'static str,
        cause: anyhow::Error,
    },

    /// A built-in suite that a step targets is not registered.
    #[error("expected test suite '{name}' is not registered")]
    MissingSuite { name: String },

    /// The database was written by a newer binary.
    #[error("database schema version {found} is newer than supported version {supported}")]
    FutureVersion { found: u32, supported: u32 },

    #[error("no migration path to version {target} (current: {current})")]
    InvalidTarget { current: u32, target: u32 },
}

/// Suite metadata and schema-building errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("field '{field}' in suite '{suite}' collides with reserved column of {table}")]
    ReservedName {
        suite: String,
        table: String,
        field: String,
    },

    #[error("status field of '{field}' must reference a Status field of suite '{suite}': {reason}")]
    InvalidStatusField {
        suite: String,
        field: String,
        reason: String,
    },

    #[error("{entity} already exists: {identifier}")]
    Duplicate {
        entity: &'static str,
        identifier: String,
    },

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("unsupported schema change for suite '{suite}': {reason}")]
    UnsupportedChange { suite: String, reason: String },

    #[error("invalid suite definition: {0}")]
    InvalidDefinition(String),
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Connection-level failures of the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("unknown table: {0}")]
    UnknownTable(String),
}
