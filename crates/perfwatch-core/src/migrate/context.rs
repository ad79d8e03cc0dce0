use crate::errors::MigrationError;
use crate::model::{SampleField, Suite};
use crate::schema::{self, ColumnDef, IndexDef, SchemaSnapshot};
use crate::storage::metadata::{self, SuiteRef};
use crate::storage::store::{get_columns, table_exists};
use crate::storage::DdlCompiler;
use anyhow::Context;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Everything a step may touch, scoped to a single migration run.
///
/// DDL issued through the context runs in autocommit mode, so each statement
/// is committed before the next query. Data backfills go through
/// [`MigrationContext::transaction`].
pub struct MigrationContext<'c> {
    conn: &'c mut Connection,
    ddl: DdlCompiler,
    target: u32,
    warnings: Vec<String>,
}

impl<'c> MigrationContext<'c> {
    pub fn new(conn: &'c mut Connection, ddl: DdlCompiler, target: u32) -> Self {
        Self {
            conn,
            ddl,
            target,
            warnings: Vec::new(),
        }
    }

    /// Version this step moves the database to.
    pub fn target_version(&self) -> u32 {
        self.target
    }

    pub fn conn(&self) -> &Connection {
        &*self.conn
    }

    pub fn ddl(&self) -> &DdlCompiler {
        &self.ddl
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!(
            event = "perfwatch.migrate.warning",
            version = self.target,
            "{}",
            message
        );
        self.warnings.push(message);
    }

    /// Runs `f` in an immediate transaction and commits it.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit().context("commit migration transaction")?;
        Ok(out)
    }

    pub fn execute_ddl(&self, sql: &str) -> anyhow::Result<()> {
        tracing::debug!(event = "perfwatch.migrate.ddl", sql = %sql);
        self.conn
            .execute_batch(sql)
            .with_context(|| format!("DDL failed: {}", sql))
    }

    pub fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        table_exists(&*self.conn, table)
    }

    /// Creates every table of `snap` that is not there yet, plus declared indexes.
    pub fn create_all(&self, snap: &SchemaSnapshot) -> anyhow::Result<()> {
        for table in &snap.tables {
            for sql in self.ddl.create_table_with_indexes(table) {
                self.execute_ddl(&sql)?;
            }
        }
        Ok(())
    }

    pub fn add_column(&self, table: &str, column: &ColumnDef) -> anyhow::Result<()> {
        self.execute_ddl(&self.ddl.add_column(table, column))
    }

    /// Returns whether the column had to be added.
    pub fn add_column_if_missing(&self, table: &str, column: &ColumnDef) -> anyhow::Result<bool> {
        if get_columns(&*self.conn, table)?.contains(&column.name) {
            tracing::info!(
                event = "perfwatch.migrate.column_exists",
                table = %table,
                column = %column.name
            );
            return Ok(false);
        }
        self.add_column(table, column)?;
        Ok(true)
    }

    /// Renames through `{to}_x` so case-only renames work on case-insensitive backends.
    pub fn rename_table(&self, from: &str, to: &str) -> anyhow::Result<()> {
        let intermediate = format!("{}_x", to);
        self.execute_ddl(&self.ddl.rename_table(from, &intermediate))?;
        self.execute_ddl(&self.ddl.rename_table(&intermediate, to))
    }

    pub fn drop_table(&self, table: &str) -> anyhow::Result<()> {
        self.execute_ddl(&self.ddl.drop_table(table))
    }

    /// Creates an index; failure is recorded as a warning.
    pub fn create_index_best_effort(&mut self, index: &IndexDef) {
        let sql = self.ddl.create_index(index, false);
        if let Err(e) = self.execute_ddl(&sql) {
            self.warn(format!(
                "Skipping index creation on {}, because of {:#}",
                index.table, e
            ));
        }
    }

    pub fn suites(&self) -> anyhow::Result<Vec<SuiteRef>> {
        metadata::registered_suites(&*self.conn)
    }

    /// Loads a built-in suite a step depends on; absence is fatal.
    pub fn require_suite(&self, name: &str) -> anyhow::Result<Suite> {
        metadata::load_suite(&*self.conn, name)?.ok_or_else(|| {
            MigrationError::MissingSuite {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn load_suite(&self, suite: &SuiteRef) -> anyhow::Result<Suite> {
        metadata::load_suite(&*self.conn, &suite.name)?
            .with_context(|| format!("suite {} vanished during migration", suite.name))
    }

    /// Snapshot of `suite` at the version being migrated to.
    pub fn snapshot(&self, suite: &Suite) -> SchemaSnapshot {
        schema::snapshot(self.target, suite)
    }

    /// Registers a new sample field on a built-in suite and adds its column.
    ///
    /// A field that is already registered is left alone; the column is still
    /// added if it is missing.
    pub fn append_sample_field(&mut self, suite_name: &str, field: SampleField) -> anyhow::Result<()> {
        let suite = self.require_suite(suite_name)?;
        let suite_id = suite
            .id
            .with_context(|| format!("suite {} has no id", suite_name))?;
        let sample_table = suite.table("Sample");
        let column = schema::suite::sample_column(&field.name, field.sample_type);
        let ddl = self.ddl;
        let registered = suite.sample_field(&field.name).is_some();

        self.transaction(|tx| {
            if registered {
                tracing::info!(
                    event = "perfwatch.migrate.field_exists",
                    suite = %suite_name,
                    field = %field.name
                );
            } else {
                metadata::insert_sample_field(tx, suite_id, &field)?;
            }
            if !get_columns(tx, &sample_table)?.contains(&field.name) {
                tx.execute_batch(&ddl.add_column(&sample_table, &column))
                    .with_context(|| format!("add column {}.{}", sample_table, field.name))?;
            }
            Ok(())
        })
    }
}
