//! Dialect-aware rendering of the raw DDL that migrations issue.

use crate::schema::{ColumnDef, ColumnType, IndexDef, TableDef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DdlCompiler {
    pub dialect: Dialect,
}

impl DdlCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn quote(&self, ident: &str) -> String {
        match self.dialect {
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn type_name(&self, ty: ColumnType) -> String {
        match (ty, self.dialect) {
            (ColumnType::Integer, _) => "INTEGER".into(),
            (ColumnType::Float, Dialect::Sqlite) => "FLOAT".into(),
            (ColumnType::Float, Dialect::Postgres) => "DOUBLE PRECISION".into(),
            (ColumnType::Float, Dialect::Mysql) => "DOUBLE".into(),
            (ColumnType::String(n), _) => format!("VARCHAR({})", n),
            (ColumnType::Binary, Dialect::Postgres) => "BYTEA".into(),
            (ColumnType::Binary, _) => "BLOB".into(),
            (ColumnType::DateTime, Dialect::Postgres) => "TIMESTAMP".into(),
            (ColumnType::DateTime, _) => "DATETIME".into(),
        }
    }

    fn column_sql(&self, col: &ColumnDef, inline_fk: bool) -> String {
        if col.primary_key && col.autoincrement {
            return match self.dialect {
                Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote(&col.name)),
                Dialect::Postgres => format!("{} SERIAL PRIMARY KEY", self.quote(&col.name)),
                Dialect::Mysql => format!(
                    "{} INTEGER NOT NULL AUTO_INCREMENT PRIMARY KEY",
                    self.quote(&col.name)
                ),
            };
        }
        let mut sql = format!("{} {}", self.quote(&col.name), self.type_name(col.ty));
        if col.primary_key {
            sql.push_str(" NOT NULL PRIMARY KEY");
        }
        if col.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &col.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if inline_fk {
            if let Some(fk) = &col.references {
                sql.push_str(&format!(
                    " REFERENCES {}({})",
                    self.quote(&fk.table),
                    self.quote(&fk.column)
                ));
            }
        }
        sql
    }

    /// `CREATE TABLE IF NOT EXISTS` with table-level foreign keys.
    pub fn create_table(&self, table: &TableDef) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_sql(c, false))
            .collect();
        for col in &table.columns {
            if let Some(fk) = &col.references {
                parts.push(format!(
                    "FOREIGN KEY({}) REFERENCES {}({})",
                    self.quote(&col.name),
                    self.quote(&fk.table),
                    self.quote(&fk.column)
                ));
            }
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote(&table.name),
            parts.join(",\n    ")
        )
    }

    /// MySQL ignores inline references on ADD COLUMN, so the FK is only rendered elsewhere.
    pub fn add_column(&self, table: &str, col: &ColumnDef) -> String {
        let inline_fk = self.dialect != Dialect::Mysql;
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_sql(col, inline_fk)
        )
    }

    pub fn rename_table(&self, from: &str, to: &str) -> String {
        match self.dialect {
            Dialect::Mysql => format!("RENAME TABLE {} TO {}", self.quote(from), self.quote(to)),
            _ => format!("ALTER TABLE {} RENAME TO {}", self.quote(from), self.quote(to)),
        }
    }

    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote(table))
    }

    /// `if_not_exists` is dropped for MySQL, which has no such clause for indexes.
    pub fn create_index(&self, index: &IndexDef, if_not_exists: bool) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let guard = if if_not_exists && self.dialect != Dialect::Mysql {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let cols: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            guard,
            self.quote(&index.name),
            self.quote(&index.table),
            cols.join(", ")
        )
    }

    /// Statements that bring a table into existence along with its indexes.
    pub fn create_table_with_indexes(&self, table: &TableDef) -> Vec<String> {
        let mut out = vec![self.create_table(table)];
        out.extend(table.indexes.iter().map(|i| self.create_index(i, true)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, IndexDef, TableDef};

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(DdlCompiler::new(Dialect::Sqlite).quote("NT_Order"), "\"NT_Order\"");
        assert_eq!(DdlCompiler::new(Dialect::Postgres).quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(DdlCompiler::new(Dialect::Mysql).quote("NT_Order"), "`NT_Order`");
    }

    #[test]
    fn rename_forms() {
        assert_eq!(
            DdlCompiler::new(Dialect::Sqlite).rename_table("Compile_Run", "compile_Run_x"),
            "ALTER TABLE \"Compile_Run\" RENAME TO \"compile_Run_x\""
        );
        assert_eq!(
            DdlCompiler::new(Dialect::Mysql).rename_table("Compile_Run", "compile_Run_x"),
            "RENAME TABLE `Compile_Run` TO `compile_Run_x`"
        );
    }

    #[test]
    fn add_column_with_default() {
        let col = ColumnDef::new("bigger_is_better", ColumnType::Integer).default_value("0");
        assert_eq!(
            DdlCompiler::new(Dialect::Postgres).add_column("TestSuiteSampleFields", &col),
            "ALTER TABLE \"TestSuiteSampleFields\" ADD COLUMN \"bigger_is_better\" INTEGER DEFAULT 0"
        );
        let hash = ColumnDef::new("hash", ColumnType::String(32));
        assert_eq!(
            DdlCompiler::new(Dialect::Mysql).add_column("NT_Sample", &hash),
            "ALTER TABLE `NT_Sample` ADD COLUMN `hash` VARCHAR(32)"
        );
    }

    #[test]
    fn status_columns_keep_reference_except_on_mysql() {
        let col = ColumnDef::new("hash_status", ColumnType::Integer).references("StatusKind", "ID");
        assert!(DdlCompiler::new(Dialect::Sqlite)
            .add_column("NT_Sample", &col)
            .ends_with("REFERENCES \"StatusKind\"(\"ID\")"));
        assert!(!DdlCompiler::new(Dialect::Mysql)
            .add_column("NT_Sample", &col)
            .contains("REFERENCES"));
    }

    #[test]
    fn create_index_guard() {
        let idx = IndexDef::new("NT_idx_fast_ri_lookup", "NT_RegressionIndicator", &["RegressionID"]);
        assert_eq!(
            DdlCompiler::new(Dialect::Sqlite).create_index(&idx, false),
            "CREATE INDEX \"NT_idx_fast_ri_lookup\" ON \"NT_RegressionIndicator\" (\"RegressionID\")"
        );
        assert!(DdlCompiler::new(Dialect::Postgres)
            .create_index(&idx.clone().unique(), true)
            .starts_with("CREATE UNIQUE INDEX IF NOT EXISTS"));
        assert!(!DdlCompiler::new(Dialect::Mysql)
            .create_index(&idx, true)
            .contains("IF NOT EXISTS"));
    }

    #[test]
    fn create_table_primary_keys() {
        let t = TableDef::new("StatusKind")
            .column(ColumnDef::id().no_autoincrement())
            .column(ColumnDef::new("Name", ColumnType::String(256)).unique());
        let sql = DdlCompiler::new(Dialect::Sqlite).create_table(&t);
        assert!(sql.contains("\"ID\" INTEGER NOT NULL PRIMARY KEY"));
        assert!(sql.contains("\"Name\" VARCHAR(256) UNIQUE"));

        let t = TableDef::new("NT_Test").column(ColumnDef::id());
        assert!(DdlCompiler::new(Dialect::Postgres)
            .create_table(&t)
            .contains("\"ID\" SERIAL PRIMARY KEY"));
    }
}
