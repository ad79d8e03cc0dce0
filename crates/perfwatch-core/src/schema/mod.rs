//! Backend-neutral description of tables.
//!
//! Builders in [`core`] and [`suite`] return plain [`TableDef`] values; the
//! DDL compiler in `storage::ddl` renders them for a concrete dialect.

pub mod core;
pub mod definition;
pub mod suite;

pub use suite::{snapshot, BUILDERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    /// `VARCHAR(n)`
    String(u32),
    Binary,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    /// Auto-incrementing integer `ID` primary key.
    pub fn id() -> Self {
        Self {
            primary_key: true,
            autoincrement: true,
            ..Self::new("ID", ColumnType::Integer)
        }
    }

    pub fn no_autoincrement(mut self) -> Self {
        self.autoincrement = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a non-unique index named `ix_{table}_{columns}`.
    pub fn indexed(mut self, columns: &[&str]) -> Self {
        let name = format!("ix_{}_{}", self.name, columns.join("_"));
        self.indexes.push(IndexDef::new(&name, &self.name, columns));
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// The set of tables one suite (or the core metadata) has at a given schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub version: u32,
    pub tables: Vec<TableDef>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDef> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn push(&mut self, table: TableDef) {
        self.tables.push(table);
    }

    /// Inserts `table` ahead of `before` so creation order respects foreign keys.
    pub fn insert_before(&mut self, before: &str, table: TableDef) {
        match self.tables.iter().position(|t| t.name == before) {
            Some(idx) => self.tables.insert(idx, table),
            None => self.tables.push(table),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<TableDef> {
        let idx = self.tables.iter().position(|t| t.name == name)?;
        Some(self.tables.remove(idx))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}
