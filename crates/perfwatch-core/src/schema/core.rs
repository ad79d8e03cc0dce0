//! Suite-independent metadata tables.

use super::{ColumnDef, ColumnType, SchemaSnapshot, TableDef};

pub const SCHEMA_VERSION_TABLE: &str = "SchemaVersion";
pub const CORE_VERSION_KEY: &str = "__core__";

pub fn schema_version_table() -> TableDef {
    TableDef::new(SCHEMA_VERSION_TABLE)
        .column(ColumnDef::new("Name", ColumnType::String(256)).primary_key())
        .column(ColumnDef::new("Version", ColumnType::Integer))
}

fn field_table(name: &str) -> TableDef {
    TableDef::new(name)
        .column(ColumnDef::id())
        .column(ColumnDef::new("TestSuiteID", ColumnType::Integer).references("TestSuite", "ID"))
        .column(ColumnDef::new("Name", ColumnType::String(256)))
        .column(ColumnDef::new("InfoKey", ColumnType::String(256)))
        .indexed(&["TestSuiteID"])
}

/// Metadata tables as created by the bootstrap step.
fn bootstrap_tables() -> Vec<TableDef> {
    let sample_type = TableDef::new("SampleType")
        .column(ColumnDef::id())
        .column(ColumnDef::new("Name", ColumnType::String(256)).unique());

    let status_kind = TableDef::new("StatusKind")
        .column(ColumnDef::id().no_autoincrement())
        .column(ColumnDef::new("Name", ColumnType::String(256)).unique());

    let test_suite = TableDef::new("TestSuite")
        .column(ColumnDef::id())
        .column(ColumnDef::new("Name", ColumnType::String(256)).unique())
        .column(ColumnDef::new("DBKeyName", ColumnType::String(256)))
        .column(ColumnDef::new("Version", ColumnType::String(16)));

    let mut order_fields = field_table("TestSuiteOrderFields");
    order_fields
        .columns
        .push(ColumnDef::new("Ordinal", ColumnType::Integer));

    let sample_fields = field_table("TestSuiteSampleFields")
        .column(ColumnDef::new("Type", ColumnType::Integer).references("SampleType", "ID"))
        .column(
            ColumnDef::new("status_field", ColumnType::Integer)
                .references("TestSuiteSampleFields", "ID"),
        );

    vec![
        sample_type,
        status_kind,
        test_suite,
        field_table("TestSuiteMachineFields"),
        order_fields,
        field_table("TestSuiteRunFields"),
        sample_fields,
    ]
}

pub fn bigger_is_better_column() -> ColumnDef {
    ColumnDef::new("bigger_is_better", ColumnType::Integer).default_value("0")
}

pub fn ignore_same_hash_column() -> ColumnDef {
    ColumnDef::new("ignore_same_hash", ColumnType::Integer).default_value("0")
}

pub fn json_schemas_table() -> TableDef {
    TableDef::new("TestSuiteJSONSchemas")
        .column(ColumnDef::new("TestSuiteName", ColumnType::String(256)).primary_key())
        .column(ColumnDef::new("JSONSchema", ColumnType::Binary))
}

/// Metadata tables as they look at `version`.
pub fn core_snapshot(version: u32) -> SchemaSnapshot {
    let mut snap = SchemaSnapshot {
        version,
        tables: Vec::new(),
    };
    if version == 0 {
        return snap;
    }
    snap.tables = bootstrap_tables();
    if let Some(fields) = snap.table_mut("TestSuiteSampleFields") {
        if version >= 4 {
            fields.columns.push(bigger_is_better_column());
        }
        if version >= 18 {
            fields.columns.push(ignore_same_hash_column());
        }
    }
    if version >= 13 {
        snap.push(json_schemas_table());
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_fields_gain_flags_over_time() {
        let v1 = core_snapshot(1);
        let cols = v1.table("TestSuiteSampleFields").unwrap().column_names();
        assert!(!cols.contains(&"bigger_is_better"));

        let v18 = core_snapshot(18);
        let cols = v18.table("TestSuiteSampleFields").unwrap().column_names();
        assert!(cols.contains(&"bigger_is_better"));
        assert!(cols.contains(&"ignore_same_hash"));
        assert!(v18.table("TestSuiteJSONSchemas").is_some());
        assert!(v1.table("TestSuiteJSONSchemas").is_none());
    }
}
