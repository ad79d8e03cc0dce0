//! Per-suite table family, as a version-indexed registry of snapshot builders.
//!
//! The builder registered for version `k` receives the snapshot composed by
//! every earlier builder and extends (or prunes) it in place.

use super::{ColumnDef, ColumnType, IndexDef, SchemaSnapshot, TableDef};
use crate::model::{SampleType, Suite};

pub type SnapshotBuilder = fn(&mut SchemaSnapshot, &Suite);

pub const BUILDERS: &[(u32, SnapshotBuilder)] = &[
    (1, base_tables),
    (3, legacy_field_change),
    (8, regression_tracking),
    (9, profiles),
    (11, baselines),
    (16, field_change_start_order_index),
    (17, regression_indicator_index),
    (19, field_change_identity_index),
];

/// Tables of `suite` at schema `version`.
pub fn snapshot(version: u32, suite: &Suite) -> SchemaSnapshot {
    let mut snap = SchemaSnapshot {
        version,
        tables: Vec::new(),
    };
    for (since, build) in BUILDERS {
        if *since <= version {
            build(&mut snap, suite);
        }
    }
    snap
}

pub fn sample_column(field_name: &str, ty: SampleType) -> ColumnDef {
    match ty {
        SampleType::Real => ColumnDef::new(field_name, ColumnType::Float),
        SampleType::Status => {
            ColumnDef::new(field_name, ColumnType::Integer).references("StatusKind", "ID")
        }
        SampleType::Hash => ColumnDef::new(field_name, ColumnType::String(32)),
    }
}

fn base_tables(snap: &mut SchemaSnapshot, suite: &Suite) {
    let machine_t = suite.table("Machine");
    let order_t = suite.table("Order");
    let run_t = suite.table("Run");
    let test_t = suite.table("Test");
    let sample_t = suite.table("Sample");

    let mut machine = TableDef::new(&machine_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("Name", ColumnType::String(256)))
        .column(ColumnDef::new("Parameters", ColumnType::Binary))
        .indexed(&["Name"]);
    for f in &suite.machine_fields {
        machine
            .columns
            .push(ColumnDef::new(&f.name, ColumnType::String(256)));
    }

    let mut order = TableDef::new(&order_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("NextOrder", ColumnType::Integer).references(&order_t, "ID"))
        .column(ColumnDef::new("PreviousOrder", ColumnType::Integer).references(&order_t, "ID"));
    for f in suite.ordered_order_fields() {
        order
            .columns
            .push(ColumnDef::new(&f.name, ColumnType::String(256)));
    }

    let mut run = TableDef::new(&run_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("MachineID", ColumnType::Integer).references(&machine_t, "ID"))
        .column(ColumnDef::new("OrderID", ColumnType::Integer).references(&order_t, "ID"))
        .column(ColumnDef::new("ImportedFrom", ColumnType::String(512)))
        .column(ColumnDef::new("StartTime", ColumnType::DateTime))
        .column(ColumnDef::new("EndTime", ColumnType::DateTime))
        .column(ColumnDef::new("SimpleRunID", ColumnType::Integer))
        .column(ColumnDef::new("Parameters", ColumnType::Binary))
        .indexed(&["MachineID"])
        .indexed(&["OrderID"]);
    for f in &suite.run_fields {
        run.columns
            .push(ColumnDef::new(&f.name, ColumnType::String(256)));
    }

    let test = TableDef::new(&test_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("Name", ColumnType::String(256)).unique());

    let mut sample = TableDef::new(&sample_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("RunID", ColumnType::Integer).references(&run_t, "ID"))
        .column(ColumnDef::new("TestID", ColumnType::Integer).references(&test_t, "ID"))
        .indexed(&["RunID", "TestID"]);
    for f in &suite.sample_fields {
        sample.columns.push(sample_column(&f.name, f.sample_type));
    }

    snap.push(machine);
    snap.push(order);
    snap.push(run);
    snap.push(test);
    snap.push(sample);
}

fn change_columns(table: TableDef, suite: &Suite) -> TableDef {
    let order_t = suite.table("Order");
    table
        .column(ColumnDef::new("StartOrderID", ColumnType::Integer).references(&order_t, "ID"))
        .column(ColumnDef::new("EndOrderID", ColumnType::Integer).references(&order_t, "ID"))
        .column(
            ColumnDef::new("TestID", ColumnType::Integer).references(&suite.table("Test"), "ID"),
        )
        .column(
            ColumnDef::new("MachineID", ColumnType::Integer)
                .references(&suite.table("Machine"), "ID"),
        )
        .column(
            ColumnDef::new("FieldID", ColumnType::Integer)
                .references("TestSuiteSampleFields", "ID"),
        )
}

fn legacy_field_change(snap: &mut SchemaSnapshot, suite: &Suite) {
    let fc = TableDef::new(&suite.table("FieldChange")).column(ColumnDef::id());
    snap.push(change_columns(fc, suite));
}

/// Replaces the unreliable first-generation FieldChange table.
fn regression_tracking(snap: &mut SchemaSnapshot, suite: &Suite) {
    snap.remove(&suite.table("FieldChange"));

    let fc_t = suite.table("FieldChangeV2");
    let regression_t = suite.table("Regression");

    let fc = TableDef::new(&fc_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("OldValue", ColumnType::Float))
        .column(ColumnDef::new("NewValue", ColumnType::Float));
    let fc = change_columns(fc, suite).column(
        ColumnDef::new("RunID", ColumnType::Integer).references(&suite.table("Run"), "ID"),
    );

    let regression = TableDef::new(&regression_t)
        .column(ColumnDef::id())
        .column(ColumnDef::new("Title", ColumnType::String(256)))
        .column(ColumnDef::new("BugLink", ColumnType::String(256)))
        .column(ColumnDef::new("State", ColumnType::Integer));

    let indicator = TableDef::new(&suite.table("RegressionIndicator"))
        .column(ColumnDef::id())
        .column(ColumnDef::new("RegressionID", ColumnType::Integer).references(&regression_t, "ID"))
        .column(ColumnDef::new("FieldChangeID", ColumnType::Integer).references(&fc_t, "ID"));

    let ignore = TableDef::new(&suite.table("ChangeIgnore"))
        .column(ColumnDef::id())
        .column(ColumnDef::new("ChangeIgnoreID", ColumnType::Integer).references(&fc_t, "ID"));

    snap.push(fc);
    snap.push(regression);
    snap.push(indicator);
    snap.push(ignore);
}

pub fn profile_id_column(suite: &Suite) -> ColumnDef {
    ColumnDef::new("ProfileID", ColumnType::Integer).references(&suite.table("Profile"), "ID")
}

fn profiles(snap: &mut SchemaSnapshot, suite: &Suite) {
    let profile = TableDef::new(&suite.table("Profile"))
        .column(ColumnDef::id())
        .column(ColumnDef::new("CreatedTime", ColumnType::DateTime))
        .column(ColumnDef::new("AccessedTime", ColumnType::DateTime))
        .column(ColumnDef::new("Filename", ColumnType::String(256)))
        .column(ColumnDef::new("Counters", ColumnType::String(512)));
    let sample_t = suite.table("Sample");
    snap.insert_before(&sample_t, profile);
    if let Some(sample) = snap.table_mut(&sample_t) {
        sample.columns.push(profile_id_column(suite));
    }
}

fn baselines(snap: &mut SchemaSnapshot, suite: &Suite) {
    let baseline = TableDef::new(&suite.table("Baseline"))
        .column(ColumnDef::id())
        .column(ColumnDef::new("Name", ColumnType::String(32)).unique())
        .column(ColumnDef::new("Comment", ColumnType::String(256)))
        .column(
            ColumnDef::new("OrderID", ColumnType::Integer).references(&suite.table("Order"), "ID"),
        )
        .indexed(&["OrderID"]);
    snap.push(baseline);
}

pub fn start_order_index(suite: &Suite) -> IndexDef {
    let table = suite.table("FieldChangeV2");
    IndexDef::new(
        &format!("ix_{}_StartOrderID", table),
        &table,
        &["StartOrderID"],
    )
}

pub fn regression_lookup_index(suite: &Suite) -> IndexDef {
    IndexDef::new(
        &format!("{}_idx_fast_ri_lookup", suite.db_key_name),
        &suite.table("RegressionIndicator"),
        &["RegressionID"],
    )
}

/// One change per (test, field, machine, start order).
pub fn change_identity_index(suite: &Suite) -> IndexDef {
    let table = suite.table("FieldChangeV2");
    IndexDef::new(
        &format!("ux_{}_identity", table),
        &table,
        &["TestID", "FieldID", "MachineID", "StartOrderID"],
    )
    .unique()
}

fn push_index(snap: &mut SchemaSnapshot, index: IndexDef) {
    if let Some(t) = snap.table_mut(&index.table) {
        t.indexes.push(index);
    }
}

fn field_change_start_order_index(snap: &mut SchemaSnapshot, suite: &Suite) {
    push_index(snap, start_order_index(suite));
}

fn regression_indicator_index(snap: &mut SchemaSnapshot, suite: &Suite) {
    push_index(snap, regression_lookup_index(suite));
}

fn field_change_identity_index(snap: &mut SchemaSnapshot, suite: &Suite) {
    push_index(snap, change_identity_index(suite));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleField;

    fn suite() -> Suite {
        let mut s = Suite::new("size", "size", "2");
        s.sample_fields.push(SampleField::real("text", ".text"));
        s.sample_fields.push(SampleField::new("h", ".h", SampleType::Hash));
        s
    }

    #[test]
    fn v8_replaces_legacy_field_change() {
        let s = suite();
        assert!(snapshot(7, &s).table("size_FieldChange").is_some());
        let v8 = snapshot(8, &s);
        assert!(v8.table("size_FieldChange").is_none());
        assert!(v8.table("size_FieldChangeV2").is_some());
        assert!(v8.table("size_RegressionIndicator").is_some());
    }

    #[test]
    fn profile_is_created_before_sample() {
        let v9 = snapshot(9, &suite());
        let names = v9.table_names();
        let profile = names.iter().position(|n| *n == "size_Profile").unwrap();
        let sample = names.iter().position(|n| *n == "size_Sample").unwrap();
        assert!(profile < sample);
        let cols = v9.table("size_Sample").unwrap().column_names();
        assert_eq!(cols, vec!["ID", "RunID", "TestID", "text", "h", "ProfileID"]);
    }

    #[test]
    fn hash_fields_are_fixed_width_strings() {
        let v1 = snapshot(1, &suite());
        let h = v1
            .table("size_Sample")
            .unwrap()
            .columns
            .iter()
            .find(|c| c.name == "h")
            .unwrap();
        assert_eq!(h.ty, ColumnType::String(32));
    }

    #[test]
    fn current_snapshot_has_every_entity() {
        let snap = snapshot(19, &suite());
        for entity in [
            "Machine",
            "Order",
            "Run",
            "Test",
            "Profile",
            "Sample",
            "FieldChangeV2",
            "Regression",
            "RegressionIndicator",
            "ChangeIgnore",
            "Baseline",
        ] {
            assert!(snap.table(&format!("size_{entity}")).is_some(), "{entity}");
        }
        let fc = snap.table("size_FieldChangeV2").unwrap();
        assert!(fc.indexes.iter().any(|i| i.unique));
    }
}
