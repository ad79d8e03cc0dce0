use perfwatch_core::errors::SchemaError;
use perfwatch_core::migrate::Migrator;
use perfwatch_core::model::{SampleField, SampleType};
use perfwatch_core::provision::{add_sample_field, create_suite_from_definition, stored_definition, sync_suite};
use perfwatch_core::schema::definition::SuiteDefinition;
use perfwatch_core::storage::metadata;
use perfwatch_core::storage::store::{column_list, index_names, table_exists};
use perfwatch_core::storage::Store;

const SIZE: &str = r#"
format_version: "2"
name: size
machine_fields:
  - name: hardware
run_fields:
  - name: llvm_project_revision
    order: true
metrics:
  - name: text_size
  - name: score
    bigger_is_better: true
"#;

fn migrated() -> anyhow::Result<(tempfile::TempDir, Store)> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(&dir.path().join("perf.db"))?;
    Migrator::new(&store).apply_all()?;
    Ok((dir, store))
}

#[test]
fn creates_suite_tables_at_current_version() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    let def = SuiteDefinition::from_yaml(SIZE)?;
    let suite = create_suite_from_definition(&store, &def)?;
    assert!(suite.id.is_some());

    let conn = store.lock()?;
    for entity in ["Machine", "Order", "Run", "Test", "Sample", "FieldChangeV2", "Baseline"] {
        assert!(table_exists(&conn, &format!("size_{entity}"))?);
    }
    let cols = column_list(&conn, "size_Sample")?;
    assert!(cols.iter().any(|c| c == "text_size"));
    assert!(cols.iter().any(|c| c == "ProfileID"));
    assert!(index_names(&conn)?.iter().any(|i| i == "ux_size_FieldChangeV2_identity"));

    let loaded = metadata::load_suite(&conn, "size")?.unwrap();
    assert!(loaded.sample_field("score").unwrap().bigger_is_better);
    Ok(())
}

#[test]
fn duplicate_suite_is_rejected() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    let def = SuiteDefinition::from_yaml(SIZE)?;
    create_suite_from_definition(&store, &def)?;
    let err = create_suite_from_definition(&store, &def).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchemaError>(),
        Some(SchemaError::Duplicate { .. })
    ));
    Ok(())
}

#[test]
fn provisioning_requires_a_migrated_database() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(&dir.path().join("perf.db"))?;
    Migrator::new(&store).apply_to(10)?;
    let err = create_suite_from_definition(&store, &SuiteDefinition::from_yaml(SIZE)?).unwrap_err();
    assert!(err.to_string().contains("perfwatch migrate"));
    Ok(())
}

#[test]
fn definition_is_stored_and_reloaded() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    let def = SuiteDefinition::from_yaml(SIZE)?;
    create_suite_from_definition(&store, &def)?;
    assert_eq!(stored_definition(&store, "size")?, Some(def));
    assert_eq!(stored_definition(&store, "nts")?, None);
    Ok(())
}

#[test]
fn sync_applies_additive_changes() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    let report = sync_suite(&store, &SuiteDefinition::from_yaml(SIZE)?, false)?;
    assert!(report.created);

    let grown = SIZE.replace(
        "  - name: score\n    bigger_is_better: true\n",
        "  - name: score\n    bigger_is_better: false\n  - name: data_size\n",
    ) + "  - name: link_hash\n    type: Hash\n";
    let grown_def = SuiteDefinition::from_yaml(&grown)?;

    let preview = sync_suite(&store, &grown_def, true)?;
    assert!(preview.dry_run);
    assert_eq!(preview.changes.sample_fields.len(), 2);
    assert!(!column_list(&*store.lock()?, "size_Sample")?.iter().any(|c| c == "data_size"));

    let report = sync_suite(&store, &grown_def, false)?;
    assert!(!report.created);
    assert_eq!(report.changes.bigger_is_better, vec![("score".to_string(), false)]);

    let conn = store.lock()?;
    let cols = column_list(&conn, "size_Sample")?;
    assert!(cols.iter().any(|c| c == "data_size"));
    assert!(cols.iter().any(|c| c == "link_hash"));
    let loaded = metadata::load_suite(&conn, "size")?.unwrap();
    assert!(!loaded.sample_field("score").unwrap().bigger_is_better);
    assert_eq!(loaded.sample_field("link_hash").unwrap().sample_type, SampleType::Hash);
    Ok(())
}

#[test]
fn sync_rejects_removed_metric_without_writing() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    sync_suite(&store, &SuiteDefinition::from_yaml(SIZE)?, false)?;

    let shrunk = SIZE.replace("  - name: text_size\n", "  - name: other_size\n");
    let err = sync_suite(&store, &SuiteDefinition::from_yaml(&shrunk)?, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchemaError>(),
        Some(SchemaError::UnsupportedChange { .. })
    ));
    let cols = column_list(&*store.lock()?, "size_Sample")?;
    assert!(!cols.iter().any(|c| c == "other_size"));
    Ok(())
}

#[test]
fn add_sample_field_validates_status_reference() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    add_sample_field(&store, "nts", SampleField::status("link_status", ".link.status"))?;
    add_sample_field(
        &store,
        "nts",
        SampleField::real("link_time", ".link").gated_by("link_status"),
    )?;

    let bad = add_sample_field(
        &store,
        "nts",
        SampleField::real("load_time", ".load").gated_by("execution_time"),
    )
    .unwrap_err();
    assert!(matches!(
        bad.downcast_ref::<SchemaError>(),
        Some(SchemaError::InvalidStatusField { .. })
    ));

    let dup = add_sample_field(&store, "nts", SampleField::real("link_time", ".link")).unwrap_err();
    assert!(matches!(
        dup.downcast_ref::<SchemaError>(),
        Some(SchemaError::Duplicate { .. })
    ));

    let conn = store.lock()?;
    let cols = column_list(&conn, "NT_Sample")?;
    assert!(cols.iter().any(|c| c == "link_time"));
    assert!(!cols.iter().any(|c| c == "load_time"));
    let nts = metadata::load_suite(&conn, "nts")?.unwrap();
    assert_eq!(
        nts.sample_field("link_time").unwrap().status_field.as_deref(),
        Some("link_status")
    );
    Ok(())
}

#[test]
fn metadata_rejects_gating_by_non_status_field() -> anyhow::Result<()> {
    let (_dir, store) = migrated()?;
    let conn = store.lock()?;
    let nts = metadata::find_suite(&conn, "nts")?.unwrap();

    let err = metadata::insert_sample_field(
        &conn,
        nts.id,
        &SampleField::real("load_time", ".load").gated_by("compile_time"),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchemaError>(),
        Some(SchemaError::InvalidStatusField { suite, .. }) if suite == "nts"
    ));
    assert!(metadata::sample_field_id(&conn, nts.id, "load_time")?.is_none());

    metadata::insert_sample_field(
        &conn,
        nts.id,
        &SampleField::real("load_time", ".load").gated_by("compile_status"),
    )?;
    assert!(metadata::sample_field_id(&conn, nts.id, "load_time")?.is_some());
    Ok(())
}
