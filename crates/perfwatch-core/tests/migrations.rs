use perfwatch_core::errors::MigrationError;
use perfwatch_core::migrate::{Migrator, CURRENT_VERSION};
use perfwatch_core::storage::metadata;
use perfwatch_core::storage::store::{
    column_list, index_names, parameters_to_json, table_exists, table_names,
};
use perfwatch_core::storage::Store;
use rusqlite::{params, Connection};

fn open_temp() -> anyhow::Result<(tempfile::TempDir, Store)> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(&dir.path().join("perf.db"))?;
    Ok((dir, store))
}

fn status_kinds(conn: &Connection) -> anyhow::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT ID, Name FROM StatusKind ORDER BY ID")?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Tables with their column lists, plus index names.
fn fingerprint(store: &Store) -> anyhow::Result<(Vec<(String, Vec<String>)>, Vec<String>)> {
    let conn = store.lock()?;
    let mut tables = Vec::new();
    for t in table_names(&conn)? {
        let cols = column_list(&conn, &t)?;
        tables.push((t, cols));
    }
    Ok((tables, index_names(&conn)?))
}

#[test]
fn full_chain_from_empty_database() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    let report = Migrator::new(&store).apply_all()?;
    assert_eq!(report.initial_version, 0);
    assert_eq!(report.final_version, CURRENT_VERSION);
    assert_eq!(report.applied.len(), CURRENT_VERSION as usize);
    assert!(!report.legacy);

    let conn = store.lock()?;
    for t in [
        "NT_Machine",
        "NT_Order",
        "NT_Run",
        "NT_Test",
        "NT_Sample",
        "NT_Profile",
        "NT_FieldChangeV2",
        "NT_Regression",
        "NT_RegressionIndicator",
        "NT_ChangeIgnore",
        "NT_Baseline",
        "TestSuiteJSONSchemas",
    ] {
        assert!(table_exists(&conn, t)?, "missing table {t}");
    }
    assert!(!table_exists(&conn, "NT_FieldChange")?);

    let sample_cols = column_list(&conn, "NT_Sample")?;
    for c in ["score", "mem_bytes", "hash", "hash_status", "code_size", "ProfileID"] {
        assert!(sample_cols.iter().any(|s| s == c), "missing NT_Sample.{c}");
    }

    let indexes = index_names(&conn)?;
    assert!(indexes.iter().any(|i| i == "NT_idx_fast_ri_lookup"));
    assert!(indexes.iter().any(|i| i == "ux_NT_FieldChangeV2_identity"));

    let flagged: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT Name FROM TestSuiteSampleFields WHERE ignore_same_hash = 1 ORDER BY Name",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };
    assert_eq!(flagged, vec!["execution_time".to_string(), "score".to_string()]);
    Ok(())
}

#[test]
fn rerunning_is_a_no_op() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_all()?;
    let before = fingerprint(&store)?;
    let report = Migrator::new(&store).apply_all()?;
    assert!(report.applied.is_empty());
    assert_eq!(fingerprint(&store)?, before);
    Ok(())
}

#[test]
fn split_chain_matches_single_run() -> anyhow::Result<()> {
    let (_a_dir, a) = open_temp()?;
    Migrator::new(&a).apply_all()?;

    let (_b_dir, b) = open_temp()?;
    let first = Migrator::new(&b).apply_to(7)?;
    assert_eq!(first.final_version, 7);
    let second = Migrator::new(&b).apply_all()?;
    assert_eq!(second.initial_version, 7);
    assert_eq!(second.applied.first().map(|s| s.from), Some(7));

    assert_eq!(fingerprint(&a)?, fingerprint(&b)?);
    Ok(())
}

#[test]
fn status_kinds_survive_every_step() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    let expected = vec![
        (0, "PASS".to_string()),
        (1, "FAIL".to_string()),
        (2, "XFAIL".to_string()),
    ];
    for target in 1..=CURRENT_VERSION {
        Migrator::new(&store).apply_to(target)?;
        let conn = store.lock()?;
        assert_eq!(status_kinds(&conn)?, expected, "after step to {target}");
    }
    Ok(())
}

#[test]
fn status_reports_pending_steps() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    let migrator = Migrator::new(&store);
    let status = migrator.status()?;
    assert!(!status.versioned);
    assert_eq!(status.pending.len(), CURRENT_VERSION as usize);

    migrator.apply_to(10)?;
    let status = migrator.status()?;
    assert!(status.versioned);
    assert_eq!(status.current, 10);
    assert_eq!(status.pending.len(), (CURRENT_VERSION - 10) as usize);
    Ok(())
}

#[test]
fn unversioned_database_is_treated_as_legacy() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(1)?;
    store.lock()?.execute_batch("DROP TABLE SchemaVersion")?;

    let report = Migrator::new(&store).apply_all()?;
    assert!(report.legacy);
    assert_eq!(report.initial_version, 0);
    assert_eq!(report.final_version, CURRENT_VERSION);

    let conn = store.lock()?;
    let nts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM TestSuite WHERE Name = 'nts'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(nts, 1);
    Ok(())
}

#[test]
fn compile_tables_with_data_are_renamed() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(13)?;
    {
        let conn = store.lock()?;
        for (id, name) in [(1, "builder-1"), (2, "builder-2")] {
            conn.execute(
                "INSERT INTO Compile_Machine (ID, Name, hardware) VALUES (?1, ?2, 'x86_64')",
                params![id, name],
            )?;
        }
        conn.execute_batch(
            "INSERT INTO Compile_Order (ID, llvm_project_revision) VALUES (1, '100');
             INSERT INTO Compile_Run (ID, MachineID, OrderID) VALUES (1, 2, 1);",
        )?;
    }

    let report = Migrator::new(&store).apply_all()?;
    let fold = report.applied.iter().find(|s| s.from == 13).unwrap();
    assert!(fold.warnings.is_empty(), "{:?}", fold.warnings);

    let conn = store.lock()?;
    assert!(table_exists(&conn, "compile_Machine")?);
    assert!(!table_exists(&conn, "Compile_Machine")?);
    assert!(!table_exists(&conn, "compile_Machine_x")?);
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM compile_Machine", [], |r| r.get(0))?;
    assert_eq!(rows, 2);
    let machines: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare("SELECT ID, Name, hardware FROM compile_Machine ORDER BY ID")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        rows.collect::<Result<_, _>>()?
    };
    assert_eq!(
        machines,
        vec![
            (1, "builder-1".to_string(), "x86_64".to_string()),
            (2, "builder-2".to_string(), "x86_64".to_string()),
        ]
    );
    let (machine, revision): (String, String) = conn.query_row(
        "SELECT m.Name, o.llvm_project_revision FROM compile_Run r
         JOIN compile_Machine m ON m.ID = r.MachineID
         JOIN compile_Order o ON o.ID = r.OrderID
         WHERE r.ID = 1",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!((machine.as_str(), revision.as_str()), ("builder-2", "100"));
    let key: String = conn.query_row(
        "SELECT DBKeyName FROM TestSuite WHERE Name = 'compile'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(key, "compile");
    assert!(table_exists(&conn, "compile_FieldChangeV2")?);
    assert!(index_names(&conn)?
        .iter()
        .any(|i| i == "compile_idx_fast_ri_lookup"));
    Ok(())
}

fn params_of(pairs: &[(&str, &str)]) -> anyhow::Result<String> {
    parameters_to_json(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn run_revision(conn: &Connection, run_id: i64) -> anyhow::Result<String> {
    Ok(conn.query_row(
        "SELECT o.llvm_project_revision FROM NT_Run r
         JOIN NT_Order o ON o.ID = r.OrderID WHERE r.ID = ?1",
        params![run_id],
        |r| r.get(0),
    )?)
}

#[test]
fn run_orders_are_recomputed_and_relinked() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(1)?;
    {
        let conn = store.lock()?;
        conn.execute_batch(
            "INSERT INTO NT_Machine (ID, Name) VALUES (1, 'm');
             INSERT INTO NT_Order (ID, llvm_project_revision)
                 VALUES (1, '10 '), (2, '9'), (3, '10.1'), (4, '7'), (5, '211');",
        )?;
        let clang = params_of(&[
            ("cc_name", "apple_clang"),
            ("cc_build", "PROD"),
            ("cc_src_tag", "211"),
            (
                "cc_version",
                "Target: x86_64\nApple clang version 2.0 (tags/Apple/clang-211.10.1) (based on LLVM)",
            ),
        ])?;
        let runs: [(i64, i64, Option<String>); 5] = [
            (1, 1, None),
            (2, 2, Some(params_of(&[("inferred_run_order", "9")])?)),
            (3, 3, Some(params_of(&[("__report_version__", "1")])?)),
            (4, 5, Some(clang)),
            (5, 2, Some(params_of(&[("inferred_run_order", "8")])?)),
        ];
        for (id, order, parameters) in runs {
            conn.execute(
                "INSERT INTO NT_Run (ID, MachineID, OrderID, Parameters) VALUES (?1, 1, ?2, ?3)",
                params![id, order, parameters],
            )?;
        }
    }

    Migrator::new(&store).apply_to(2)?;

    let conn = store.lock()?;
    assert_eq!(run_revision(&conn, 1)?, "10");
    assert_eq!(run_revision(&conn, 2)?, "9");
    assert_eq!(run_revision(&conn, 3)?, "10.1");
    assert_eq!(run_revision(&conn, 4)?, "211.10.1");
    assert_eq!(run_revision(&conn, 5)?, "9");

    let stamped: String = conn.query_row("SELECT Parameters FROM NT_Run WHERE ID = 2", [], |r| r.get(0))?;
    assert_eq!(stamped, r#"[["__report_version__","1"],["inferred_run_order","9"]]"#);
    let skipped: String = conn.query_row("SELECT Parameters FROM NT_Run WHERE ID = 5", [], |r| r.get(0))?;
    assert_eq!(skipped, r#"[["inferred_run_order","8"]]"#);

    let remaining: Vec<String> = {
        let mut stmt = conn.prepare("SELECT llvm_project_revision FROM NT_Order ORDER BY ID")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };
    assert_eq!(remaining.len(), 4, "{remaining:?}");
    for orphan in ["10 ", "7", "211"] {
        assert!(!remaining.iter().any(|r| r == orphan), "{orphan} survived");
    }

    let mut chain = Vec::new();
    let mut cursor: Option<i64> = Some(conn.query_row(
        "SELECT ID FROM NT_Order WHERE PreviousOrder IS NULL",
        [],
        |r| r.get(0),
    )?);
    while let Some(id) = cursor {
        let (rev, next): (String, Option<i64>) = conn.query_row(
            "SELECT llvm_project_revision, NextOrder FROM NT_Order WHERE ID = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        chain.push(rev);
        cursor = next;
    }
    assert_eq!(chain, vec!["9", "10", "10.1", "211.10.1"]);
    Ok(())
}

#[test]
fn empty_compile_suite_is_dropped() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_all()?;

    let conn = store.lock()?;
    assert!(metadata::find_suite(&conn, "compile")?.is_none());
    let leftovers: Vec<String> = table_names(&conn)?
        .into_iter()
        .filter(|t| t.to_ascii_lowercase().starts_with("compile_"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    let fields: i64 = conn.query_row(
        "SELECT COUNT(*) FROM TestSuiteSampleFields f
         LEFT JOIN TestSuite s ON s.ID = f.TestSuiteID WHERE s.ID IS NULL",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(fields, 0);
    Ok(())
}

#[test]
fn machine_name_parameter_becomes_hostname() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(11)?;
    store.lock()?.execute(
        "INSERT INTO NT_Machine (Name, Parameters) VALUES ('m', ?1)",
        params![r#"[["name", "box-1"], ["cpus", 8]]"#],
    )?;
    Migrator::new(&store).apply_to(12)?;

    let conn = store.lock()?;
    let raw: String = conn.query_row("SELECT Parameters FROM NT_Machine", [], |r| r.get(0))?;
    assert_eq!(raw, r#"[["cpus","8"],["hostname","box-1"]]"#);
    Ok(())
}

#[test]
fn existing_index_becomes_a_warning() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(15)?;
    store.lock()?.execute_batch(
        "CREATE INDEX \"ix_NT_FieldChangeV2_StartOrderID\" ON \"NT_FieldChangeV2\" (\"StartOrderID\")",
    )?;

    let report = Migrator::new(&store).apply_all()?;
    assert_eq!(report.final_version, CURRENT_VERSION);
    let step = report.applied.iter().find(|s| s.from == 15).unwrap();
    assert_eq!(step.warnings.len(), 1);
    assert!(step.warnings[0].contains("NT_FieldChangeV2"));
    Ok(())
}

#[test]
fn missing_nts_suite_stops_the_chain() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    let migrator = Migrator::new(&store);
    migrator.apply_to(4)?;
    {
        let conn = store.lock()?;
        let nts = metadata::find_suite(&conn, "nts")?.unwrap();
        metadata::delete_suite(&conn, nts.id)?;
    }

    let err = migrator.apply_all().unwrap_err();
    match err.downcast_ref::<MigrationError>() {
        Some(MigrationError::Step { from, to, .. }) => {
            assert_eq!((*from, *to), (4, 5));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(format!("{err}").contains("nts"));
    assert_eq!(migrator.current_version()?, 4);
    Ok(())
}

#[test]
fn newer_database_is_rejected_untouched() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    {
        let conn = store.lock()?;
        conn.execute_batch(
            "CREATE TABLE SchemaVersion (Name VARCHAR(256) PRIMARY KEY, Version INTEGER);
             INSERT INTO SchemaVersion VALUES ('__core__', 99);",
        )?;
    }
    let err = Migrator::new(&store).apply_all().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MigrationError>(),
        Some(MigrationError::FutureVersion { found: 99, .. })
    ));
    let conn = store.lock()?;
    assert_eq!(table_names(&conn)?, vec!["SchemaVersion".to_string()]);
    Ok(())
}

#[test]
fn duplicate_field_changes_are_merged_at_v19() -> anyhow::Result<()> {
    let (_dir, store) = open_temp()?;
    Migrator::new(&store).apply_to(18)?;
    {
        let conn = store.lock()?;
        conn.execute_batch(
            "INSERT INTO NT_Machine (ID, Name) VALUES (1, 'm');
             INSERT INTO NT_Order (ID, llvm_project_revision) VALUES (1, '100'), (2, '101');
             INSERT INTO NT_Test (ID, Name) VALUES (1, 't');
             INSERT INTO NT_FieldChangeV2 (ID, StartOrderID, EndOrderID, TestID, MachineID, FieldID)
                 VALUES (1, 1, 2, 1, 1, 1), (2, 1, 2, 1, 1, 1);
             INSERT INTO NT_Regression (ID, Title, State) VALUES (1, 'r', 0);
             INSERT INTO NT_RegressionIndicator (RegressionID, FieldChangeID) VALUES (1, 1), (1, 2);",
        )?;
    }
    Migrator::new(&store).apply_all()?;

    let conn = store.lock()?;
    let ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT ID FROM NT_FieldChangeV2")?;
        let rows = stmt.query_map([], |r| r.get::<_, i64>(0))?;
        rows.collect::<Result<_, _>>()?
    };
    assert_eq!(ids, vec![2]);
    let indicators: i64 =
        conn.query_row("SELECT COUNT(*) FROM NT_RegressionIndicator", [], |r| r.get(0))?;
    assert_eq!(indicators, 1);
    let dup = conn.execute(
        "INSERT INTO NT_FieldChangeV2 (StartOrderID, EndOrderID, TestID, MachineID, FieldID)
         VALUES (1, 2, 1, 1, 1)",
        [],
    );
    assert!(dup.is_err());
    Ok(())
}
