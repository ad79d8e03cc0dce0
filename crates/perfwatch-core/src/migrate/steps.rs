use super::bootstrap::{ensure_sample_type, NTS};
use super::MigrationContext;
use crate::model::{SampleField, SampleType};
use crate::schema::core::{bigger_is_better_column, ignore_same_hash_column, json_schemas_table};
use crate::schema::suite::profile_id_column;
use crate::schema::SchemaSnapshot;
use crate::storage::store::{parameters_from_value, parameters_to_json};
use rusqlite::params;

/// Creates every table of each suite's snapshot at the target version.
fn create_suite_tables(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let snap = ctx.snapshot(&suite);
        ctx.create_all(&snap)?;
    }
    Ok(())
}

/// 2 -> 3
pub fn add_field_change(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    create_suite_tables(ctx)
}

/// 3 -> 4
pub fn add_bigger_is_better(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.add_column_if_missing("TestSuiteSampleFields", &bigger_is_better_column())?;
    Ok(())
}

/// 4 -> 5
pub fn add_nts_score(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.append_sample_field(NTS, SampleField::real("score", ".score").bigger_is_better(true))
}

/// 5 -> 6
pub fn add_nts_mem_bytes(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.append_sample_field(NTS, SampleField::real("mem_bytes", ".mem"))
}

/// 6 -> 7
pub fn add_nts_hash(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.require_suite(NTS)?;
    ctx.transaction(|tx| ensure_sample_type(tx, SampleType::Hash))?;
    ctx.append_sample_field(NTS, SampleField::status("hash_status", ".hash.status"))?;
    ctx.append_sample_field(
        NTS,
        SampleField::new("hash", ".hash", SampleType::Hash).gated_by("hash_status"),
    )
}

/// 7 -> 8: FieldChangeV2, Regression, RegressionIndicator and ChangeIgnore.
pub fn add_regression_tracking(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    create_suite_tables(ctx)
}

/// 8 -> 9
pub fn add_profiles(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let snap = ctx.snapshot(&suite);
        if let Some(profile) = snap.table(&suite.table("Profile")) {
            ctx.create_all(&SchemaSnapshot {
                version: snap.version,
                tables: vec![profile.clone()],
            })?;
        }
        ctx.add_column_if_missing(&suite.table("Sample"), &profile_id_column(&suite))?;
    }
    Ok(())
}

/// 9 -> 10
pub fn add_nts_code_size(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.append_sample_field(NTS, SampleField::real("code_size", ".code_size"))
}

/// 10 -> 11
pub fn add_baselines(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    create_suite_tables(ctx)
}

/// 11 -> 12: machine parameter `name` becomes `hostname`.
pub fn rename_machine_name_parameter(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let machine_t = suite.table("Machine");
        ctx.transaction(|tx| {
            let mut machines = Vec::new();
            {
                let mut stmt = tx.prepare(&format!("SELECT ID, Parameters FROM \"{}\"", machine_t))?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    machines.push((id, parameters_from_value(row.get_ref(1)?)?));
                }
            }
            let sql = format!("UPDATE \"{}\" SET Parameters = ?1 WHERE ID = ?2", machine_t);
            for (id, params) in machines {
                let mut info: std::collections::BTreeMap<String, String> =
                    params.into_iter().collect();
                if let Some(name) = info.remove("name") {
                    info.insert("hostname".to_string(), name);
                }
                let encoded = parameters_to_json(info.into_iter().collect())?;
                tx.execute(&sql, params![encoded, id])?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// 12 -> 13
pub fn add_json_schemas(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.create_all(&SchemaSnapshot {
        version: ctx.target_version(),
        tables: vec![json_schemas_table()],
    })
}

/// 14 -> 15
pub fn drop_legacy_field_change(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let legacy = suite.table("FieldChange");
        if ctx.table_exists(&legacy)? {
            ctx.drop_table(&legacy)?;
        }
    }
    Ok(())
}

/// 17 -> 18
pub fn add_ignore_same_hash(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    ctx.add_column_if_missing("TestSuiteSampleFields", &ignore_same_hash_column())?;
    ctx.transaction(|tx| {
        tx.execute("UPDATE TestSuiteSampleFields SET ignore_same_hash = 0", [])?;
        tx.execute(
            "UPDATE TestSuiteSampleFields SET ignore_same_hash = 1
             WHERE Name = 'execution_time' OR Name = 'score'",
            [],
        )?;
        Ok(())
    })
}
