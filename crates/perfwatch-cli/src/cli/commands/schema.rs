use super::{exit_codes, Session};
use crate::cli::args::SchemaArgs;
use anyhow::Context;
use perfwatch_core::errors::SchemaError;
use perfwatch_core::migrate::CURRENT_VERSION;
use perfwatch_core::schema::definition::SuiteDefinition;
use perfwatch_core::schema::snapshot;
use perfwatch_core::storage::{metadata, DdlCompiler};

pub fn cmd_schema(args: SchemaArgs, session: &Session) -> anyhow::Result<i32> {
    let suite = match &args.definition {
        Some(path) => SuiteDefinition::load(path)?.to_suite()?,
        None => {
            let name = args.suite.as_deref().context("suite name required")?;
            let store = session.open_store()?;
            let conn = store.lock()?;
            metadata::load_suite(&conn, name)?.ok_or_else(|| SchemaError::NotFound {
                entity: "test suite",
                identifier: name.to_string(),
            })?
        }
    };

    let version = args.schema_version.unwrap_or(CURRENT_VERSION);
    if version == 0 || version > CURRENT_VERSION {
        eprintln!("config error: schema version must be in 1..={}", CURRENT_VERSION);
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let ddl = DdlCompiler::new(args.dialect);
    let statements: Vec<String> = snapshot(version, &suite)
        .tables
        .iter()
        .flat_map(|t| ddl.create_table_with_indexes(t))
        .collect();
    session.emit(&statements, |stmts| {
        for s in stmts {
            println!("{};", s);
        }
    })?;
    Ok(exit_codes::OK)
}
