use super::{exit_codes, Session};
use crate::cli::args::{SuiteArgs, SuiteSub};
use perfwatch_core::model::{SampleField, SampleType};
use perfwatch_core::provision::{add_sample_field, create_suite_from_definition, sync_suite, SyncReport};
use perfwatch_core::schema::definition::SuiteDefinition;
use perfwatch_core::storage::metadata;

pub fn cmd_suite(args: SuiteArgs, session: &Session) -> anyhow::Result<i32> {
    match args.cmd {
        SuiteSub::Create { path } => {
            let def = SuiteDefinition::load(&path)?;
            let store = session.open_store()?;
            let suite = create_suite_from_definition(&store, &def)?;
            session.emit(&suite, |s| {
                println!("created suite {} (tables {}_*)", s.name, s.db_key_name)
            })?;
            Ok(exit_codes::OK)
        }
        SuiteSub::Sync { path, dry_run } => {
            let paths = match path {
                Some(p) => vec![p],
                None => session.config.suites.clone(),
            };
            if paths.is_empty() {
                eprintln!("config error: no definition given and no `suites` configured");
                return Ok(exit_codes::CONFIG_ERROR);
            }
            let store = session.open_store()?;
            let mut reports = Vec::with_capacity(paths.len());
            for p in &paths {
                let def = SuiteDefinition::load(p)?;
                reports.push(sync_suite(&store, &def, dry_run)?);
            }
            session.emit(&reports, |rs| rs.iter().for_each(print_sync))?;
            Ok(exit_codes::OK)
        }
        SuiteSub::AddField {
            suite,
            name,
            sample_type,
            info_key,
            status_field,
            bigger_is_better,
        } => {
            let Some(ty) = SampleType::parse(&sample_type) else {
                eprintln!("config error: unknown sample type '{}' (Real, Status, Hash)", sample_type);
                return Ok(exit_codes::CONFIG_ERROR);
            };
            let mut field = SampleField::new(&name, info_key.as_deref().unwrap_or(&name), ty)
                .bigger_is_better(bigger_is_better);
            if let Some(status) = &status_field {
                field = field.gated_by(status);
            }
            let store = session.open_store()?;
            add_sample_field(&store, &suite, field.clone())?;
            session.emit(&field, |f| {
                println!("added {} field {} to suite {}", f.sample_type.as_str(), f.name, suite)
            })?;
            Ok(exit_codes::OK)
        }
        SuiteSub::List => {
            let store = session.open_store()?;
            let suites = metadata::registered_suites(&*store.lock()?)?;
            session.emit(&suites, |ss| {
                for s in ss {
                    println!("{}\t{}", s.name, s.db_key_name);
                }
            })?;
            Ok(exit_codes::OK)
        }
    }
}

fn print_sync(report: &SyncReport) {
    if report.created {
        let verb = if report.dry_run { "would create" } else { "created" };
        println!("suite {}: {}", report.suite, verb);
        return;
    }
    let c = &report.changes;
    if c.is_empty() {
        println!("suite {}: up to date", report.suite);
        return;
    }
    let verb = if report.dry_run { "would apply" } else { "applied" };
    println!("suite {}: {}", report.suite, verb);
    for f in &c.machine_fields {
        println!("  + machine field {}", f.name);
    }
    for f in &c.run_fields {
        println!("  + run field {}", f.name);
    }
    for f in &c.sample_fields {
        println!("  + {} metric {}", f.sample_type.as_str(), f.name);
    }
    for (name, flag) in &c.bigger_is_better {
        println!("  ~ {} bigger_is_better={}", name, flag);
    }
}
