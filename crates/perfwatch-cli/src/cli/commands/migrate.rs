use super::{exit_codes, Session};
use crate::cli::args::MigrateArgs;
use perfwatch_core::errors::MigrationError;
use perfwatch_core::migrate::{MigrationReport, MigrationStatus, Migrator};

pub fn cmd_migrate(args: MigrateArgs, session: &Session) -> anyhow::Result<i32> {
    let store = session.open_store()?;
    let migrator = Migrator::new(&store);

    if args.status {
        let status = migrator.status()?;
        session.emit(&status, print_status)?;
        return Ok(exit_codes::OK);
    }

    let outcome = match args.to {
        Some(target) => migrator.apply_to(target),
        None => migrator.apply_all(),
    };
    let report = match outcome {
        Ok(report) => report,
        Err(e) => match e.downcast_ref::<MigrationError>() {
            Some(MigrationError::FutureVersion { .. }) | Some(MigrationError::InvalidTarget { .. }) => {
                eprintln!("config error: {}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
            _ => return Err(e),
        },
    };
    session.emit(&report, print_report)?;
    Ok(exit_codes::OK)
}

fn print_status(status: &MigrationStatus) {
    println!("schema version: {} (latest {})", status.current, status.latest);
    if !status.versioned {
        println!("note: database has no version marker yet");
    }
    if status.pending.is_empty() {
        println!("up to date");
    } else {
        println!("pending steps:");
        for step in &status.pending {
            println!("  {}", step);
        }
    }
}

fn print_report(report: &MigrationReport) {
    if report.applied.is_empty() {
        println!("schema version {}: nothing to do", report.final_version);
        return;
    }
    if report.legacy {
        println!("note: unversioned database upgraded from version 0");
    }
    for step in &report.applied {
        println!("  {} -> {}: {}", step.from, step.to, step.name);
        for w in &step.warnings {
            println!("    warning: {}", w);
        }
    }
    println!(
        "migrated {} -> {} ({} steps)",
        report.initial_version,
        report.final_version,
        report.applied.len()
    );
}
