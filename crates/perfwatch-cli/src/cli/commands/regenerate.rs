use super::{exit_codes, Session};
use crate::cli::args::RegenerateArgs;
use perfwatch_core::fieldchange::{regenerate_fieldchanges_for_run, RegenerateReport};

pub fn cmd_regenerate(args: RegenerateArgs, session: &Session) -> anyhow::Result<i32> {
    let store = session.open_store()?;
    let settings = session.config.tracker_settings();
    let report = regenerate_fieldchanges_for_run(&store, &args.suite, args.run, &settings)?;
    session.emit(&report, print_report)?;

    Ok(if report.regressions_created.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::REGRESSION_FOUND
    })
}

fn print_report(report: &RegenerateReport) {
    println!(
        "{} run {}: {} created, {} updated, {} deleted",
        report.suite, report.run_id, report.created, report.updated, report.deleted
    );
    if !report.regressions_created.is_empty() {
        let ids: Vec<String> = report.regressions_created.iter().map(|i| i.to_string()).collect();
        println!("new regressions: {}", ids.join(", "));
    }
    if !report.regressions_deleted.is_empty() {
        let ids: Vec<String> = report.regressions_deleted.iter().map(|i| i.to_string()).collect();
        println!("removed regressions: {}", ids.join(", "));
    }
}
