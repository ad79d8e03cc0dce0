use super::{exit_codes, Session};
use crate::cli::args::CompareArgs;
use perfwatch_core::compare::{ComparisonResult, Verdict};
use serde::Serialize;

#[derive(Serialize)]
struct CompareOutput {
    value_status: Option<Verdict>,
    test_status: Verdict,
    performance_change: bool,
    result: ComparisonResult,
}

pub fn cmd_compare(args: CompareArgs, session: &Session) -> anyhow::Result<i32> {
    let settings = &session.config.comparison;
    let mut result = ComparisonResult::from_samples(
        &args.current,
        &args.previous,
        args.aggregation.into(),
        args.bigger_is_better,
    )
    .with_failures(args.current_failed, args.previous_failed);
    if let Some(sd) = args.stddev {
        result = result.with_stddev(sd);
    } else if !args.history.is_empty() {
        result = result.with_history_window(&args.history);
    }

    let out = CompareOutput {
        value_status: result.get_value_status(settings),
        test_status: result.get_test_status(),
        performance_change: result.is_performance_change(settings),
        result,
    };
    session.emit(&out, print_comparison)?;

    let regressed = out.value_status == Some(Verdict::Regressed)
        || out.test_status == Verdict::Regressed;
    Ok(if regressed {
        exit_codes::REGRESSION_FOUND
    } else {
        exit_codes::OK
    })
}

fn print_comparison(out: &CompareOutput) {
    let r = &out.result;
    let fmt = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{}", v));
    match out.value_status {
        Some(v) => println!("{}", v),
        None => println!("NO_VALUE"),
    }
    println!("  current:  {}", fmt(r.current));
    println!("  previous: {}", fmt(r.previous));
    if let (Some(d), Some(p)) = (r.delta, r.pct_delta) {
        println!("  delta:    {:+} ({:+.2}%)", d, p * 100.0);
    }
    if let Some(sd) = &r.stddev {
        println!("  stddev:   {}", sd.value());
    }
    if out.test_status != Verdict::UnchangedPass {
        println!("  test:     {}", out.test_status);
    }
}
