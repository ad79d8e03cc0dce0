//! Regenerates the FieldChange rows of a freshly submitted run and files new
//! changes under regressions.
//!
//! A run is compared against the runs at up to `lookback` earlier orders on
//! the same machine. Changes are keyed by (test, field, machine, start order),
//! and the whole regeneration runs in one IMMEDIATE transaction.

use crate::compare::{Aggregation, ComparisonResult, ComparisonSettings};
use crate::errors::SchemaError;
use crate::model::{RegressionState, SampleType, StatusKind, Suite};
use crate::provision::ensure_current;
use crate::storage::{metadata, Store};
use anyhow::Context;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const FIELD_CHANGE_LOOKBACK: usize = 10;
pub const TITLE_LIMIT: usize = 120;
const SIMILARITY_THRESHOLD: f64 = 2.0;
const LARGE_RUN_SET: usize = 50;
const EMPTY_TITLE: &str = "Regression of 0 benchmarks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub lookback: usize,
    pub aggregation: Aggregation,
    /// Estimate a stddev from the previous window when the run has one sample.
    pub estimate_stddev_from_history: bool,
    pub comparison: ComparisonSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            lookback: FIELD_CHANGE_LOOKBACK,
            aggregation: Aggregation::Min,
            estimate_stddev_from_history: false,
            comparison: ComparisonSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegenerateReport {
    pub suite: String,
    pub run_id: i64,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub regressions_created: Vec<i64>,
    pub regressions_deleted: Vec<i64>,
}

impl RegenerateReport {
    pub fn has_changes(&self) -> bool {
        self.created + self.updated > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RevPart {
    Num(u64),
    Text(String),
}

/// Digit groups of each order field in ordinal order; a value without digits
/// sorts after numeric ones.
fn revision_key(digits: &Regex, values: &[String]) -> Vec<RevPart> {
    let mut key = Vec::new();
    for v in values {
        let before = key.len();
        key.extend(
            digits
                .find_iter(v)
                .filter_map(|m| m.as_str().parse().ok())
                .map(RevPart::Num),
        );
        if key.len() == before {
            key.push(RevPart::Text(v.clone()));
        }
    }
    key
}

fn text_of(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn number_of(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn q(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn percent_similar(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Order ranges intersect, or are identical.
fn is_overlapping(a: (Option<usize>, Option<usize>), b: (Option<usize>, Option<usize>)) -> bool {
    let (Some(a_min), Some(a_max), Some(b_min), Some(b_max)) = (a.0, a.1, b.0, b.1) else {
        return false;
    };
    (a_min == b_min && a_max == b_max) || (a_min < b_max && b_min < a_max)
}

pub fn crop_title(title: String) -> String {
    if title.chars().count() > TITLE_LIMIT {
        let mut cropped: String = title.chars().take(TITLE_LIMIT).collect();
        cropped.push_str("...");
        cropped
    } else {
        title
    }
}

struct SampleRow {
    test_id: i64,
    /// Parallel to `Suite::sample_fields`; hash fields are `None`.
    values: Vec<Option<f64>>,
    hash: Option<String>,
}

#[derive(Debug, Clone)]
struct ActiveChange {
    start: Option<usize>,
    end: Option<usize>,
    field_id: Option<i64>,
    machine: String,
    test: String,
    regression_id: i64,
}

/// Recomputes every FieldChange the run at `run_id` takes part in.
pub fn regenerate_fieldchanges_for_run(
    store: &Store,
    suite_name: &str,
    run_id: i64,
    settings: &TrackerSettings,
) -> anyhow::Result<RegenerateReport> {
    let digits = Regex::new(r"\d+")?;
    let title_pattern = Regex::new(r"^Regression of \d+ benchmarks")?;

    let mut conn = store.lock()?;
    ensure_current(&conn)?;
    let suite = metadata::load_suite(&conn, suite_name)?.ok_or_else(|| SchemaError::NotFound {
        entity: "test suite",
        identifier: suite_name.to_string(),
    })?;
    let suite_id = suite.id.context("registered suite without id")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (machine_id, order_id) = run_location(&tx, &suite, run_id)?;
    let ranks = order_ranks(&tx, &suite, &digits)?;
    let machine_orders = machine_orders(&tx, &suite, machine_id, &ranks)?;
    let pos = machine_orders
        .iter()
        .position(|o| *o == order_id)
        .context("run order missing from machine history")?;
    let previous_orders: Vec<i64> = machine_orders[pos.saturating_sub(settings.lookback)..pos]
        .iter()
        .rev()
        .copied()
        .collect();
    let start_order = previous_orders.first().copied().unwrap_or(order_id);

    let runs = runs_at(&tx, &suite, machine_id, &[order_id])?;
    let previous_runs = runs_at(&tx, &suite, machine_id, &previous_orders)?;
    if runs.len() + previous_runs.len() > LARGE_RUN_SET {
        tracing::warn!(
            event = "perfwatch.fieldchange.large_run_set",
            suite = %suite.name,
            runs = runs.len() + previous_runs.len()
        );
    }

    let current = load_samples(&tx, &suite, &runs)?;
    let previous = load_samples(&tx, &suite, &previous_runs)?;
    let test_ids: BTreeSet<i64> = current
        .iter()
        .chain(previous.iter())
        .map(|s| s.test_id)
        .collect();

    let machine_name = name_of(&tx, &suite.table("Machine"), machine_id)?;
    let mut active = active_changes(&tx, &suite, &ranks)?;
    let mut report = RegenerateReport {
        suite: suite.name.clone(),
        run_id,
        ..Default::default()
    };

    for (idx, field) in suite.sample_fields.iter().enumerate() {
        if field.sample_type != SampleType::Real {
            continue;
        }
        let field_id = metadata::sample_field_id(&tx, suite_id, &field.name)?
            .with_context(|| format!("sample field {} has no id", field.name))?;
        let status_idx = field
            .status_field
            .as_ref()
            .and_then(|s| suite.sample_fields.iter().position(|f| &f.name == s));

        for test_id in &test_ids {
            let cur: Vec<&SampleRow> = current.iter().filter(|s| s.test_id == *test_id).collect();
            let prev: Vec<&SampleRow> = previous.iter().filter(|s| s.test_id == *test_id).collect();
            let result = compare_rows(&cur, &prev, idx, status_idx, field.bigger_is_better, settings);
            let same_binary = field.ignore_same_hash && same_hash(&cur, &prev);
            let is_change = !same_binary && result.is_performance_change(&settings.comparison);

            let existing = find_change(&tx, &suite, *test_id, field_id, machine_id, start_order)?;
            match (is_change, existing) {
                (false, None) => {}
                (false, Some(fc_id)) => {
                    let removed = delete_fieldchange(&tx, &suite, fc_id)?;
                    active.retain(|c| !removed.contains(&c.regression_id));
                    report.regressions_deleted.extend(removed);
                    report.deleted += 1;
                    tracing::info!(
                        event = "perfwatch.fieldchange.removed",
                        suite = %suite.name,
                        field_change = fc_id
                    );
                }
                (true, Some(fc_id)) => {
                    tx.execute(
                        &format!(
                            "UPDATE {} SET OldValue = ?1, NewValue = ?2, EndOrderID = ?3, RunID = ?4 WHERE ID = ?5",
                            q(&suite.table("FieldChangeV2"))
                        ),
                        params![result.previous, result.current, order_id, run_id, fc_id],
                    )?;
                    report.updated += 1;
                }
                (true, None) => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (OldValue, NewValue, StartOrderID, EndOrderID, TestID, MachineID, FieldID, RunID)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                            q(&suite.table("FieldChangeV2"))
                        ),
                        params![
                            result.previous,
                            result.current,
                            start_order,
                            order_id,
                            test_id,
                            machine_id,
                            field_id,
                            run_id
                        ],
                    )?;
                    let fc_id = tx.last_insert_rowid();
                    report.created += 1;

                    let change = ActiveChange {
                        start: ranks.get(&start_order).copied(),
                        end: ranks.get(&order_id).copied(),
                        field_id: Some(field_id),
                        machine: machine_name.clone(),
                        test: name_of(&tx, &suite.table("Test"), *test_id)?,
                        regression_id: 0,
                    };
                    let (found, regression_id) =
                        identify_related_changes(&tx, &suite, fc_id, &change, &active, &title_pattern)?;
                    if !found {
                        report.regressions_created.push(regression_id);
                    }
                    active.push(ActiveChange {
                        regression_id,
                        ..change
                    });
                }
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        event = "perfwatch.fieldchange.regenerated",
        suite = %suite.name,
        run_id,
        created = report.created,
        updated = report.updated,
        deleted = report.deleted
    );
    Ok(report)
}

fn compare_rows(
    cur: &[&SampleRow],
    prev: &[&SampleRow],
    idx: usize,
    status_idx: Option<usize>,
    bigger_is_better: bool,
    settings: &TrackerSettings,
) -> ComparisonResult {
    let fail = StatusKind::Fail.id() as f64;
    let failed = |rows: &[&SampleRow]| {
        status_idx.is_some_and(|si| rows.iter().any(|r| r.values[si] == Some(fail)))
    };
    let values = |rows: &[&SampleRow]| rows.iter().filter_map(|r| r.values[idx]).collect::<Vec<f64>>();
    let prev_values = values(prev);

    let result = ComparisonResult::from_samples(
        &values(cur),
        &prev_values,
        settings.aggregation,
        bigger_is_better,
    )
    .with_failures(failed(cur), failed(prev));
    if settings.estimate_stddev_from_history {
        result.with_history_window(&prev_values)
    } else {
        result
    }
}

fn same_hash(cur: &[&SampleRow], prev: &[&SampleRow]) -> bool {
    let first = |rows: &[&SampleRow]| rows.iter().find_map(|r| r.hash.clone());
    match (first(cur), first(prev)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn run_location(tx: &Transaction<'_>, suite: &Suite, run_id: i64) -> anyhow::Result<(i64, i64)> {
    let row: Option<(Option<i64>, Option<i64>)> = tx
        .query_row(
            &format!("SELECT MachineID, OrderID FROM {} WHERE ID = ?1", q(&suite.table("Run"))),
            params![run_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (machine, order) = row.ok_or_else(|| SchemaError::NotFound {
        entity: "run",
        identifier: run_id.to_string(),
    })?;
    Ok((
        machine.with_context(|| format!("run {} has no machine", run_id))?,
        order.with_context(|| format!("run {} has no order", run_id))?,
    ))
}

fn name_of(tx: &Transaction<'_>, table: &str, id: i64) -> anyhow::Result<String> {
    let name: Option<Option<String>> = tx
        .query_row(
            &format!("SELECT Name FROM {} WHERE ID = ?1", q(table)),
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(name.flatten().unwrap_or_default())
}

/// Rank of every order of the suite by revision key.
fn order_ranks(tx: &Transaction<'_>, suite: &Suite, digits: &Regex) -> anyhow::Result<HashMap<i64, usize>> {
    let mut cols = vec![q("ID")];
    cols.extend(suite.ordered_order_fields().iter().map(|f| q(&f.name)));
    let n = cols.len();
    let mut stmt = tx.prepare(&format!(
        "SELECT {} FROM {}",
        cols.join(", "),
        q(&suite.table("Order"))
    ))?;
    let rows = stmt.query_map([], |r| {
        let id: i64 = r.get(0)?;
        let mut values = Vec::with_capacity(n - 1);
        for i in 1..n {
            values.push(text_of(r.get_ref(i)?).unwrap_or_default());
        }
        Ok((id, values))
    })?;
    let mut keyed = Vec::new();
    for row in rows {
        let (id, values) = row?;
        keyed.push((revision_key(digits, &values), id));
    }
    keyed.sort();
    Ok(keyed
        .into_iter()
        .enumerate()
        .map(|(rank, (_, id))| (id, rank))
        .collect())
}

fn machine_orders(
    tx: &Transaction<'_>,
    suite: &Suite,
    machine_id: i64,
    ranks: &HashMap<i64, usize>,
) -> anyhow::Result<Vec<i64>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT DISTINCT OrderID FROM {} WHERE MachineID = ?1 AND OrderID IS NOT NULL",
        q(&suite.table("Run"))
    ))?;
    let rows = stmt.query_map(params![machine_id], |r| r.get::<_, i64>(0))?;
    let mut orders = Vec::new();
    for r in rows {
        orders.push(r?);
    }
    orders.sort_by_key(|id| (ranks.get(id).copied().unwrap_or(usize::MAX), *id));
    Ok(orders)
}

fn runs_at(tx: &Transaction<'_>, suite: &Suite, machine_id: i64, orders: &[i64]) -> anyhow::Result<Vec<i64>> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = tx.prepare(&format!(
        "SELECT ID FROM {} WHERE MachineID = ? AND OrderID IN ({}) ORDER BY ID",
        q(&suite.table("Run")),
        placeholders(orders.len())
    ))?;
    let args: Vec<i64> = std::iter::once(machine_id).chain(orders.iter().copied()).collect();
    let rows = stmt.query_map(params_from_iter(args), |r| r.get::<_, i64>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn load_samples(tx: &Transaction<'_>, suite: &Suite, runs: &[i64]) -> anyhow::Result<Vec<SampleRow>> {
    if runs.is_empty() {
        return Ok(Vec::new());
    }
    let fields = &suite.sample_fields;
    let mut cols = vec![q("TestID")];
    cols.extend(fields.iter().map(|f| q(&f.name)));
    let mut stmt = tx.prepare(&format!(
        "SELECT {} FROM {} WHERE RunID IN ({}) ORDER BY ID",
        cols.join(", "),
        q(&suite.table("Sample")),
        placeholders(runs.len())
    ))?;
    let rows = stmt.query_map(params_from_iter(runs.iter()), |r| {
        let mut row = SampleRow {
            test_id: r.get(0)?,
            values: Vec::with_capacity(fields.len()),
            hash: None,
        };
        for (i, f) in fields.iter().enumerate() {
            let v = r.get_ref(i + 1)?;
            if f.sample_type == SampleType::Hash {
                row.hash = row.hash.or_else(|| text_of(v));
                row.values.push(None);
            } else {
                row.values.push(number_of(v));
            }
        }
        Ok(row)
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Changes attached to regressions that still accept new changes.
fn active_changes(
    tx: &Transaction<'_>,
    suite: &Suite,
    ranks: &HashMap<i64, usize>,
) -> anyhow::Result<Vec<ActiveChange>> {
    let open: Vec<i64> = RegressionState::ALL
        .iter()
        .filter(|s| s.accepts_new_changes())
        .map(|s| s.code())
        .collect();
    let mut stmt = tx.prepare(&format!(
        "SELECT fc.StartOrderID, fc.EndOrderID, fc.FieldID, m.Name, t.Name, ri.RegressionID
         FROM {fc} fc
         JOIN {ri} ri ON ri.FieldChangeID = fc.ID
         JOIN {reg} r ON r.ID = ri.RegressionID
         JOIN {machine} m ON m.ID = fc.MachineID
         JOIN {test} t ON t.ID = fc.TestID
         WHERE r.State IN ({states})
         ORDER BY fc.ID",
        fc = q(&suite.table("FieldChangeV2")),
        ri = q(&suite.table("RegressionIndicator")),
        reg = q(&suite.table("Regression")),
        machine = q(&suite.table("Machine")),
        test = q(&suite.table("Test")),
        states = placeholders(open.len())
    ))?;
    let rows = stmt.query_map(params_from_iter(open.iter()), |r| {
        let start: Option<i64> = r.get(0)?;
        let end: Option<i64> = r.get(1)?;
        Ok(ActiveChange {
            start: start.and_then(|id| ranks.get(&id).copied()),
            end: end.and_then(|id| ranks.get(&id).copied()),
            field_id: r.get(2)?,
            machine: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
            test: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            regression_id: r.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn find_change(
    tx: &Transaction<'_>,
    suite: &Suite,
    test_id: i64,
    field_id: i64,
    machine_id: i64,
    start_order: i64,
) -> anyhow::Result<Option<i64>> {
    Ok(tx
        .query_row(
            &format!(
                "SELECT ID FROM {} WHERE TestID = ?1 AND FieldID = ?2 AND MachineID = ?3 AND StartOrderID = ?4",
                q(&suite.table("FieldChangeV2"))
            ),
            params![test_id, field_id, machine_id, start_order],
            |r| r.get(0),
        )
        .optional()?)
}

/// Deletes a change and its indicators. Returns the regressions left empty
/// and therefore deleted too.
fn delete_fieldchange(tx: &Transaction<'_>, suite: &Suite, fc_id: i64) -> anyhow::Result<Vec<i64>> {
    let ri_t = q(&suite.table("RegressionIndicator"));
    let reg_t = q(&suite.table("Regression"));

    let mut regression_ids = Vec::new();
    {
        let mut stmt = tx.prepare(&format!(
            "SELECT DISTINCT RegressionID FROM {} WHERE FieldChangeID = ?1",
            ri_t
        ))?;
        let rows = stmt.query_map(params![fc_id], |r| r.get::<_, Option<i64>>(0))?;
        for r in rows {
            regression_ids.extend(r?);
        }
    }
    tx.execute(&format!("DELETE FROM {} WHERE FieldChangeID = ?1", ri_t), params![fc_id])?;
    tx.execute(
        &format!("DELETE FROM {} WHERE ChangeIgnoreID = ?1", q(&suite.table("ChangeIgnore"))),
        params![fc_id],
    )?;
    tx.execute(
        &format!("DELETE FROM {} WHERE ID = ?1", q(&suite.table("FieldChangeV2"))),
        params![fc_id],
    )?;

    let mut deleted = Vec::new();
    for id in regression_ids {
        let remaining: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE RegressionID = ?1", ri_t),
            params![id],
            |r| r.get(0),
        )?;
        if remaining == 0 {
            tx.execute(&format!("DELETE FROM {} WHERE ID = ?1", reg_t), params![id])?;
            tracing::info!(
                event = "perfwatch.regression.removed",
                suite = %suite.name,
                regression = id
            );
            deleted.push(id);
        }
    }
    Ok(deleted)
}

/// Attaches the change to an overlapping, similar open regression, or opens
/// a new one. Returns whether an existing regression matched, and its id.
fn identify_related_changes(
    tx: &Transaction<'_>,
    suite: &Suite,
    fc_id: i64,
    change: &ActiveChange,
    active: &[ActiveChange],
    title_pattern: &Regex,
) -> anyhow::Result<(bool, i64)> {
    for candidate in active {
        if !is_overlapping((candidate.start, candidate.end), (change.start, change.end)) {
            continue;
        }
        let mut confidence = percent_similar(&candidate.machine, &change.machine)
            + percent_similar(&candidate.test, &change.test);
        if candidate.field_id == change.field_id {
            confidence += 1.0;
        }
        if confidence >= SIMILARITY_THRESHOLD {
            attach(tx, suite, candidate.regression_id, fc_id)?;
            rebuild_title(tx, suite, candidate.regression_id, title_pattern)?;
            tracing::info!(
                event = "perfwatch.regression.matched",
                suite = %suite.name,
                regression = candidate.regression_id,
                field_change = fc_id,
                confidence
            );
            return Ok((true, candidate.regression_id));
        }
    }

    tx.execute(
        &format!(
            "INSERT INTO {} (Title, BugLink, State) VALUES (?1, '', ?2)",
            q(&suite.table("Regression"))
        ),
        params![EMPTY_TITLE, RegressionState::Detected.code()],
    )?;
    let regression_id = tx.last_insert_rowid();
    attach(tx, suite, regression_id, fc_id)?;
    rebuild_title(tx, suite, regression_id, title_pattern)?;
    tracing::info!(
        event = "perfwatch.regression.created",
        suite = %suite.name,
        regression = regression_id,
        field_change = fc_id
    );
    Ok((false, regression_id))
}

fn attach(tx: &Transaction<'_>, suite: &Suite, regression_id: i64, fc_id: i64) -> anyhow::Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO {} (RegressionID, FieldChangeID) VALUES (?1, ?2)",
            q(&suite.table("RegressionIndicator"))
        ),
        params![regression_id, fc_id],
    )?;
    Ok(())
}

/// Rewrites a default title to list the regression's benchmarks. Titles set
/// by hand are left alone.
fn rebuild_title(
    tx: &Transaction<'_>,
    suite: &Suite,
    regression_id: i64,
    title_pattern: &Regex,
) -> anyhow::Result<()> {
    let reg_t = q(&suite.table("Regression"));
    let title: Option<Option<String>> = tx
        .query_row(
            &format!("SELECT Title FROM {} WHERE ID = ?1", reg_t),
            params![regression_id],
            |r| r.get(0),
        )
        .optional()?;
    if !title
        .flatten()
        .is_some_and(|t| title_pattern.is_match(&t))
    {
        return Ok(());
    }

    let mut names = Vec::new();
    {
        let mut stmt = tx.prepare(&format!(
            "SELECT t.Name FROM {ri} ri
             JOIN {fc} fc ON fc.ID = ri.FieldChangeID
             JOIN {test} t ON t.ID = fc.TestID
             WHERE ri.RegressionID = ?1",
            ri = q(&suite.table("RegressionIndicator")),
            fc = q(&suite.table("FieldChangeV2")),
            test = q(&suite.table("Test")),
        ))?;
        let rows = stmt.query_map(params![regression_id], |r| r.get::<_, Option<String>>(0))?;
        for r in rows {
            names.push(r?.unwrap_or_default());
        }
    }
    let benchmarks: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let title = crop_title(format!(
        "Regression of {} benchmarks: {}",
        names.len(),
        benchmarks.into_iter().collect::<Vec<_>>().join(", ")
    ));
    tx.execute(
        &format!("UPDATE {} SET Title = ?1 WHERE ID = ?2", reg_t),
        params![title, regression_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_keys_compare_digit_groups() {
        let digits = Regex::new(r"\d+").unwrap();
        let key = |s: &str| revision_key(&digits, &[s.to_string()]);
        assert!(key("r99") < key("r100"));
        assert!(key("1.9") < key("1.10"));
        assert!(key("100") < key("trunk"));
        assert!(key("alpha") < key("beta"));
    }

    #[test]
    fn titles_are_cropped() {
        let long = "x".repeat(130);
        let cropped = crop_title(long);
        assert_eq!(cropped.len(), TITLE_LIMIT + 3);
        assert!(cropped.ends_with("..."));
        assert_eq!(crop_title("short".into()), "short");
    }

    #[test]
    fn overlap_needs_all_bounds() {
        assert!(is_overlapping((Some(1), Some(3)), (Some(2), Some(4))));
        assert!(is_overlapping((Some(1), Some(1)), (Some(1), Some(1))));
        assert!(!is_overlapping((Some(1), Some(2)), (Some(2), Some(3))));
        assert!(!is_overlapping((None, Some(2)), (Some(1), Some(3))));
    }

    #[test]
    fn similarity_is_normalized() {
        assert_eq!(percent_similar("m1", "m1"), 1.0);
        assert!(percent_similar("abc", "xyz") < 0.01);
    }
}
