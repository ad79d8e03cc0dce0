//! 1 -> 2: recompute inferred run orders.
//!
//! Runs submitted before report versioning had their order inferred from the
//! compiler. Production clang builds are re-tagged from their version line,
//! runs are stamped with `__report_version__`, orphaned orders are removed and
//! the order chain is relinked.

use super::MigrationContext;
use crate::storage::store::{parameters_from_value, parameters_to_json};
use anyhow::Context;
use regex::Regex;
use rusqlite::{params, OptionalExtension, Transaction};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub fn upgrade(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    let version_line = Regex::new(r"^(.*) version ([^ ]*) (\([^(]*\))(.*)")?;
    let clang_tag = Regex::new(r"clang-([0-9.]*)")?;

    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let Some(field) = suite.primary_order_field().map(|f| f.name.clone()) else {
            ctx.warn(format!("suite {} has no order field; skipping", suite.name));
            continue;
        };
        let run_t = suite.table("Run");
        let order_t = suite.table("Order");
        tracing::info!(event = "perfwatch.migrate.run_orders", suite = %suite.name);

        ctx.transaction(|tx| {
            let updated = update_runs(tx, &run_t, &order_t, &field, &version_line, &clang_tag)?;
            tx.execute(
                &format!("UPDATE \"{}\" SET NextOrder = NULL, PreviousOrder = NULL", order_t),
                [],
            )?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM \"{o}\" WHERE NOT EXISTS
                     (SELECT 1 FROM \"{r}\" WHERE \"{r}\".OrderID = \"{o}\".ID)",
                    o = order_t,
                    r = run_t
                ),
                [],
            )?;
            relink_orders(tx, &order_t, &field)?;
            tracing::info!(
                event = "perfwatch.migrate.run_orders_done",
                table = %run_t,
                updated,
                removed_orders = removed
            );
            Ok(())
        })?;
    }
    Ok(())
}

fn update_runs(
    tx: &Transaction<'_>,
    run_t: &str,
    order_t: &str,
    field: &str,
    version_line: &Regex,
    clang_tag: &Regex,
) -> anyhow::Result<usize> {
    let mut runs = Vec::new();
    {
        let mut stmt = tx.prepare(&format!(
            "SELECT ID, OrderID, Parameters FROM \"{}\"
             WHERE Parameters IS NULL
                OR Parameters NOT LIKE '%[\"__report_version__\"%'",
            run_t
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let order_id: Option<i64> = row.get(1)?;
            let params = parameters_from_value(row.get_ref(2)?)
                .with_context(|| format!("parameters of run {} in {}", id, run_t))?;
            runs.push((id, order_id, params));
        }
    }

    let mut updated = 0;
    for (run_id, order_id, params) in runs {
        let info: BTreeMap<String, String> = params.into_iter().collect();
        let orig_order: Option<String> = match order_id {
            Some(oid) => tx
                .query_row(
                    &format!("SELECT \"{}\" FROM \"{}\" WHERE ID = ?1", field, order_t),
                    params![oid],
                    |r| r.get(0),
                )
                .optional()?
                .flatten(),
            None => None,
        };
        let Some(orig_order) = orig_order else {
            continue;
        };
        if let Some(inferred) = info.get("inferred_run_order") {
            if *inferred != orig_order {
                continue;
            }
        }

        let run_order = production_clang_tag(&info, orig_order.trim(), version_line, clang_tag)
            .unwrap_or_else(|| orig_order.trim().to_string());

        let mut info = info;
        info.insert("inferred_run_order".into(), run_order.clone());
        info.insert("__report_version__".into(), "1".into());
        let encoded = parameters_to_json(info.into_iter().collect())?;
        tx.execute(
            &format!("UPDATE \"{}\" SET Parameters = ?1 WHERE ID = ?2", run_t),
            params![encoded, run_id],
        )?;

        if run_order != orig_order {
            let existing: Option<i64> = tx
                .query_row(
                    &format!("SELECT ID FROM \"{}\" WHERE \"{}\" = ?1", order_t, field),
                    params![run_order],
                    |r| r.get(0),
                )
                .optional()?;
            let new_order = match existing {
                Some(id) => id,
                None => {
                    tx.execute(
                        &format!("INSERT INTO \"{}\" (\"{}\") VALUES (?1)", order_t, field),
                        params![run_order],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            tx.execute(
                &format!("UPDATE \"{}\" SET OrderID = ?1 WHERE ID = ?2", run_t),
                params![new_order, run_id],
            )?;
        }
        updated += 1;
    }
    Ok(updated)
}

/// Production clang runs whose order equals the source tag get the tag
/// rederived from the `clang-X.Y` build string of the version line.
fn production_clang_tag(
    info: &BTreeMap<String, String>,
    run_order: &str,
    version_line: &Regex,
    clang_tag: &Regex,
) -> Option<String> {
    let get = |k: &str| info.get(k).map(String::as_str).unwrap_or("");
    let src_tag = get("cc_src_tag");
    if !get("cc_name").contains("clang")
        || get("cc_build") != "PROD"
        || src_tag.is_empty()
        || run_order != src_tag.trim()
    {
        return None;
    }
    let line = get("cc_version").split('\n').find(|l| l.contains(" version "))?;
    let caps = version_line.captures(line)?;
    let build = caps.get(3)?.as_str();
    let tag = clang_tag.captures(build)?;
    Some(tag.get(1)?.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Num(u64),
    Text(String),
}

impl PartialOrd for Part {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Part {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Part::Num(a), Part::Num(b)) => a.cmp(b),
            (Part::Text(a), Part::Text(b)) => a.cmp(b),
            (Part::Num(_), Part::Text(_)) => Ordering::Less,
            (Part::Text(_), Part::Num(_)) => Ordering::Greater,
        }
    }
}

/// Dotted version key: numeric components compare as integers.
fn dotted_key(order: &str) -> Vec<Part> {
    order
        .trim()
        .split('.')
        .map(|item| {
            if !item.is_empty() && item.bytes().all(|b| b.is_ascii_digit()) {
                item.parse().map(Part::Num).unwrap_or_else(|_| Part::Text(item.into()))
            } else {
                Part::Text(item.to_string())
            }
        })
        .collect()
}

fn relink_orders(tx: &Transaction<'_>, order_t: &str, field: &str) -> anyhow::Result<()> {
    let mut orders: Vec<(i64, String)> = Vec::new();
    {
        let mut stmt = tx.prepare(&format!("SELECT ID, \"{}\" FROM \"{}\"", field, order_t))?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?.unwrap_or_default()))
        })?;
        for r in rows {
            orders.push(r?);
        }
    }
    orders.sort_by_cached_key(|(id, rev)| (dotted_key(rev), *id));

    let sql = format!(
        "UPDATE \"{}\" SET PreviousOrder = ?1, NextOrder = ?2 WHERE ID = ?3",
        order_t
    );
    for (i, (id, _)) in orders.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| orders[p].0);
        let next = orders.get(i + 1).map(|o| o.0);
        tx.execute(&sql, params![prev, next, id])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_keys_sort_numerically() {
        let mut v = vec!["1.10", "1.9", "2", "1.9.1"];
        v.sort_by_key(|s| dotted_key(s));
        assert_eq!(v, vec!["1.9", "1.9.1", "1.10", "2"]);
    }

    #[test]
    fn clang_tag_is_rederived_from_version_line() {
        let version_line = Regex::new(r"^(.*) version ([^ ]*) (\([^(]*\))(.*)").unwrap();
        let clang_tag = Regex::new(r"clang-([0-9.]*)").unwrap();
        let info: BTreeMap<String, String> = [
            ("cc_name", "apple_clang"),
            ("cc_build", "PROD"),
            ("cc_src_tag", "211"),
            (
                "cc_version",
                "Target: x86_64\nApple clang version 2.0 (tags/Apple/clang-211.10.1) (based on LLVM)",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(
            production_clang_tag(&info, "211", &version_line, &clang_tag).as_deref(),
            Some("211.10.1")
        );
        assert_eq!(production_clang_tag(&info, "212", &version_line, &clang_tag), None);
    }
}
