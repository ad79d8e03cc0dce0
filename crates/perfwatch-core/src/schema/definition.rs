//! Suite definitions loaded from YAML (or JSON) files, format version 2.
//!
//! ```yaml
//! format_version: "2"
//! name: size
//! machine_fields:
//!   - name: hardware
//! run_fields:
//!   - name: llvm_project_revision
//!     order: true
//! metrics:
//!   - name: text_size
//!     type: Real
//! ```

use crate::errors::{SchemaError, SchemaResult};
use crate::model::{MachineField, OrderField, RunField, SampleField, SampleType, Suite};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const SUPPORTED_FORMAT_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub format_version: String,
    pub name: String,
    #[serde(default)]
    pub machine_fields: Vec<FieldDef>,
    #[serde(default)]
    pub run_fields: Vec<RunFieldDef>,
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFieldDef {
    pub name: String,
    #[serde(default)]
    pub order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    #[serde(rename = "type", default = "default_metric_type")]
    pub metric_type: String,
    #[serde(default)]
    pub bigger_is_better: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_abbrev: Option<String>,
}

fn default_metric_type() -> String {
    "Real".to_string()
}

fn parse_metric_type(name: &str) -> Option<SampleType> {
    match name.to_ascii_lowercase().as_str() {
        "real" => Some(SampleType::Real),
        "status" => Some(SampleType::Status),
        "hash" => Some(SampleType::Hash),
        _ => None,
    }
}

impl SuiteDefinition {
    pub fn from_yaml(raw: &str) -> SchemaResult<Self> {
        let def: SuiteDefinition = serde_yaml::from_str(raw)
            .map_err(|e| SchemaError::InvalidDefinition(format!("failed to parse: {}", e)))?;
        def.validate()?;
        Ok(def)
    }

    pub fn load(path: &Path) -> SchemaResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SchemaError::InvalidDefinition(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> SchemaResult<()> {
        let invalid = |msg: String| Err(SchemaError::InvalidDefinition(msg));
        if self.format_version != SUPPORTED_FORMAT_VERSION {
            return invalid(format!(
                "unsupported format_version '{}' (supported: {})",
                self.format_version, SUPPORTED_FORMAT_VERSION
            ));
        }
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return invalid(format!("invalid suite name '{}'", self.name));
        }
        if !self.run_fields.iter().any(|f| f.order) {
            return invalid(format!("suite '{}' has no order field", self.name));
        }
        for m in &self.metrics {
            if parse_metric_type(&m.metric_type).is_none() {
                return invalid(format!(
                    "unknown metric type '{}' for metric '{}'",
                    m.metric_type, m.name
                ));
            }
        }
        let names = [
            self.machine_fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            self.run_fields.iter().map(|f| f.name.as_str()).collect(),
            self.metrics.iter().map(|f| f.name.as_str()).collect(),
        ];
        for group in names {
            let mut seen = HashSet::new();
            if let Some(dup) = group.into_iter().find(|n| !seen.insert(*n)) {
                return invalid(format!("duplicate field '{}' in suite '{}'", dup, self.name));
            }
        }
        Ok(())
    }

    /// The suite this definition registers; the table prefix is the suite name.
    pub fn to_suite(&self) -> SchemaResult<Suite> {
        let mut suite = Suite::new(&self.name, &self.name, SUPPORTED_FORMAT_VERSION);
        suite.machine_fields = self
            .machine_fields
            .iter()
            .map(|f| MachineField {
                name: f.name.clone(),
                info_key: f.name.clone(),
            })
            .collect();
        let mut ordinal = 0;
        for f in &self.run_fields {
            if f.order {
                suite.order_fields.push(OrderField {
                    name: f.name.clone(),
                    info_key: f.name.clone(),
                    ordinal,
                });
                ordinal += 1;
            } else {
                suite.run_fields.push(RunField {
                    name: f.name.clone(),
                    info_key: f.name.clone(),
                });
            }
        }
        for m in &self.metrics {
            let ty = parse_metric_type(&m.metric_type).ok_or_else(|| {
                SchemaError::InvalidDefinition(format!("unknown metric type '{}'", m.metric_type))
            })?;
            suite
                .sample_fields
                .push(SampleField::new(&m.name, &m.name, ty).bigger_is_better(m.bigger_is_better));
        }
        suite.validate()?;
        Ok(suite)
    }

    pub fn canonical_json(&self) -> SchemaResult<String> {
        serde_json::to_string(self).map_err(|e| SchemaError::InvalidDefinition(e.to_string()))
    }
}

/// Additive changes that move a registered suite to a new definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteChanges {
    pub machine_fields: Vec<MachineField>,
    pub run_fields: Vec<RunField>,
    pub sample_fields: Vec<SampleField>,
    /// Metrics whose `bigger_is_better` flag flips.
    pub bigger_is_better: Vec<(String, bool)>,
}

impl SuiteChanges {
    pub fn is_empty(&self) -> bool {
        self.machine_fields.is_empty()
            && self.run_fields.is_empty()
            && self.sample_fields.is_empty()
            && self.bigger_is_better.is_empty()
    }
}

/// Computes the changes from `old` to `new`. Removing a field, changing a
/// metric type or adding an order field cannot be done in place.
pub fn diff_suites(old: &Suite, new: &Suite) -> SchemaResult<SuiteChanges> {
    let unsupported = |reason: String| SchemaError::UnsupportedChange {
        suite: old.name.clone(),
        reason,
    };
    let mut changes = SuiteChanges::default();

    for f in &old.machine_fields {
        if !new.machine_fields.iter().any(|n| n.name == f.name) {
            return Err(unsupported(format!("machine field '{}' was removed", f.name)));
        }
    }
    for f in &new.machine_fields {
        if !old.machine_fields.iter().any(|o| o.name == f.name) {
            changes.machine_fields.push(f.clone());
        }
    }

    for f in &old.order_fields {
        if !new.order_fields.iter().any(|n| n.name == f.name) {
            return Err(unsupported(format!("order field '{}' was removed", f.name)));
        }
    }
    for f in &new.order_fields {
        if !old.order_fields.iter().any(|o| o.name == f.name) {
            return Err(unsupported(format!("new order field '{}'", f.name)));
        }
    }

    for f in &old.run_fields {
        if !new.run_fields.iter().any(|n| n.name == f.name) {
            return Err(unsupported(format!("run field '{}' was removed", f.name)));
        }
    }
    for f in &new.run_fields {
        if !old.run_fields.iter().any(|o| o.name == f.name) {
            changes.run_fields.push(f.clone());
        }
    }

    for f in &old.sample_fields {
        match new.sample_field(&f.name) {
            None => return Err(unsupported(format!("metric '{}' was removed", f.name))),
            Some(n) if n.sample_type != f.sample_type => {
                return Err(unsupported(format!(
                    "metric '{}' changed type from {} to {}",
                    f.name,
                    f.sample_type.as_str(),
                    n.sample_type.as_str()
                )))
            }
            Some(n) if n.bigger_is_better != f.bigger_is_better => {
                changes
                    .bigger_is_better
                    .push((f.name.clone(), n.bigger_is_better));
            }
            Some(_) => {}
        }
    }
    for f in &new.sample_fields {
        if old.sample_field(&f.name).is_none() {
            changes.sample_fields.push(f.clone());
        }
    }
    // Status fields must be registered before the metrics they gate.
    changes
        .sample_fields
        .sort_by_key(|f| f.sample_type != SampleType::Status);
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: &str = r#"
format_version: "2"
name: size
machine_fields:
  - name: hardware
run_fields:
  - name: llvm_project_revision
    order: true
  - name: tag
metrics:
  - name: text_size
    unit: bytes
  - name: score
    bigger_is_better: true
  - name: build_hash
    type: hash
"#;

    #[test]
    fn parses_definition_into_suite() -> anyhow::Result<()> {
        let def = SuiteDefinition::from_yaml(SIZE)?;
        let suite = def.to_suite()?;
        assert_eq!(suite.db_key_name, "size");
        assert_eq!(suite.order_fields.len(), 1);
        assert_eq!(suite.run_fields.len(), 1);
        assert_eq!(suite.sample_fields.len(), 3);
        assert!(suite.sample_field("score").unwrap().bigger_is_better);
        assert_eq!(
            suite.sample_field("build_hash").unwrap().sample_type,
            SampleType::Hash
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_metric_type_and_missing_order() {
        let bad_type = SIZE.replace("type: hash", "type: Complex");
        assert!(SuiteDefinition::from_yaml(&bad_type).is_err());
        let no_order = SIZE.replace("order: true", "order: false");
        assert!(SuiteDefinition::from_yaml(&no_order).is_err());
        let bad_version = SIZE.replace("format_version: \"2\"", "format_version: \"1\"");
        assert!(SuiteDefinition::from_yaml(&bad_version).is_err());
    }

    #[test]
    fn diff_reports_additions_and_rejects_removals() -> anyhow::Result<()> {
        let old = SuiteDefinition::from_yaml(SIZE)?.to_suite()?;
        let mut grown = SuiteDefinition::from_yaml(SIZE)?;
        grown.metrics.push(MetricDef {
            name: "data_size".into(),
            metric_type: "Real".into(),
            bigger_is_better: false,
            display_name: None,
            unit: None,
            unit_abbrev: None,
        });
        grown.machine_fields.push(FieldDef { name: "os".into() });
        let changes = diff_suites(&old, &grown.to_suite()?)?;
        assert_eq!(changes.sample_fields.len(), 1);
        assert_eq!(changes.machine_fields.len(), 1);

        let mut shrunk = SuiteDefinition::from_yaml(SIZE)?;
        shrunk.metrics.retain(|m| m.name != "text_size");
        assert!(matches!(
            diff_suites(&old, &shrunk.to_suite()?),
            Err(SchemaError::UnsupportedChange { .. })
        ));

        let mut retyped = SuiteDefinition::from_yaml(SIZE)?;
        retyped.metrics[0].metric_type = "Status".into();
        assert!(diff_suites(&old, &retyped.to_suite()?).is_err());

        let mut new_order = SuiteDefinition::from_yaml(SIZE)?;
        new_order.run_fields[1].order = true;
        assert!(diff_suites(&old, &new_order.to_suite()?).is_err());
        Ok(())
    }

    #[test]
    fn diff_lists_status_fields_first() -> anyhow::Result<()> {
        let old = SuiteDefinition::from_yaml(SIZE)?.to_suite()?;
        let mut grown = SuiteDefinition::from_yaml(SIZE)?;
        for (name, ty) in [("link_time", "Real"), ("link_status", "Status")] {
            grown.metrics.push(MetricDef {
                name: name.into(),
                metric_type: ty.into(),
                bigger_is_better: false,
                display_name: None,
                unit: None,
                unit_abbrev: None,
            });
        }
        let changes = diff_suites(&old, &grown.to_suite()?)?;
        let names: Vec<&str> = changes.sample_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["link_status", "link_time"]);
        Ok(())
    }
}
