use crate::errors::{SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};

/// Value type of a sample column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Real,
    Status,
    Hash,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Real => "Real",
            SampleType::Status => "Status",
            SampleType::Hash => "Hash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Real" => Some(SampleType::Real),
            "Status" => Some(SampleType::Status),
            "Hash" => Some(SampleType::Hash),
            _ => None,
        }
    }
}

/// Test outcome codes. External submission formats encode these numerically,
/// so the ids are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Pass = 0,
    Fail = 1,
    Xfail = 2,
}

impl StatusKind {
    pub const ALL: [StatusKind; 3] = [StatusKind::Pass, StatusKind::Fail, StatusKind::Xfail];

    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusKind::Pass => "PASS",
            StatusKind::Fail => "FAIL",
            StatusKind::Xfail => "XFAIL",
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }
}

/// Triage state stored in `{key}_Regression.State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionState {
    Detected = 0,
    Staged = 1,
    Active = 10,
    NotToBeFixed = 20,
    Ignored = 21,
    Fixed = 22,
    DetectedFixed = 23,
}

impl RegressionState {
    pub const ALL: [RegressionState; 7] = [
        RegressionState::Detected,
        RegressionState::Staged,
        RegressionState::Active,
        RegressionState::NotToBeFixed,
        RegressionState::Ignored,
        RegressionState::Fixed,
        RegressionState::DetectedFixed,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// States that new field changes may still be attached to.
    pub fn accepts_new_changes(self) -> bool {
        matches!(
            self,
            RegressionState::Detected | RegressionState::DetectedFixed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineField {
    pub name: String,
    pub info_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderField {
    pub name: String,
    pub info_key: String,
    pub ordinal: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunField {
    pub name: String,
    pub info_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleField {
    pub name: String,
    pub info_key: String,
    pub sample_type: SampleType,
    /// Name of the companion Status field gating this field, if any.
    pub status_field: Option<String>,
    pub bigger_is_better: bool,
    pub ignore_same_hash: bool,
}

impl SampleField {
    pub fn new(name: &str, info_key: &str, sample_type: SampleType) -> Self {
        Self {
            name: name.to_string(),
            info_key: info_key.to_string(),
            sample_type,
            status_field: None,
            bigger_is_better: false,
            ignore_same_hash: false,
        }
    }

    pub fn real(name: &str, info_key: &str) -> Self {
        Self::new(name, info_key, SampleType::Real)
    }

    pub fn status(name: &str, info_key: &str) -> Self {
        Self::new(name, info_key, SampleType::Status)
    }

    pub fn gated_by(mut self, status_field: &str) -> Self {
        self.status_field = Some(status_field.to_string());
        self
    }

    pub fn bigger_is_better(mut self, value: bool) -> Self {
        self.bigger_is_better = value;
        self
    }
}

/// A registered test suite and its field metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub id: Option<i64>,
    pub name: String,
    pub db_key_name: String,
    pub version: String,
    pub machine_fields: Vec<MachineField>,
    pub order_fields: Vec<OrderField>,
    pub run_fields: Vec<RunField>,
    pub sample_fields: Vec<SampleField>,
}

impl Suite {
    pub fn new(name: &str, db_key_name: &str, version: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            db_key_name: db_key_name.to_string(),
            version: version.to_string(),
            machine_fields: Vec::new(),
            order_fields: Vec::new(),
            run_fields: Vec::new(),
            sample_fields: Vec::new(),
        }
    }

    /// `{db_key_name}_{entity}`
    pub fn table(&self, entity: &str) -> String {
        format!("{}_{}", self.db_key_name, entity)
    }

    pub fn sample_field(&self, name: &str) -> Option<&SampleField> {
        self.sample_fields.iter().find(|f| f.name == name)
    }

    /// Fields holding comparable numeric measurements.
    pub fn metric_fields(&self) -> impl Iterator<Item = &SampleField> {
        self.sample_fields
            .iter()
            .filter(|f| f.sample_type == SampleType::Real)
    }

    /// Order fields sorted by ordinal.
    pub fn ordered_order_fields(&self) -> Vec<&OrderField> {
        let mut fields: Vec<&OrderField> = self.order_fields.iter().collect();
        fields.sort_by_key(|f| f.ordinal);
        fields
    }

    /// The order field used to sequence runs.
    pub fn primary_order_field(&self) -> Option<&OrderField> {
        self.order_fields.iter().min_by_key(|f| f.ordinal)
    }

    /// Checks that a field's status companion exists in this suite and is Status-typed.
    pub fn check_status_field(&self, field: &SampleField) -> SchemaResult<()> {
        let Some(target) = field.status_field.as_deref() else {
            return Ok(());
        };
        let invalid = |reason: String| SchemaError::InvalidStatusField {
            suite: self.name.clone(),
            field: field.name.clone(),
            reason,
        };
        if target == field.name {
            return Err(invalid("a field cannot gate itself".into()));
        }
        match self.sample_field(target) {
            None => Err(invalid(format!("no field named '{}'", target))),
            Some(t) if t.sample_type != SampleType::Status => Err(invalid(format!(
                "'{}' has type {}",
                target,
                t.sample_type.as_str()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Validates field names against reserved columns and every status reference.
    pub fn validate(&self) -> SchemaResult<()> {
        let groups: [(&str, &[&str], Vec<&str>); 4] = [
            (
                "Machine",
                MACHINE_RESERVED,
                self.machine_fields.iter().map(|f| f.name.as_str()).collect(),
            ),
            (
                "Order",
                ORDER_RESERVED,
                self.order_fields.iter().map(|f| f.name.as_str()).collect(),
            ),
            (
                "Run",
                RUN_RESERVED,
                self.run_fields.iter().map(|f| f.name.as_str()).collect(),
            ),
            (
                "Sample",
                SAMPLE_RESERVED,
                self.sample_fields.iter().map(|f| f.name.as_str()).collect(),
            ),
        ];
        for (entity, reserved, names) in groups {
            for name in names {
                if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                    return Err(SchemaError::ReservedName {
                        suite: self.name.clone(),
                        table: self.table(entity),
                        field: name.to_string(),
                    });
                }
            }
        }
        for field in &self.sample_fields {
            self.check_status_field(field)?;
        }
        Ok(())
    }
}

pub const MACHINE_RESERVED: &[&str] = &["ID", "Name", "Parameters"];
pub const ORDER_RESERVED: &[&str] = &["ID", "NextOrder", "PreviousOrder"];
pub const RUN_RESERVED: &[&str] = &[
    "ID",
    "MachineID",
    "OrderID",
    "ImportedFrom",
    "StartTime",
    "EndTime",
    "SimpleRunID",
    "Parameters",
];
pub const SAMPLE_RESERVED: &[&str] = &["ID", "RunID", "TestID", "ProfileID"];

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> Suite {
        let mut s = Suite::new("nts", "NT", "2");
        s.sample_fields.push(SampleField::status("compile_status", ".compile.status"));
        s.sample_fields
            .push(SampleField::real("compile_time", ".compile").gated_by("compile_status"));
        s
    }

    #[test]
    fn status_field_must_be_status_typed() {
        let mut s = suite();
        s.sample_fields
            .push(SampleField::real("exec", ".exec").gated_by("compile_time"));
        let err = s.validate().unwrap_err();
        assert!(matches!(err, SchemaError::InvalidStatusField { .. }));
    }

    #[test]
    fn status_field_must_exist_in_suite() {
        let mut s = suite();
        s.sample_fields
            .push(SampleField::real("exec", ".exec").gated_by("exec_status"));
        assert!(s.validate().is_err());
        assert!(suite().validate().is_ok());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let mut s = suite();
        s.sample_fields.push(SampleField::real("runid", ".x"));
        assert!(matches!(
            s.validate(),
            Err(SchemaError::ReservedName { .. })
        ));
    }

    #[test]
    fn status_kind_ids_are_fixed() {
        assert_eq!(StatusKind::Pass.id(), 0);
        assert_eq!(StatusKind::Fail.id(), 1);
        assert_eq!(StatusKind::Xfail.id(), 2);
        assert_eq!(StatusKind::from_id(1), Some(StatusKind::Fail));
    }
}
