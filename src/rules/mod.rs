//! Pluggable defect rules.
//!
//! Each rule is a value implementing [`Rule`]: it is bound to a schema when built
//! (resolving the columns it needs and checking its preconditions) and then
//! selects the violating rows of a record set. Rules never see each other's
//! output; the engine unions their findings.

mod barcode;
mod date;
mod duplicate;
mod hierarchy;

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use barcode::BarcodeLength;
pub use date::DateRange;
pub use duplicate::{DuplicateKey, DuplicateRow};
pub use hierarchy::HierarchyConsistency;

use crate::{
    data::RecordSet,
    error::{CleanError, Result},
    schema::Schema,
};

/// Barcode lengths accepted when no configuration overrides them.
pub const DEFAULT_BARCODE_LENGTHS: [usize; 4] = [7, 8, 10, 13];

pub trait Rule: fmt::Debug {
    /// Configuration name of the rule.
    fn name(&self) -> &'static str;

    /// Tag attached to every row the rule flags.
    fn reason(&self) -> &'static str;

    /// Positions (into `records.records()`) of the violating rows, ascending.
    fn violations(&self, records: &RecordSet) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    DuplicateRow,
    DuplicateKey,
    BarcodeLength,
    #[serde(rename = "date_format")]
    DateRange,
    HierarchyConsistency,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::DuplicateRow,
        RuleKind::DuplicateKey,
        RuleKind::BarcodeLength,
        RuleKind::DateRange,
        RuleKind::HierarchyConsistency,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::DuplicateRow => "duplicate_row",
            RuleKind::DuplicateKey => "duplicate_key",
            RuleKind::BarcodeLength => "barcode_length",
            RuleKind::DateRange => "date_format",
            RuleKind::HierarchyConsistency => "hierarchy_consistency",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            RuleKind::DuplicateRow => "all_line_duplicate",
            RuleKind::DuplicateKey => "primary_key_duplicate",
            RuleKind::BarcodeLength => "wrong_barcode_length",
            RuleKind::DateRange => "wrong_date",
            RuleKind::HierarchyConsistency => "inconsistent_hierarchy",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            RuleKind::DuplicateRow => "identical rows beyond the first occurrence",
            RuleKind::DuplicateKey => "rows sharing a primary key beyond the first",
            RuleKind::BarcodeLength => "barcode length outside the allowed set",
            RuleKind::DateRange => "missing date or year outside 1900..=2100",
            RuleKind::HierarchyConsistency => "barcode mapped to several product hierarchies",
        }
    }

    pub fn supported() -> String {
        RuleKind::ALL
            .iter()
            .map(RuleKind::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Binds the rule to `schema`, failing when its precondition does not hold.
    pub fn build(&self, params: &RuleParams, schema: &Schema) -> Result<Box<dyn Rule>> {
        let rule: Box<dyn Rule> = match self {
            RuleKind::DuplicateRow => Box::new(DuplicateRow::new(schema)?),
            RuleKind::DuplicateKey => Box::new(DuplicateKey::new(schema, &params.primary_key)?),
            RuleKind::BarcodeLength => Box::new(BarcodeLength::new(
                schema,
                &params.barcode_field,
                params.barcode_lengths.clone(),
            )?),
            RuleKind::DateRange => Box::new(DateRange::new(schema, params.date_field.as_deref())?),
            RuleKind::HierarchyConsistency => Box::new(HierarchyConsistency::new(
                schema,
                &params.barcode_field,
                &params.hierarchy_columns,
                &params.hierarchy_pattern,
            )?),
        };
        Ok(rule)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleKind {
    type Err = CleanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        RuleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == trimmed)
            .ok_or_else(|| CleanError::UnknownRule {
                name: trimmed.to_string(),
                supported: RuleKind::supported(),
            })
    }
}

/// Column bindings and thresholds shared by the rule implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleParams {
    pub primary_key: Vec<String>,
    pub barcode_field: String,
    pub barcode_lengths: BTreeSet<usize>,
    /// Explicit DATE field; when absent the schema must hold exactly one.
    pub date_field: Option<String>,
    /// Explicit hierarchy columns; when empty `hierarchy_pattern` selects them.
    pub hierarchy_columns: Vec<String>,
    pub hierarchy_pattern: String,
}

impl Default for RuleParams {
    fn default() -> Self {
        Self {
            primary_key: vec!["country_id".into(), "barcode".into()],
            barcode_field: "barcode".into(),
            barcode_lengths: DEFAULT_BARCODE_LENGTHS.into_iter().collect(),
            date_field: None,
            hierarchy_columns: Vec::new(),
            hierarchy_pattern: "hierarchy".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in RuleKind::ALL {
            assert_eq!(kind.name().parse::<RuleKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_names_list_supported_rules() {
        let err = "spellcheck".parse::<RuleKind>().expect_err("unknown rule");
        let message = err.to_string();
        assert!(message.contains("spellcheck"));
        assert!(message.contains("duplicate_key"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
