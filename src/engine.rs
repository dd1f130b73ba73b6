//! Rule evaluation and defect aggregation.
//!
//! The engine builds every active rule against the record set's schema before
//! evaluating any of them, so configuration problems surface before work starts.
//! Findings are unioned per row position and then folded per distinct row: a row
//! that several rules reject yields one [`DefectRecord`] carrying every reason.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::{
    data::{Record, RecordSet, Value},
    error::{CleanError, Result},
    rules::{Rule, RuleKind, RuleParams},
    schema::{Field, FieldType, Schema},
};

pub const REASONS_FIELD: &str = "reasons";
pub const OCCURRENCES_FIELD: &str = "occurrences";

/// A rejected row with the deduplicated set of reasons it was rejected for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DefectRecord {
    pub record: Record,
    pub reasons: BTreeSet<String>,
    /// Number of copies of `record` that were flagged.
    pub occurrences: usize,
}

impl DefectRecord {
    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.contains(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub schema: Schema,
    /// Sorted by row contents.
    pub defects: Vec<DefectRecord>,
    /// Rows flagged per rule name, before aggregation.
    pub rule_hits: BTreeMap<String, usize>,
    pub rows_evaluated: usize,
}

impl ValidationReport {
    pub fn flagged_rows(&self) -> usize {
        self.defects.iter().map(|d| d.occurrences).sum()
    }

    /// Distinct defective rows per reason tag.
    pub fn reason_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for defect in &self.defects {
            for reason in &defect.reasons {
                *counts.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn excluded_records(&self) -> Result<RecordSet> {
        defects_to_table(&self.schema, &self.defects)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationRuleEngine {
    params: RuleParams,
}

impl ValidationRuleEngine {
    pub fn new(params: RuleParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RuleParams {
        &self.params
    }

    /// Resolves rule names and binds every rule to `schema`.
    ///
    /// Unknown names and unmet preconditions are configuration errors; nothing is
    /// skipped silently. Repeated names are evaluated once.
    pub fn prepare(&self, active_rules: &[String], schema: &Schema) -> Result<Vec<Box<dyn Rule>>> {
        let kinds = active_rules
            .iter()
            .map(|name| name.parse::<RuleKind>())
            .collect::<Result<BTreeSet<_>>>()?;
        kinds
            .iter()
            .map(|kind| kind.build(&self.params, schema))
            .collect()
    }

    pub fn evaluate(&self, records: &RecordSet, active_rules: &[String]) -> Result<ValidationReport> {
        let rules = self.prepare(active_rules, records.schema())?;
        Ok(evaluate_rules(&rules, records))
    }
}

/// Runs already-bound rules and folds their findings per distinct row.
pub fn evaluate_rules(rules: &[Box<dyn Rule>], records: &RecordSet) -> ValidationReport {
    let mut per_position: BTreeMap<usize, BTreeSet<&'static str>> = BTreeMap::new();
    let mut rule_hits = BTreeMap::new();
    for rule in rules {
        let flagged = rule.violations(records);
        debug!("Rule '{}' flagged {} row(s)", rule.name(), flagged.len());
        rule_hits.insert(rule.name().to_string(), flagged.len());
        for idx in flagged {
            per_position.entry(idx).or_default().insert(rule.reason());
        }
    }

    let rows = records.records();
    let mut per_row: BTreeMap<&Record, (BTreeSet<String>, usize)> = BTreeMap::new();
    for (idx, reasons) in per_position {
        let entry = per_row.entry(&rows[idx]).or_default();
        entry.0.extend(reasons.into_iter().map(str::to_string));
        entry.1 += 1;
    }
    let defects = per_row
        .into_iter()
        .map(|(record, (reasons, occurrences))| DefectRecord {
            record: record.clone(),
            reasons,
            occurrences,
        })
        .collect::<Vec<_>>();
    info!(
        "Evaluated {} rule(s) over {} row(s): {} distinct defective row(s)",
        rules.len(),
        records.len(),
        defects.len()
    );
    ValidationReport {
        schema: records.schema().clone(),
        defects,
        rule_hits,
        rows_evaluated: records.len(),
    }
}

/// Schema of the excluded table: the clean schema plus reasons and occurrences.
pub fn excluded_schema(schema: &Schema) -> Result<Schema> {
    for reserved in [REASONS_FIELD, OCCURRENCES_FIELD] {
        if schema.index_of(reserved).is_some() {
            return Err(CleanError::mismatch(format!(
                "field '{reserved}' is reserved for the excluded table"
            )));
        }
    }
    schema.extended(&[
        Field::string(REASONS_FIELD),
        Field::new(OCCURRENCES_FIELD, FieldType::Integer),
    ])
}

/// Encodes defects as rows of the excluded table; reasons become a JSON array.
pub fn defects_to_table(schema: &Schema, defects: &[DefectRecord]) -> Result<RecordSet> {
    let excluded = excluded_schema(schema)?;
    let mut rows = Vec::with_capacity(defects.len());
    for defect in defects {
        let reasons = serde_json::to_string(&defect.reasons)
            .map_err(|err| CleanError::mismatch(format!("encoding reasons: {err}")))?;
        let mut values = defect.record.values().to_vec();
        values.push(Some(Value::String(reasons)));
        values.push(Some(Value::Integer(defect.occurrences as i64)));
        rows.push(Record::new(values));
    }
    RecordSet::new(excluded, rows)
}

/// Decodes an excluded table back into defects over its base schema.
pub fn defects_from_table(table: &RecordSet) -> Result<(Schema, Vec<DefectRecord>)> {
    let schema = table.schema();
    let reasons_idx = schema.require(REASONS_FIELD)?;
    let occurrences_idx = schema.require(OCCURRENCES_FIELD)?;
    if reasons_idx + 2 != schema.len() || occurrences_idx + 1 != schema.len() {
        return Err(CleanError::mismatch(format!(
            "'{REASONS_FIELD}' and '{OCCURRENCES_FIELD}' must be the last two fields of an excluded table"
        )));
    }
    let base = Schema::new(schema.fields()[..reasons_idx].to_vec())?;

    let mut defects = Vec::with_capacity(table.len());
    for (row_idx, row) in table.iter().enumerate() {
        let reasons: BTreeSet<String> = match row.get(reasons_idx) {
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|err| {
                CleanError::mismatch(format!("row {}: invalid reasons '{raw}': {err}", row_idx + 1))
            })?,
            _ => BTreeSet::new(),
        };
        if reasons.is_empty() {
            return Err(CleanError::mismatch(format!(
                "row {} of the excluded table has no reasons",
                row_idx + 1
            )));
        }
        let occurrences = match row.get(occurrences_idx) {
            Some(Value::Integer(n)) if *n > 0 => usize::try_from(*n).map_err(|_| {
                CleanError::mismatch(format!(
                    "row {}: occurrences {n} is out of range",
                    row_idx + 1
                ))
            })?,
            Some(other) => {
                return Err(CleanError::mismatch(format!(
                    "row {} of the excluded table has occurrences '{other}'; expected a positive count",
                    row_idx + 1
                )));
            }
            None => {
                return Err(CleanError::mismatch(format!(
                    "row {} of the excluded table has no occurrences",
                    row_idx + 1
                )));
            }
        };
        let mut values = row.values().to_vec();
        values.truncate(reasons_idx);
        defects.push(DefectRecord {
            record: Record::new(values),
            reasons,
            occurrences,
        });
    }
    Ok((base, defects))
}
