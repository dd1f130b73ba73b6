//! Frequency-based canonicalization of near-duplicate spellings.
//!
//! Values of a target column are grouped by their normalization key (the value
//! with everything outside `[A-Z0-9]` removed). Within each key the most frequent
//! exact spelling wins; ties go to the lexicographically smallest spelling, so the
//! result never depends on the order records were read in.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde::Serialize;

use crate::{
    data::{Record, RecordSet, Value},
    error::{CleanError, Result},
    schema::{FieldType, Schema},
};

/// Strips every character outside `[A-Z0-9]`; expects already-uppercased input.
pub fn normalization_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Canonical spelling per normalization key for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalMapping {
    pub column: String,
    canonical: BTreeMap<String, String>,
    /// Occurrence count of every `(key, spelling)` pair the choice was made from.
    counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl CanonicalMapping {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.canonical.get(key).map(String::as_str)
    }

    pub fn canonical_for(&self, value: &str) -> Option<&str> {
        self.get(&normalization_key(value))
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.canonical.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Spellings rewritten to something other than themselves.
    pub fn collapsed_spellings(&self) -> usize {
        self.counts
            .iter()
            .map(|(key, spellings)| {
                let chosen = self.canonical.get(key);
                spellings
                    .keys()
                    .filter(|s| Some(*s) != chosen)
                    .count()
            })
            .sum()
    }
}

#[derive(Default)]
struct SpellingCounter {
    counts: HashMap<String, HashMap<String, usize>>,
}

impl SpellingCounter {
    fn ingest(&mut self, value: &str) {
        let key = normalization_key(value);
        *self
            .counts
            .entry(key)
            .or_default()
            .entry(value.to_string())
            .or_insert(0) += 1;
    }

    fn into_mapping(self, column: &str) -> CanonicalMapping {
        let mut canonical = BTreeMap::new();
        let mut counts = BTreeMap::new();
        for (key, spellings) in self.counts {
            let winner = spellings
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(spelling, _)| spelling.clone());
            if let Some(winner) = winner {
                canonical.insert(key.clone(), winner);
            }
            counts.insert(key, spellings.into_iter().collect::<BTreeMap<_, _>>());
        }
        CanonicalMapping {
            column: column.to_string(),
            canonical,
            counts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrequencyCanonicalizer {
    target_columns: Vec<String>,
}

impl FrequencyCanonicalizer {
    pub fn new<I, S>(target_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_columns: target_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn target_columns(&self) -> &[String] {
        &self.target_columns
    }

    /// Resolves every target column against `schema`; each must exist and be STRING.
    pub fn resolve_targets(&self, schema: &Schema) -> Result<Vec<(usize, &str)>> {
        let mut targets = Vec::with_capacity(self.target_columns.len());
        for column in &self.target_columns {
            let index = schema.require(column)?;
            let field_type = schema.fields()[index].field_type;
            if field_type != FieldType::String {
                return Err(CleanError::mismatch(format!(
                    "canonicalization target '{column}' must be STRING but is {field_type}"
                )));
            }
            targets.push((index, column.as_str()));
        }
        Ok(targets)
    }

    /// Rewrites every target column to its canonical spellings.
    ///
    /// Returns the rewritten set and the mapping built for each column.
    pub fn canonicalize(
        &self,
        records: &RecordSet,
    ) -> Result<(RecordSet, BTreeMap<String, CanonicalMapping>)> {
        let schema = records.schema();
        let targets = self.resolve_targets(schema)?;

        let mut mappings = BTreeMap::new();
        let mut rewritten: Vec<Record> = records.records().to_vec();
        for (index, column) in targets {
            let mut counter = SpellingCounter::default();
            for record in records.iter() {
                match record.get(index) {
                    Some(Value::String(value)) => counter.ingest(value),
                    Some(other) => {
                        return Err(CleanError::TypeMismatch {
                            field: column.to_string(),
                            expected: FieldType::String,
                            found: other.type_name(),
                        });
                    }
                    None => {}
                }
            }
            let mapping = counter.into_mapping(column);
            for record in &mut rewritten {
                let replacement = match record.get(index) {
                    Some(Value::String(value)) => mapping.canonical_for(value).map(str::to_string),
                    _ => None,
                };
                if let Some(canonical) = replacement {
                    record.set(index, Some(Value::String(canonical)));
                }
            }
            debug!(
                "Column '{}': {} key(s), {} spelling(s) collapsed",
                column,
                mapping.len(),
                mapping.collapsed_spellings()
            );
            mappings.insert(column.to_string(), mapping);
        }
        info!(
            "Canonicalized {} column(s) over {} record(s)",
            mappings.len(),
            rewritten.len()
        );
        Ok((RecordSet::new(schema.clone(), rewritten)?, mappings))
    }
}
