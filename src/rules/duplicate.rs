use std::collections::BTreeMap;

use crate::{
    data::{Record, RecordSet, Value},
    error::{CleanError, Result},
    rules::Rule,
    schema::Schema,
};

/// Flags every copy of a fully duplicated row except one representative.
///
/// Copies are identical, so the representative is simply the first position in
/// which the row occurs; which copy is kept never changes the output contents.
#[derive(Debug, Clone)]
pub struct DuplicateRow;

impl DuplicateRow {
    pub fn new(schema: &Schema) -> Result<Self> {
        if schema.is_empty() {
            return Err(CleanError::precondition(
                "duplicate_row",
                "schema declares no fields",
            ));
        }
        Ok(Self)
    }
}

impl Rule for DuplicateRow {
    fn name(&self) -> &'static str {
        "duplicate_row"
    }

    fn reason(&self) -> &'static str {
        "all_line_duplicate"
    }

    fn violations(&self, records: &RecordSet) -> Vec<usize> {
        let mut partitions: BTreeMap<&Record, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            partitions.entry(record).or_default().push(idx);
        }
        let mut flagged = partitions
            .into_values()
            .filter(|members| members.len() > 1)
            .flat_map(|members| members.into_iter().skip(1))
            .collect::<Vec<_>>();
        flagged.sort_unstable();
        flagged
    }
}

/// Flags all but the first row of every primary-key partition.
///
/// Members are ordered by key (equal within a partition) and then by the
/// remaining fields in schema order, so the survivor is the smallest row.
#[derive(Debug, Clone)]
pub struct DuplicateKey {
    key_indices: Vec<usize>,
    rest_indices: Vec<usize>,
}

impl DuplicateKey {
    pub fn new(schema: &Schema, primary_key: &[String]) -> Result<Self> {
        if primary_key.is_empty() {
            return Err(CleanError::precondition(
                "duplicate_key",
                "no primary key configured",
            ));
        }
        let mut key_indices = Vec::with_capacity(primary_key.len());
        for name in primary_key {
            let idx = schema.index_of(name).ok_or_else(|| {
                CleanError::precondition(
                    "duplicate_key",
                    format!("primary key field '{name}' is not in the schema"),
                )
            })?;
            key_indices.push(idx);
        }
        let rest_indices = (0..schema.len())
            .filter(|idx| !key_indices.contains(idx))
            .collect();
        Ok(Self {
            key_indices,
            rest_indices,
        })
    }
}

impl Rule for DuplicateKey {
    fn name(&self) -> &'static str {
        "duplicate_key"
    }

    fn reason(&self) -> &'static str {
        "primary_key_duplicate"
    }

    fn violations(&self, records: &RecordSet) -> Vec<usize> {
        let mut partitions: BTreeMap<Vec<Option<&Value>>, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            partitions
                .entry(record.project(&self.key_indices))
                .or_default()
                .push(idx);
        }
        let rows = records.records();
        let mut flagged = Vec::new();
        for mut members in partitions.into_values().filter(|m| m.len() > 1) {
            members.sort_by(|a, b| {
                rows[*a]
                    .project(&self.rest_indices)
                    .cmp(&rows[*b].project(&self.rest_indices))
                    .then(a.cmp(b))
            });
            flagged.extend(members.into_iter().skip(1));
        }
        flagged.sort_unstable();
        flagged
    }
}
