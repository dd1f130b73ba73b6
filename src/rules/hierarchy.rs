use std::collections::{BTreeMap, BTreeSet};

use crate::{
    data::{RecordSet, Value},
    error::{CleanError, Result},
    rules::Rule,
    schema::Schema,
};

/// Flags every row of a barcode that appears under more than one hierarchy.
///
/// The hierarchy of a row is the tuple of its hierarchy column values. Rows with
/// a null barcode are not grouped.
#[derive(Debug, Clone)]
pub struct HierarchyConsistency {
    barcode_index: usize,
    hierarchy_indices: Vec<usize>,
}

impl HierarchyConsistency {
    pub fn new(
        schema: &Schema,
        barcode_field: &str,
        hierarchy_columns: &[String],
        hierarchy_pattern: &str,
    ) -> Result<Self> {
        let barcode_index = schema.index_of(barcode_field).ok_or_else(|| {
            CleanError::precondition(
                "hierarchy_consistency",
                format!("barcode field '{barcode_field}' is not in the schema"),
            )
        })?;
        let hierarchy_indices = if hierarchy_columns.is_empty() {
            schema.indices_matching(hierarchy_pattern)
        } else {
            hierarchy_columns
                .iter()
                .map(|name| {
                    schema.index_of(name).ok_or_else(|| {
                        CleanError::precondition(
                            "hierarchy_consistency",
                            format!("hierarchy column '{name}' is not in the schema"),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        if hierarchy_indices.is_empty() {
            return Err(CleanError::precondition(
                "hierarchy_consistency",
                format!("no field name contains '{hierarchy_pattern}'"),
            ));
        }
        Ok(Self {
            barcode_index,
            hierarchy_indices,
        })
    }
}

impl Rule for HierarchyConsistency {
    fn name(&self) -> &'static str {
        "hierarchy_consistency"
    }

    fn reason(&self) -> &'static str {
        "inconsistent_hierarchy"
    }

    fn violations(&self, records: &RecordSet) -> Vec<usize> {
        let mut by_barcode: BTreeMap<&Value, (BTreeSet<Vec<Option<&Value>>>, Vec<usize>)> =
            BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            let Some(barcode) = record.get(self.barcode_index) else {
                continue;
            };
            let entry = by_barcode.entry(barcode).or_default();
            entry.0.insert(record.project(&self.hierarchy_indices));
            entry.1.push(idx);
        }
        let mut flagged = by_barcode
            .into_values()
            .filter(|(hierarchies, _)| hierarchies.len() > 1)
            .flat_map(|(_, members)| members)
            .collect::<Vec<_>>();
        flagged.sort_unstable();
        flagged
    }
}
