//! Accepted set = clean set minus the defective rows.

use std::collections::{BTreeMap, BTreeSet};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Record, RecordSet},
    engine::DefectRecord,
    error::{CleanError, Result},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Full-row set difference: every copy of a defective row is removed.
    #[default]
    Set,
    /// Removes only as many copies as were flagged, so the representative of a
    /// fully duplicated row survives.
    Multiset,
}

/// Drops the reasons, keeping each defect's row and flagged-copy count.
pub fn project(defects: &[DefectRecord]) -> BTreeMap<&Record, usize> {
    let mut projected = BTreeMap::new();
    for defect in defects {
        *projected.entry(&defect.record).or_insert(0) += defect.occurrences;
    }
    projected
}

/// Removes the defective rows from `clean`, preserving the order of survivors.
///
/// Pure: the result depends only on the two inputs, so running it again over
/// unchanged inputs reproduces the same accepted set.
pub fn reconcile(
    clean: &RecordSet,
    defects: &[DefectRecord],
    mode: ReconcileMode,
) -> Result<RecordSet> {
    let width = clean.schema().len();
    if let Some(bad) = defects.iter().find(|d| d.record.len() != width) {
        return Err(CleanError::mismatch(format!(
            "defect row has {} value(s) but the clean schema declares {}",
            bad.record.len(),
            width
        )));
    }

    let accepted = match mode {
        ReconcileMode::Set => {
            let excluded = defects.iter().map(|d| &d.record).collect::<BTreeSet<_>>();
            clean
                .iter()
                .filter(|record| !excluded.contains(record))
                .cloned()
                .collect::<Vec<_>>()
        }
        ReconcileMode::Multiset => {
            let mut remaining = project(defects);
            let mut kept = Vec::with_capacity(clean.len());
            for record in clean.iter() {
                match remaining.get_mut(record) {
                    Some(count) if *count > 0 => *count -= 1,
                    _ => kept.push(record.clone()),
                }
            }
            kept
        }
    };
    info!(
        "Reconciled {} clean row(s) against {} defect(s): {} accepted",
        clean.len(),
        defects.len(),
        accepted.len()
    );
    RecordSet::new(clean.schema().clone(), accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};

    fn clean(rows: &[&[&str]]) -> RecordSet {
        let schema = Schema::new(vec![Field::string("barcode"), Field::string("brand")]).unwrap();
        RecordSet::new(schema, rows.iter().map(|r| Record::from_strs(r)).collect()).unwrap()
    }

    fn defect(row: &[&str], occurrences: usize) -> DefectRecord {
        DefectRecord {
            record: Record::from_strs(row),
            reasons: ["all_line_duplicate".to_string()].into_iter().collect(),
            occurrences,
        }
    }

    #[test]
    fn set_mode_removes_every_copy() {
        let clean = clean(&[&["1", "A"], &["1", "A"], &["2", "B"]]);
        let accepted = reconcile(&clean, &[defect(&["1", "A"], 1)], ReconcileMode::Set).unwrap();
        assert_eq!(accepted.records(), &[Record::from_strs(&["2", "B"])]);
    }

    #[test]
    fn multiset_mode_keeps_the_representative() {
        let clean = clean(&[&["1", "A"], &["2", "B"], &["1", "A"]]);
        let accepted =
            reconcile(&clean, &[defect(&["1", "A"], 1)], ReconcileMode::Multiset).unwrap();
        assert_eq!(
            accepted.records(),
            &[Record::from_strs(&["2", "B"]), Record::from_strs(&["1", "A"])]
        );
    }

    #[test]
    fn rerun_is_identical() {
        let clean = clean(&[&["1", "A"], &["2", "B"], &["3", "C"]]);
        let defects = vec![defect(&["2", "B"], 1)];
        let first = reconcile(&clean, &defects, ReconcileMode::Set).unwrap();
        let second = reconcile(&clean, &defects, ReconcileMode::Set).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let clean = clean(&[&["1", "A"]]);
        let err = reconcile(&clean, &[defect(&["1"], 1)], ReconcileMode::Set).expect_err("width");
        assert_eq!(err.kind(), crate::error::ErrorKind::SchemaMismatch);
    }
}
