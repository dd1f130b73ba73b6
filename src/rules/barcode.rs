use std::collections::BTreeSet;

use crate::{
    data::RecordSet,
    error::{CleanError, Result},
    rules::Rule,
    schema::Schema,
};

/// Flags barcodes whose character length is outside the allowed set.
///
/// A null barcode has no length and is always flagged.
#[derive(Debug, Clone)]
pub struct BarcodeLength {
    index: usize,
    allowed: BTreeSet<usize>,
}

impl BarcodeLength {
    pub fn new(schema: &Schema, field: &str, allowed: BTreeSet<usize>) -> Result<Self> {
        let index = schema.index_of(field).ok_or_else(|| {
            CleanError::precondition(
                "barcode_length",
                format!("barcode field '{field}' is not in the schema"),
            )
        })?;
        if allowed.is_empty() {
            return Err(CleanError::precondition(
                "barcode_length",
                "the allowed barcode length set is empty",
            ));
        }
        Ok(Self { index, allowed })
    }
}

impl Rule for BarcodeLength {
    fn name(&self) -> &'static str {
        "barcode_length"
    }

    fn reason(&self) -> &'static str {
        "wrong_barcode_length"
    }

    fn violations(&self, records: &RecordSet) -> Vec<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| match record.get(self.index) {
                Some(value) => !self
                    .allowed
                    .contains(&value.as_display().chars().count()),
                None => true,
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}
