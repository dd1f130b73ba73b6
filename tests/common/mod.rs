#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use refclean::{
    data::{Record, RecordSet},
    schema::{Field, FieldType, Schema},
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Creates a workspace pre-populated with the files under `tests/data`.
    pub fn with_fixtures() -> Self {
        let workspace = Self::new();
        for entry in fs::read_dir(fixture_path("")).expect("read fixtures") {
            let entry = entry.expect("fixture entry");
            fs::copy(entry.path(), workspace.path().join(entry.file_name()))
                .expect("copy fixture");
        }
        workspace
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read temp file")
    }
}

/// `country_id, barcode, brand` all typed STRING.
pub fn product_schema() -> Schema {
    Schema::new(vec![
        Field::string("country_id"),
        Field::string("barcode"),
        Field::string("brand"),
    ])
    .expect("product schema")
}

/// `country_id, barcode, brand, valid_from` with a DATE field.
pub fn dated_schema() -> Schema {
    product_schema()
        .extended(&[Field::new("valid_from", FieldType::Date)])
        .expect("dated schema")
}

/// Builds a set from text rows; empty cells are null, cells are parsed per field type.
pub fn record_set(schema: &Schema, rows: &[&[&str]]) -> RecordSet {
    let records = rows
        .iter()
        .map(|row| {
            Record::new(
                row.iter()
                    .zip(schema.fields())
                    .map(|(cell, field)| {
                        refclean::data::parse_typed_value(cell, field.field_type)
                            .expect("parse fixture cell")
                    })
                    .collect(),
            )
        })
        .collect();
    RecordSet::new(schema.clone(), records).expect("record set")
}

/// Text of every cell in `records`, nulls rendered empty, sorted by row.
pub fn sorted_rows(records: &RecordSet) -> Vec<Vec<String>> {
    let mut rows = records.iter().map(Record::to_strings).collect::<Vec<_>>();
    rows.sort();
    rows
}
