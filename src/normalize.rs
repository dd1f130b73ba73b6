//! String normalization applied to every STRING field of a table.
//!
//! The transform is derived from the schema once ([`Normalizer::from_schema`]) and
//! then applied row by row. Non-STRING fields pass through untouched.

use std::{borrow::Cow, sync::OnceLock};

use log::debug;
use regex::Regex;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{
    data::{Record, RecordSet, Value},
    error::{CleanError, Result},
    schema::{FieldType, Schema},
};

/// Trimmed, uppercased spellings that stand for a missing value.
pub const NULL_TOKENS: &[&str] = &["", "NULL", "N/A", "NAN", "NA", "N.A!"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldTransform {
    CleanText,
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: Schema,
    transforms: Vec<FieldTransform>,
}

impl Normalizer {
    pub fn from_schema(schema: &Schema) -> Self {
        let transforms = schema
            .fields()
            .iter()
            .map(|field| match field.field_type {
                FieldType::String => FieldTransform::CleanText,
                _ => FieldTransform::Passthrough,
            })
            .collect();
        Self {
            schema: schema.clone(),
            transforms,
        }
    }

    pub fn text_field_count(&self) -> usize {
        self.transforms
            .iter()
            .filter(|t| **t == FieldTransform::CleanText)
            .count()
    }

    pub fn normalize(&self, records: &RecordSet) -> Result<RecordSet> {
        if records.schema() != &self.schema {
            return Err(CleanError::mismatch(
                "record set schema differs from the schema the normalizer was built for",
            ));
        }
        let mut output = Vec::with_capacity(records.len());
        for record in records.iter() {
            output.push(self.normalize_record(record)?);
        }
        debug!(
            "Normalized {} record(s) across {} text field(s)",
            output.len(),
            self.text_field_count()
        );
        RecordSet::new(self.schema.clone(), output)
    }

    fn normalize_record(&self, record: &Record) -> Result<Record> {
        let mut values = Vec::with_capacity(record.len());
        for ((field, transform), value) in self
            .schema
            .fields()
            .iter()
            .zip(&self.transforms)
            .zip(record.values())
        {
            let Some(value) = value else {
                values.push(None);
                continue;
            };
            if value.field_type() != field.field_type {
                return Err(CleanError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.field_type,
                    found: value.type_name(),
                });
            }
            let normalized = match (transform, value) {
                (FieldTransform::CleanText, Value::String(text)) => {
                    normalize_text(text).map(Value::String)
                }
                _ => Some(value.clone()),
            };
            values.push(normalized);
        }
        Ok(Record::new(values))
    }
}

/// Convenience wrapper deriving the normalizer from `schema` and applying it.
pub fn normalize(schema: &Schema, records: &RecordSet) -> Result<RecordSet> {
    Normalizer::from_schema(schema).normalize(records)
}

/// Cleans one text value; `None` means the value is a null token.
///
/// Decomposes to NFD, drops combining marks, collapses whitespace runs, trims and
/// uppercases. The null-token test covers both the raw value and the cleaned
/// result so a second pass never changes the output.
pub fn normalize_text(value: &str) -> Option<String> {
    if is_null_token(&value.trim().to_uppercase()) {
        return None;
    }
    let stripped = strip_marks(value);
    let collapsed = whitespace_regex().replace_all(&stripped, " ");
    let upper = collapsed.trim().to_uppercase();
    // Uppercasing can reintroduce marks on a few letters (e.g. U+01F0).
    let cleaned = match strip_marks(&upper) {
        Cow::Borrowed(_) => upper,
        Cow::Owned(again) => again,
    };
    if is_null_token(&cleaned) {
        None
    } else {
        Some(cleaned)
    }
}

pub fn is_null_token(candidate: &str) -> bool {
    NULL_TOKENS.contains(&candidate)
}

fn strip_marks(value: &str) -> Cow<'_, str> {
    if value.is_ascii() {
        return Cow::Borrowed(value);
    }
    let decomposed = value.nfd().filter(|c| !is_combining_mark(*c)).collect::<String>();
    if decomposed == value {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(decomposed)
    }
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}
