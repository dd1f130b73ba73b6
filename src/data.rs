use std::{cmp::Ordering, fmt};

use anyhow::{Context, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CleanError, Result},
    schema::{FieldType, Schema},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Storage format for DATETIME cells; `%.f` omits a zero fraction.
pub const DATETIME_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl Value {
    /// Human-readable form for tables and logs. Not guaranteed to parse back to
    /// the same value; use [`Value::encode`] for anything persisted or hashed.
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Text form that [`parse_typed_value`] reads back to an equal value.
    pub fn encode(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_STORAGE_FORMAT).to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "STRING",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Boolean(_) => "BOOL",
            Value::Date(_) => "DATE",
            Value::DateTime(_) => "DATETIME",
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Value::String(_) => FieldType::String,
            Value::Integer(_) => FieldType::Integer,
            Value::Float(_) => FieldType::Float,
            Value::Boolean(_) => FieldType::Boolean,
            Value::Date(_) => FieldType::Date,
            Value::DateTime(_) => FieldType::DateTime,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Boolean(_) => 3,
            Value::Date(_) => 4,
            Value::DateTime(_) => 5,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

// Total order so records can key ordered maps. Values of one column share a
// variant once the schema is enforced; the variant rank only breaks ties between
// heterogeneous values.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// One row: a value (or null) per schema field, in schema order.
///
/// Ordering is lexicographic across fields with null sorting first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Record(Vec<Option<Value>>);

impl Record {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self(values)
    }

    /// Builds a record from non-null strings; empty strings become null.
    pub fn from_strs(values: &[&str]) -> Self {
        Self(
            values
                .iter()
                .map(|v| (!v.is_empty()).then(|| Value::String((*v).to_string())))
                .collect(),
        )
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(|v| v.as_ref())
    }

    pub fn set(&mut self, index: usize, value: Option<Value>) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values at `indices`, in the order given.
    pub fn project(&self, indices: &[usize]) -> Vec<Option<&Value>> {
        indices.iter().map(|idx| self.get(*idx)).collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|v| v.as_ref().map(Value::as_display).unwrap_or_default())
            .collect()
    }

    /// Cells in storage form; nulls become empty cells.
    pub fn encode(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|v| v.as_ref().map(Value::encode).unwrap_or_default())
            .collect()
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        self.0
    }
}

/// A multiset of records sharing one schema. Order carries no meaning but is
/// preserved through every transform so outputs are reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    schema: Schema,
    records: Vec<Record>,
}

impl RecordSet {
    /// Shorter records are padded with nulls; longer ones are rejected.
    pub fn new(schema: Schema, records: Vec<Record>) -> Result<Self> {
        let width = schema.len();
        let mut padded = Vec::with_capacity(records.len());
        for (row_idx, record) in records.into_iter().enumerate() {
            if record.len() > width {
                return Err(CleanError::mismatch(format!(
                    "record {} has {} value(s) but the schema declares {} field(s)",
                    row_idx + 1,
                    record.len(),
                    width
                )));
            }
            let mut values = record.into_values();
            values.resize(width, None);
            padded.push(Record::new(values));
        }
        Ok(Self {
            schema,
            records: padded,
        })
    }

    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Checks every non-null value against its declared field type.
    pub fn check_types(&self) -> Result<()> {
        for record in &self.records {
            for (field, value) in self.schema.fields().iter().zip(record.values()) {
                if let Some(value) = value
                    && value.field_type() != field.field_type
                {
                    return Err(CleanError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type,
                        found: value.type_name(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Records in ascending order; used wherever output must not depend on
    /// enumeration order.
    pub fn sorted_records(&self) -> Vec<&Record> {
        let mut sorted = self.records.iter().collect::<Vec<_>>();
        sorted.sort();
        sorted
    }
}

pub fn parse_naive_date(value: &str) -> anyhow::Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%Y%m%d"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> anyhow::Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a stored text cell into a typed value. Empty cells are null.
pub fn parse_typed_value(value: &str, ty: FieldType) -> anyhow::Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        FieldType::String => Value::String(value.to_string()),
        FieldType::Integer => {
            let parsed: i64 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        FieldType::Float => {
            let parsed: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as float"))?;
            Value::Float(parsed)
        }
        FieldType::Boolean => {
            let lowered = value.trim().to_ascii_lowercase();
            let parsed = match lowered.as_str() {
                "true" | "t" | "yes" | "y" | "1" => true,
                "false" | "f" | "no" | "n" | "0" => false,
                _ => bail!("Failed to parse '{value}' as boolean"),
            };
            Value::Boolean(parsed)
        }
        FieldType::Date => Value::Date(parse_naive_date(value.trim())?),
        FieldType::DateTime => Value::DateTime(parse_naive_datetime(value.trim())?),
    };
    Ok(Some(parsed))
}
