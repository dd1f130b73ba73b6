//! Table schema model and YAML persistence.
//!
//! A [`Schema`] is the ordered list of [`Field`]s shared by every record of a
//! table. Field names are unique; the constructor enforces it so the rest of the
//! engine can address columns by position.

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{CleanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOL",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["STRING", "INTEGER", "FLOAT", "BOOL", "DATE", "DATETIME"]
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "str" | "text" => Ok(FieldType::String),
            "integer" | "int" | "int64" => Ok(FieldType::Integer),
            "float" | "float64" | "double" | "numeric" => Ok(FieldType::Float),
            "bool" | "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "datetime" | "timestamp" => Ok(FieldType::DateTime),
            _ => Err(anyhow!(
                "Unknown field type '{value}'. Supported types: {}",
                FieldType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        FieldType::from_str(&raw).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(CleanError::mismatch("field names cannot be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CleanError::mismatch(format!(
                    "field '{}' is declared more than once",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Every column typed as STRING, in header order.
    pub fn from_headers(headers: &[String]) -> Result<Self> {
        Self::new(headers.iter().map(Field::string).collect())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| CleanError::UnknownField {
            field: name.to_string(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn indices_of_type(&self, field_type: FieldType) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.field_type == field_type)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Indices of fields whose name contains `pattern`, ignoring case.
    pub fn indices_matching(&self, pattern: &str) -> Vec<usize> {
        let needle = pattern.to_lowercase();
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name.to_lowercase().contains(&needle))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Returns a copy of this schema with `extra` appended.
    pub fn extended(&self, extra: &[Field]) -> Result<Self> {
        let mut fields = self.fields.clone();
        fields.extend(extra.iter().cloned());
        Self::new(fields)
    }

    pub fn validate_headers(&self, headers: &[String]) -> Result<()> {
        if headers.len() != self.fields.len() {
            return Err(CleanError::mismatch(format!(
                "header length mismatch: schema expects {} column(s) but table contains {}",
                self.fields.len(),
                headers.len()
            )));
        }
        for (idx, (field, header)) in self.fields.iter().zip(headers).enumerate() {
            if field.name != *header {
                return Err(CleanError::mismatch(format!(
                    "header mismatch at position {}: expected '{}' but found '{}'",
                    idx + 1,
                    field.name,
                    header
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: Schema = serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        // Re-run the constructor checks that serde bypasses.
        Ok(Schema::new(schema.fields)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }
}
