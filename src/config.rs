//! Dataset configuration.
//!
//! Everything a run needs besides the data itself: table names, the primary key,
//! rule parameters, the canonicalization column policy and the rule sets per
//! dataset type. The value is loaded once and passed explicitly to every stage.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::{CleanError, Result},
    reconcile::ReconcileMode,
    rules::{DEFAULT_BARCODE_LENGTHS, RuleKind, RuleParams},
    schema::{FieldType, Schema},
};

pub const DEFAULT_DATASET_TYPE: &str = "product_reference";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub raw: String,
    pub clean: String,
    pub excluded: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            raw: "product_reference".into(),
            clean: "product_reference_cleaned".into(),
            excluded: "product_reference_excluded".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Raw,
    Clean,
    Excluded,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Raw => "raw",
            TableKind::Clean => "clean",
            TableKind::Excluded => "excluded",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = CleanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(TableKind::Raw),
            "clean" => Ok(TableKind::Clean),
            "excluded" => Ok(TableKind::Excluded),
            other => Err(CleanError::InvalidConfig {
                reason: format!("invalid table type '{other}'; choose from raw, clean, excluded"),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRules {
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Active rule names per dataset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleConfig(BTreeMap<String, DatasetRules>);

impl RuleConfig {
    pub fn new(entries: BTreeMap<String, DatasetRules>) -> Self {
        Self(entries)
    }

    pub fn dataset_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn active_rules(&self, dataset_type: &str) -> Result<&[String]> {
        self.0
            .get(dataset_type)
            .map(|entry| entry.rules.as_slice())
            .ok_or_else(|| CleanError::UnknownDatasetType {
                dataset_type: dataset_type.to_string(),
                known: self.0.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        let rules = [
            RuleKind::DuplicateRow,
            RuleKind::DuplicateKey,
            RuleKind::BarcodeLength,
        ]
        .iter()
        .map(|kind| kind.name().to_string())
        .collect();
        Self(BTreeMap::from([(
            DEFAULT_DATASET_TYPE.to_string(),
            DatasetRules { rules },
        )]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub tables: TableNames,
    pub primary_key: Vec<String>,
    pub barcode_field: String,
    pub barcode_lengths: Vec<usize>,
    /// Explicit canonicalization targets; overrides the patterns when set.
    pub canonical_columns: Vec<String>,
    pub canonical_column_patterns: Vec<String>,
    pub hierarchy_columns: Vec<String>,
    pub hierarchy_pattern: String,
    pub date_field: Option<String>,
    pub reconcile_mode: ReconcileMode,
    pub dataset_types: RuleConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let params = RuleParams::default();
        Self {
            tables: TableNames::default(),
            primary_key: params.primary_key,
            barcode_field: params.barcode_field,
            barcode_lengths: DEFAULT_BARCODE_LENGTHS.to_vec(),
            canonical_columns: Vec::new(),
            canonical_column_patterns: vec!["brand".into(), "supplier".into()],
            hierarchy_columns: Vec::new(),
            hierarchy_pattern: params.hierarchy_pattern,
            date_field: None,
            reconcile_mode: ReconcileMode::default(),
            dataset_types: RuleConfig::default(),
        }
    }
}

impl DatasetConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: DatasetConfig =
            serde_yaml::from_reader(BufReader::new(file)).context("Parsing config YAML")?;
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CleanError::InvalidConfig { reason };
        let names = [&self.tables.raw, &self.tables.clean, &self.tables.excluded];
        for name in names {
            if name.trim().is_empty() {
                return Err(invalid("table names cannot be empty".into()));
            }
            if name.contains(['/', '\\']) || name.starts_with('.') {
                return Err(invalid(format!("table name '{name}' is not a plain name")));
            }
        }
        if names.iter().collect::<BTreeSet<_>>().len() != names.len() {
            return Err(invalid(
                "raw, clean and excluded tables must be distinct".into(),
            ));
        }
        if self.primary_key.is_empty() {
            return Err(invalid("primary_key must name at least one field".into()));
        }
        if self.barcode_lengths.is_empty() || self.barcode_lengths.contains(&0) {
            return Err(invalid(
                "barcode_lengths must list at least one positive length".into(),
            ));
        }
        for (dataset_type, entry) in &self.dataset_types.0 {
            for name in &entry.rules {
                name.parse::<RuleKind>().map_err(|_| {
                    invalid(format!(
                        "dataset type '{dataset_type}' lists unknown rule '{name}' (supported: {})",
                        RuleKind::supported()
                    ))
                })?;
            }
        }
        Ok(())
    }

    pub fn table(&self, kind: TableKind) -> &str {
        match kind {
            TableKind::Raw => &self.tables.raw,
            TableKind::Clean => &self.tables.clean,
            TableKind::Excluded => &self.tables.excluded,
        }
    }

    pub fn rule_params(&self) -> RuleParams {
        RuleParams {
            primary_key: self.primary_key.clone(),
            barcode_field: self.barcode_field.clone(),
            barcode_lengths: self.barcode_lengths.iter().copied().collect(),
            date_field: self.date_field.clone(),
            hierarchy_columns: self.hierarchy_columns.clone(),
            hierarchy_pattern: self.hierarchy_pattern.clone(),
        }
    }

    /// Canonicalization targets for `schema`.
    ///
    /// Explicit columns are returned as configured (absent ones fail later in the
    /// canonicalizer); otherwise every STRING field matching a pattern is used.
    pub fn target_columns(&self, schema: &Schema) -> Vec<String> {
        if !self.canonical_columns.is_empty() {
            return self.canonical_columns.clone();
        }
        let mut indices = self
            .canonical_column_patterns
            .iter()
            .flat_map(|pattern| schema.indices_matching(pattern))
            .filter(|idx| schema.fields()[*idx].field_type == FieldType::String)
            .collect::<Vec<_>>();
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .map(|idx| schema.fields()[idx].name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "tables:\n  raw: crf_raw\nbarcode_lengths: [8, 13]\ndataset_types:\n  dated:\n    rules: [duplicate_key, date_format]\n"
        )
        .unwrap();
        let config = DatasetConfig::load(file.path()).expect("load config");
        assert_eq!(config.tables.raw, "crf_raw");
        assert_eq!(config.tables.clean, "product_reference_cleaned");
        assert_eq!(config.primary_key, vec!["country_id", "barcode"]);
        assert_eq!(config.rule_params().barcode_lengths.len(), 2);
        assert_eq!(
            config.dataset_types.active_rules("dated").unwrap(),
            &["duplicate_key".to_string(), "date_format".to_string()]
        );
    }

    #[test]
    fn unknown_dataset_type_is_a_configuration_error() {
        let config = DatasetConfig::default();
        let err = config
            .dataset_types
            .active_rules("transactions")
            .expect_err("unknown type");
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains(DEFAULT_DATASET_TYPE));
    }

    #[test]
    fn validate_rejects_unknown_rules_and_shared_tables() {
        let mut config = DatasetConfig::default();
        config.dataset_types = RuleConfig::new(BTreeMap::from([(
            "x".to_string(),
            DatasetRules {
                rules: vec!["spellcheck".into()],
            },
        )]));
        assert!(config.validate().is_err());

        let mut config = DatasetConfig::default();
        config.tables.excluded = config.tables.clean.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn target_columns_follow_patterns_unless_explicit() {
        let schema = Schema::new(vec![
            Field::string("barcode"),
            Field::string("local_brand_name"),
            Field::string("global_brand_name"),
            Field::string("supplier_name"),
            Field::new("brand_id", FieldType::Integer),
        ])
        .unwrap();
        let mut config = DatasetConfig::default();
        assert_eq!(
            config.target_columns(&schema),
            vec!["local_brand_name", "global_brand_name", "supplier_name"]
        );
        config.canonical_columns = vec!["supplier_name".into()];
        assert_eq!(config.target_columns(&schema), vec!["supplier_name"]);
    }

    #[test]
    fn table_kind_parses_known_names_only() {
        assert_eq!("Clean".parse::<TableKind>().unwrap(), TableKind::Clean);
        assert!("staging".parse::<TableKind>().is_err());
    }
}
