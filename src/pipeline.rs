//! Stage orchestration over a [`TableStore`].
//!
//! A full run is `raw → normalize → canonicalize → clean → check → excluded →
//! reconcile → clean`. Every configuration and schema precondition is checked
//! before the run lock is taken, so a misconfigured run never writes anything.
//! Each stage can also be run on its own against whatever the store holds.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    canonical::{CanonicalMapping, FrequencyCanonicalizer},
    config::{DatasetConfig, TableKind},
    data::RecordSet,
    engine::{self, ValidationReport, ValidationRuleEngine},
    error::CleanError,
    normalize::Normalizer,
    reconcile,
    store::{TableStore, WriteMode},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub dataset_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub raw_rows: usize,
    /// Distinct defective rows written to the excluded table.
    pub excluded_rows: usize,
    /// Flagged instances, counting every copy of a duplicated row.
    pub flagged_rows: usize,
    pub accepted_rows: usize,
    pub rule_hits: BTreeMap<String, usize>,
    pub reason_counts: BTreeMap<String, usize>,
    /// Spellings rewritten to another canonical value, per target column.
    pub collapsed_spellings: BTreeMap<String, usize>,
    /// SHA-256 over the accepted rows in sorted order.
    pub accepted_digest: String,
}

pub struct CleaningPipeline<S> {
    store: S,
    config: DatasetConfig,
}

impl<S: TableStore> CleaningPipeline<S> {
    pub fn new(store: S, config: DatasetConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    fn table(&self, kind: TableKind) -> &str {
        self.config.table(kind)
    }

    fn write(&self, kind: TableKind, records: &RecordSet) -> Result<()> {
        let table = self.table(kind);
        self.store
            .write(table, records, WriteMode::Overwrite)
            .with_context(|| format!("Writing {kind} table '{table}'"))
    }

    fn scan(&self, kind: TableKind) -> Result<RecordSet> {
        let table = self.table(kind);
        self.store
            .scan(table)
            .with_context(|| format!("Scanning {kind} table '{table}'"))
    }

    /// Runs every stage in order for `dataset_type`.
    pub fn run(&self, dataset_type: &str) -> Result<PipelineSummary> {
        let started_at = Utc::now();
        self.config.validate()?;
        let active = self.config.dataset_types.active_rules(dataset_type)?;
        let raw_table = self.table(TableKind::Raw);
        let raw_schema = self
            .store
            .get_schema(raw_table)
            .with_context(|| format!("Reading schema of raw table '{raw_table}'"))?;

        let rules =
            ValidationRuleEngine::new(self.config.rule_params()).prepare(active, &raw_schema)?;
        let canonicalizer = FrequencyCanonicalizer::new(self.config.target_columns(&raw_schema));
        canonicalizer.resolve_targets(&raw_schema)?;
        engine::excluded_schema(&raw_schema)?;
        debug!(
            "Preflight passed: rules [{}], canonical columns [{}]",
            active.iter().join(", "),
            canonicalizer.target_columns().iter().join(", ")
        );

        let run_id = Uuid::new_v4();
        let _lock = self.store.lock(run_id).context("Acquiring run lock")?;
        info!("Run {run_id} started for dataset type '{dataset_type}'");

        let raw = self.scan(TableKind::Raw)?;
        if raw.schema() != &raw_schema {
            return Err(CleanError::mismatch(format!(
                "raw table '{raw_table}' changed schema during the run"
            ))
            .into());
        }
        let normalized = Normalizer::from_schema(raw.schema())
            .normalize(&raw)
            .context("Normalizing raw records")?;
        self.write(TableKind::Clean, &normalized)?;

        let (clean, mappings) = canonicalizer
            .canonicalize(&normalized)
            .context("Canonicalizing target columns")?;
        self.write(TableKind::Clean, &clean)?;

        let report = engine::evaluate_rules(&rules, &clean);
        self.write(TableKind::Excluded, &report.excluded_records()?)?;

        let accepted = reconcile::reconcile(&clean, &report.defects, self.config.reconcile_mode)?;
        self.write(TableKind::Clean, &accepted)?;

        let summary = PipelineSummary {
            run_id,
            dataset_type: dataset_type.to_string(),
            started_at,
            finished_at: Utc::now(),
            raw_rows: raw.len(),
            excluded_rows: report.defects.len(),
            flagged_rows: report.flagged_rows(),
            accepted_rows: accepted.len(),
            rule_hits: report.rule_hits.clone(),
            reason_counts: report.reason_counts(),
            collapsed_spellings: collapsed_spellings(&mappings),
            accepted_digest: digest(&accepted),
        };
        info!(
            "Run {run_id} finished: {} raw, {} accepted, {} excluded ({})",
            summary.raw_rows,
            summary.accepted_rows,
            summary.excluded_rows,
            summary
                .reason_counts
                .iter()
                .map(|(reason, count)| format!("{reason}={count}"))
                .join(", ")
        );
        Ok(summary)
    }

    /// Normalizes the raw table into the clean table.
    pub fn normalize(&self) -> Result<RecordSet> {
        let _lock = self.store.lock(Uuid::new_v4()).context("Acquiring run lock")?;
        let raw = self.scan(TableKind::Raw)?;
        let normalized = Normalizer::from_schema(raw.schema())
            .normalize(&raw)
            .context("Normalizing raw records")?;
        self.write(TableKind::Clean, &normalized)?;
        Ok(normalized)
    }

    /// Canonicalizes the target columns of the clean table in place.
    pub fn standardize(&self) -> Result<BTreeMap<String, CanonicalMapping>> {
        let clean_table = self.table(TableKind::Clean);
        let schema = self
            .store
            .get_schema(clean_table)
            .with_context(|| format!("Reading schema of clean table '{clean_table}'"))?;
        let canonicalizer = FrequencyCanonicalizer::new(self.config.target_columns(&schema));
        canonicalizer.resolve_targets(&schema)?;

        let _lock = self.store.lock(Uuid::new_v4()).context("Acquiring run lock")?;
        let clean = self.scan(TableKind::Clean)?;
        let (rewritten, mappings) = canonicalizer
            .canonicalize(&clean)
            .context("Canonicalizing target columns")?;
        self.write(TableKind::Clean, &rewritten)?;
        Ok(mappings)
    }

    /// Evaluates the dataset type's rules over the clean table into the excluded table.
    pub fn check(&self, dataset_type: &str) -> Result<ValidationReport> {
        self.config.validate()?;
        let active = self.config.dataset_types.active_rules(dataset_type)?;
        let clean_table = self.table(TableKind::Clean);
        let schema = self
            .store
            .get_schema(clean_table)
            .with_context(|| format!("Reading schema of clean table '{clean_table}'"))?;
        let rules = ValidationRuleEngine::new(self.config.rule_params()).prepare(active, &schema)?;
        engine::excluded_schema(&schema)?;

        let _lock = self.store.lock(Uuid::new_v4()).context("Acquiring run lock")?;
        let clean = self.scan(TableKind::Clean)?;
        let report = engine::evaluate_rules(&rules, &clean);
        self.write(TableKind::Excluded, &report.excluded_records()?)?;
        Ok(report)
    }

    /// Replaces the clean table with the rows not present in the excluded table.
    pub fn reconcile(&self) -> Result<RecordSet> {
        let _lock = self.store.lock(Uuid::new_v4()).context("Acquiring run lock")?;
        let clean = self.scan(TableKind::Clean)?;
        let excluded = self.scan(TableKind::Excluded)?;
        let (base, defects) =
            engine::defects_from_table(&excluded).context("Decoding the excluded table")?;
        if &base != clean.schema() {
            return Err(CleanError::mismatch(format!(
                "excluded table fields [{}] do not match clean table fields [{}]",
                base.names().join(", "),
                clean.schema().names().join(", ")
            ))
            .into());
        }
        let accepted = reconcile::reconcile(&clean, &defects, self.config.reconcile_mode)?;
        self.write(TableKind::Clean, &accepted)?;
        Ok(accepted)
    }
}

fn collapsed_spellings(mappings: &BTreeMap<String, CanonicalMapping>) -> BTreeMap<String, usize> {
    mappings
        .iter()
        .map(|(column, mapping)| (column.clone(), mapping.collapsed_spellings()))
        .collect()
}

/// Order-independent SHA-256 of a record set's field names and rows.
pub fn digest(records: &RecordSet) -> String {
    let mut hasher = Sha256::new();
    for name in records.schema().names() {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1e]);
    for record in records.sorted_records() {
        for value in record.values() {
            match value {
                Some(value) => {
                    hasher.update([1]);
                    hasher.update(value.encode().as_bytes());
                }
                None => hasher.update([0]),
            }
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Record,
        error::ErrorKind,
        schema::{Field, Schema},
        store::MemoryStore,
    };

    fn raw_set(rows: &[&[&str]]) -> RecordSet {
        let schema = Schema::new(vec![
            Field::string("country_id"),
            Field::string("barcode"),
            Field::string("brand"),
        ])
        .unwrap();
        RecordSet::new(schema, rows.iter().map(|r| Record::from_strs(r)).collect()).unwrap()
    }

    fn pipeline(rows: &[&[&str]]) -> CleaningPipeline<MemoryStore> {
        let config = DatasetConfig::default();
        let store = MemoryStore::new().with_table(&config.tables.raw, raw_set(rows));
        CleaningPipeline::new(store, config)
    }

    #[test]
    fn full_run_splits_accepted_and_excluded() {
        let pipeline = pipeline(&[
            &["FR", "12345678", "Coca-Cola"],
            &["fr", "12345678", "Fanta"],
            &["FR", "1234567890", "coca cola"],
            &["FR", "123", "Pepsi"],
        ]);
        let summary = pipeline.run("product_reference").unwrap();
        assert_eq!(summary.raw_rows, 4);
        assert_eq!(summary.accepted_rows, 2);
        assert_eq!(summary.excluded_rows, 2);
        assert_eq!(summary.reason_counts["primary_key_duplicate"], 1);
        assert_eq!(summary.reason_counts["wrong_barcode_length"], 1);
        assert_eq!(summary.collapsed_spellings["brand"], 1);

        let clean = pipeline.store().scan("product_reference_cleaned").unwrap();
        let excluded = pipeline.store().scan("product_reference_excluded").unwrap();
        assert_eq!(clean.len(), 2);
        assert_eq!(excluded.len(), 2);
        assert_eq!(summary.accepted_digest, digest(&clean));
    }

    #[test]
    fn unknown_dataset_type_writes_nothing() {
        let pipeline = pipeline(&[&["FR", "12345678", "X"]]);
        let err = pipeline.run("transactions").expect_err("unknown type");
        let clean_err = err.downcast_ref::<CleanError>().expect("typed error");
        assert_eq!(clean_err.kind(), ErrorKind::Configuration);
        assert_eq!(pipeline.store().table_names(), vec!["product_reference"]);
    }

    #[test]
    fn stages_can_run_one_at_a_time() {
        let pipeline = pipeline(&[
            &["FR", "12345678", "nike"],
            &["FR", "12345678", "NIKE"],
            &["FR", "87654321", "Adidas"],
        ]);
        let normalized = pipeline.normalize().unwrap();
        assert_eq!(normalized.len(), 3);
        pipeline.standardize().unwrap();
        let report = pipeline.check("product_reference").unwrap();
        assert_eq!(report.defects.len(), 1);
        let accepted = pipeline.reconcile().unwrap();
        assert_eq!(accepted.len(), 1);
        let again = pipeline.reconcile().unwrap();
        assert_eq!(digest(&accepted), digest(&again));
    }

    #[test]
    fn digest_ignores_row_order() {
        let a = raw_set(&[&["FR", "1", "A"], &["DE", "2", "B"]]);
        let b = raw_set(&[&["DE", "2", "B"], &["FR", "1", "A"]]);
        let c = raw_set(&[&["DE", "2", "B"]]);
        assert_eq!(digest(&a), digest(&b));
        assert_ne!(digest(&a), digest(&c));
    }
}
