//! Tabular store collaborators.
//!
//! The engine talks to storage only through [`TableStore`]: fetch a schema, scan
//! a whole table, overwrite a whole table, and take the run lock. Two
//! implementations ship with the crate: [`MemoryStore`] for embedding and tests,
//! and [`CsvStore`], a directory of `<table>.csv` files with
//! `<table>.schema.yaml` sidecars.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    data::{Record, RecordSet, parse_typed_value},
    error::{CleanError, Result},
    io_utils,
    schema::Schema,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Atomically replace the previous contents.
    #[default]
    Overwrite,
}

pub trait TableStore {
    fn get_schema(&self, table: &str) -> Result<Schema>;

    fn scan(&self, table: &str) -> Result<RecordSet>;

    /// Replaces `table` with `records`. On failure the previous contents remain.
    fn write(&self, table: &str, records: &RecordSet, mode: WriteMode) -> Result<()>;

    /// Takes the exclusive run lock; dropped guards release it.
    fn lock(&self, run_id: Uuid) -> Result<RunLock>;
}

/// Exclusive right to overwrite the store's destination tables.
pub struct RunLock {
    run_id: Uuid,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunLock {
    fn new(run_id: Uuid, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            run_id,
            release: Some(Box::new(release)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("run_id", &self.run_id).finish()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!("Released run lock {}", self.run_id);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, RecordSet>>,
    locked: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, records: RecordSet) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(table.to_string(), records);
        }
        self
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self, table: &str) -> Result<RecordSet> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| CleanError::store(table, "memory store mutex poisoned"))?;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| CleanError::store(table, format!("table '{table}' does not exist")))
    }
}

impl TableStore for MemoryStore {
    fn get_schema(&self, table: &str) -> Result<Schema> {
        Ok(self.read(table)?.schema().clone())
    }

    fn scan(&self, table: &str) -> Result<RecordSet> {
        self.read(table)
    }

    fn write(&self, table: &str, records: &RecordSet, _mode: WriteMode) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| CleanError::store(table, "memory store mutex poisoned"))?;
        tables.insert(table.to_string(), records.clone());
        Ok(())
    }

    fn lock(&self, run_id: Uuid) -> Result<RunLock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CleanError::Locked {
                holder: "another in-process run".into(),
            });
        }
        let flag = Arc::clone(&self.locked);
        Ok(RunLock::new(run_id, move || flag.store(false, Ordering::Release)))
    }
}

const LOCK_FILE: &str = ".refclean.lock";

#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
    delimiter: u8,
    encoding: &'static Encoding,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            delimiter: io_utils::DEFAULT_DELIMITER,
            encoding: UTF_8,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Removes a lock left behind by a run that never released it, returning the
    /// run id it held. Only call this when no other run can be active.
    pub fn break_lock(&self) -> Result<Option<String>> {
        let path = self.lock_path();
        let holder = match fs::read_to_string(&path) {
            Ok(holder) => holder.trim().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CleanError::store(LOCK_FILE, err)),
        };
        fs::remove_file(&path).map_err(|err| CleanError::store(LOCK_FILE, err))?;
        warn!("Removed stale run lock held by {holder}");
        Ok(Some(holder))
    }

    pub fn data_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.csv"))
    }

    pub fn schema_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.schema.yaml"))
    }

    fn read_headers(&self, table: &str) -> anyhow::Result<Vec<String>> {
        let path = self.data_path(table);
        let mut reader = io_utils::open_csv_reader(&path, self.delimiter)?;
        io_utils::reader_headers(&mut reader, self.encoding)
    }

    fn scan_rows(&self, table: &str, schema: &Schema) -> Result<Vec<Record>> {
        let path = self.data_path(table);
        let mut reader = io_utils::open_csv_reader(&path, self.delimiter)
            .map_err(|err| CleanError::store(table, err))?;
        let headers = io_utils::reader_headers(&mut reader, self.encoding)
            .map_err(|err| CleanError::store(table, err))?;
        schema.validate_headers(&headers)?;

        let mut rows = Vec::new();
        for (row_idx, record) in reader.byte_records().enumerate() {
            let record = record
                .with_context(|| format!("Reading row {} of {path:?}", row_idx + 2))
                .map_err(|err| CleanError::store(table, err))?;
            let cells = io_utils::decode_record(&record, self.encoding)
                .map_err(|err| CleanError::store(table, err))?;
            let mut values = Vec::with_capacity(cells.len());
            for (field, cell) in schema.fields().iter().zip(&cells) {
                let value = parse_typed_value(cell, field.field_type).map_err(|err| {
                    CleanError::mismatch(format!(
                        "table '{table}' row {} field '{}': {err}",
                        row_idx + 2,
                        field.name
                    ))
                })?;
                values.push(value);
            }
            rows.push(Record::new(values));
        }
        Ok(rows)
    }

    /// Installs the data file with one rename. A changed schema is installed
    /// first and rolled back from a saved copy when the data rename fails.
    fn write_files(&self, table: &str, records: &RecordSet, token: Uuid) -> anyhow::Result<()> {
        let data_tmp = self.root.join(format!(".{table}.csv.{token}.tmp"));
        let schema_tmp = self.root.join(format!(".{table}.schema.yaml.{token}.tmp"));
        let schema_backup = self.root.join(format!(".{table}.schema.yaml.{token}.bak"));
        let outcome = (|| -> anyhow::Result<()> {
            let data_path = self.data_path(table);
            let schema_path = self.schema_path(table);
            let file = File::create(&data_tmp)
                .with_context(|| format!("Creating temporary table file {data_tmp:?}"))?;
            let mut writer = BufWriter::new(file);
            io_utils::write_csv(
                &mut writer,
                &records.schema().names(),
                records.iter().map(Record::encode),
                self.delimiter,
                self.encoding,
            )?;
            writer
                .into_inner()
                .map_err(|err| anyhow::anyhow!("Flushing {data_tmp:?}: {}", err.error()))?
                .sync_all()
                .with_context(|| format!("Syncing {data_tmp:?}"))?;

            let had_sidecar = schema_path.exists();
            let unchanged = had_sidecar
                && Schema::load(&schema_path).is_ok_and(|current| &current == records.schema());
            if unchanged {
                return fs::rename(&data_tmp, &data_path)
                    .with_context(|| format!("Installing data for '{table}'"));
            }

            records.schema().save(&schema_tmp)?;
            if had_sidecar {
                fs::copy(&schema_path, &schema_backup)
                    .with_context(|| format!("Saving previous schema of '{table}'"))?;
            }
            fs::rename(&schema_tmp, &schema_path)
                .with_context(|| format!("Installing schema for '{table}'"))?;
            if let Err(err) = fs::rename(&data_tmp, &data_path) {
                let restored = if had_sidecar {
                    fs::rename(&schema_backup, &schema_path)
                } else {
                    fs::remove_file(&schema_path)
                };
                if let Err(restore_err) = restored {
                    warn!("Could not restore schema sidecar {schema_path:?}: {restore_err}");
                }
                return Err(anyhow::Error::new(err)
                    .context(format!("Installing data for '{table}'")));
            }
            Ok(())
        })();
        for leftover in [&data_tmp, &schema_tmp, &schema_backup] {
            if leftover.exists() && fs::remove_file(leftover).is_err() {
                warn!("Could not remove temporary file {leftover:?}");
            }
        }
        outcome
    }
}

impl TableStore for CsvStore {
    /// Loads the schema sidecar; a table without one is read as all-STRING.
    fn get_schema(&self, table: &str) -> Result<Schema> {
        let schema_path = self.schema_path(table);
        if schema_path.exists() {
            return Schema::load(&schema_path).map_err(|err| CleanError::store(table, err));
        }
        let headers = self
            .read_headers(table)
            .map_err(|err| CleanError::store(table, err))?;
        debug!("No schema sidecar for '{table}', typing {} column(s) as STRING", headers.len());
        Schema::from_headers(&headers)
    }

    fn scan(&self, table: &str) -> Result<RecordSet> {
        let schema = self.get_schema(table)?;
        let rows = self.scan_rows(table, &schema)?;
        debug!("Scanned {} row(s) from '{table}'", rows.len());
        RecordSet::new(schema, rows)
    }

    fn write(&self, table: &str, records: &RecordSet, _mode: WriteMode) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|err| CleanError::store(table, err))?;
        self.write_files(table, records, Uuid::new_v4())
            .map_err(|err| CleanError::store(table, err))?;
        info!("Wrote {} row(s) to '{table}'", records.len());
        Ok(())
    }

    fn lock(&self, run_id: Uuid) -> Result<RunLock> {
        let path = self.lock_path();
        fs::create_dir_all(&self.root).map_err(|err| CleanError::store(LOCK_FILE, err))?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".into());
                return Err(CleanError::Locked { holder });
            }
            Err(err) => return Err(CleanError::store(LOCK_FILE, err)),
        };
        if let Err(err) = file.write_all(run_id.to_string().as_bytes()) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!("Could not remove lock file {path:?}: {remove_err}");
            }
            return Err(CleanError::store(LOCK_FILE, err));
        }
        debug!("Acquired run lock {run_id} at {path:?}");
        Ok(RunLock::new(run_id, move || {
            if let Err(err) = fs::remove_file(&path) {
                warn!("Could not remove lock file {path:?}: {err}");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        schema::{Field, FieldType},
    };
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn dated_set() -> RecordSet {
        let schema = Schema::new(vec![
            Field::string("barcode"),
            Field::new("creation_date", FieldType::Date),
            Field::new("units", FieldType::Integer),
        ])
        .unwrap();
        RecordSet::new(
            schema,
            vec![
                Record::new(vec![
                    Some(Value::from("12345678")),
                    Some(Value::Date(NaiveDate::from_ymd_opt(2020, 5, 1).unwrap())),
                    Some(Value::Integer(3)),
                ]),
                Record::new(vec![Some(Value::from("say \"hi\", ok")), None, None]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn csv_store_round_trips_typed_tables() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        let set = dated_set();
        store.write("products", &set, WriteMode::Overwrite).unwrap();
        assert_eq!(store.get_schema("products").unwrap(), *set.schema());
        assert_eq!(store.scan("products").unwrap(), set);

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn csv_store_without_sidecar_reads_strings() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("raw.csv"), "barcode,brand\n123,nike\n").unwrap();
        let store = CsvStore::new(dir.path());
        let set = store.scan("raw").unwrap();
        assert_eq!(set.schema().names(), vec!["barcode", "brand"]);
        assert_eq!(set.records()[0], Record::from_strs(&["123", "nike"]));
    }

    #[test]
    fn csv_store_reports_unparseable_cells() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        let schema = Schema::new(vec![Field::new("units", FieldType::Integer)]).unwrap();
        schema.save(&store.schema_path("bad")).unwrap();
        fs::write(store.data_path("bad"), "units\nabc\n").unwrap();
        let err = store.scan("bad").expect_err("bad integer");
        assert_eq!(err.kind(), crate::error::ErrorKind::SchemaMismatch);
    }

    #[test]
    fn second_lock_is_refused_until_release() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        let first = Uuid::new_v4();
        let guard = store.lock(first).unwrap();
        match store.lock(Uuid::new_v4()) {
            Err(CleanError::Locked { holder }) => assert_eq!(holder, first.to_string()),
            other => panic!("expected lock conflict, got {other:?}"),
        }
        drop(guard);
        assert!(store.lock(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn memory_store_lock_is_exclusive() {
        let store = MemoryStore::new();
        let guard = store.lock(Uuid::new_v4()).unwrap();
        assert!(store.lock(Uuid::new_v4()).is_err());
        drop(guard);
        assert!(store.lock(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn csv_store_keeps_sub_second_datetimes_distinct() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        let schema = Schema::new(vec![
            Field::string("barcode"),
            Field::new("seen_at", FieldType::DateTime),
        ])
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let rows = [100, 200]
            .into_iter()
            .map(|millis| {
                Record::new(vec![
                    Some(Value::from("12345678")),
                    Some(Value::DateTime(day.and_hms_milli_opt(10, 0, 0, millis).unwrap())),
                ])
            })
            .collect();
        let set = RecordSet::new(schema, rows).unwrap();
        store.write("events", &set, WriteMode::Overwrite).unwrap();

        let text = fs::read_to_string(store.data_path("events")).unwrap();
        assert!(text.contains("2020-01-01 10:00:00.100"));
        let scanned = store.scan("events").unwrap();
        assert_eq!(scanned, set);
        assert_ne!(scanned.records()[0], scanned.records()[1]);
    }

    #[test]
    fn failed_data_install_keeps_previous_schema() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        let narrow = RecordSet::new(
            Schema::new(vec![Field::string("a")]).unwrap(),
            vec![Record::from_strs(&["x"])],
        )
        .unwrap();
        let wide = RecordSet::new(
            Schema::new(vec![Field::string("a"), Field::string("b")]).unwrap(),
            vec![Record::from_strs(&["x", "y"])],
        )
        .unwrap();
        store.write("t", &narrow, WriteMode::Overwrite).unwrap();

        // A non-empty directory in place of the data file makes the rename fail.
        fs::remove_file(store.data_path("t")).unwrap();
        fs::create_dir(store.data_path("t")).unwrap();
        fs::write(store.data_path("t").join("occupied"), "x").unwrap();
        let err = store
            .write("t", &wide, WriteMode::Overwrite)
            .expect_err("data path is a directory");
        assert!(err.is_retryable());
        assert_eq!(Schema::load(&store.schema_path("t")).unwrap(), *narrow.schema());
        assert!(store.data_path("t").join("occupied").exists());

        fs::create_dir(store.data_path("u")).unwrap();
        fs::write(store.data_path("u").join("occupied"), "x").unwrap();
        assert!(store.write("u", &wide, WriteMode::Overwrite).is_err());
        assert!(!store.schema_path("u").exists());

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.ends_with(".tmp") || name.ends_with(".bak")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn stale_lock_can_be_broken() {
        let dir = tempdir().expect("temp dir");
        let store = CsvStore::new(dir.path());
        assert_eq!(store.break_lock().unwrap(), None);

        fs::write(store.lock_path(), "crashed-run\n").unwrap();
        assert!(matches!(
            store.lock(Uuid::new_v4()),
            Err(CleanError::Locked { .. })
        ));
        assert_eq!(store.break_lock().unwrap().as_deref(), Some("crashed-run"));
        assert!(!store.lock_path().exists());
        assert!(store.lock(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn missing_table_is_a_store_error() {
        let store = MemoryStore::new();
        let err = store.scan("nope").expect_err("missing");
        assert!(err.is_retryable());
    }
}
