//! File-backed test case store.
//!
//! One JSON document per test case under the configured directory, named
//! `tc_NNN.json` with a zero-padded, monotonically increasing numeric
//! suffix. Ids are never reused, even after deletions. A `backups/`
//! subdirectory holds pre-mutation snapshots named `tc_NNN_backup.json`.
//!
//! Every write validates against the schema first; the store never holds a
//! document with missing required fields or out-of-enum values.

use crate::error::{Result, StoreError};
use crate::schema::{strip_transient_fields, SchemaValidator, TestCase};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

const ID_PREFIX: &str = "tc_";
const BACKUP_DIR: &str = "backups";
const BACKUP_SUFFIX: &str = "_backup";

/// Outcome of validating the whole store against the schema.
#[derive(Debug, Default)]
pub struct StoreValidation {
    pub total: usize,
    pub valid: usize,
    /// (id, first validation error) per invalid document.
    pub invalid: Vec<(String, String)>,
}

pub struct TestCaseStore {
    dir: PathBuf,
    validator: Arc<SchemaValidator>,
}

impl TestCaseStore {
    pub fn new(dir: impl Into<PathBuf>, validator: Arc<SchemaValidator>) -> Self {
        Self {
            dir: dir.into(),
            validator,
        }
    }

    /// Sorted ids of every document currently in the store.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Read {
            path: self.dir.clone(),
            source: e,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                if id.starts_with(ID_PREFIX) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load the full corpus. Unparseable documents are skipped with a
    /// warning so one corrupt file cannot block a run; a missing directory
    /// is still fatal (nothing to work on).
    pub fn load_all(&self) -> Result<Vec<TestCase>> {
        let mut cases = Vec::new();
        for id in self.list_ids()? {
            match self.load(&id) {
                Ok(case) => cases.push(case),
                Err(err) => eprintln!("  Warning: skipping {id}: {err}"),
            }
        }
        Ok(cases)
    }

    /// Load one document by id.
    pub fn load(&self, id: &str) -> Result<TestCase> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::Read {
            path: path.clone(),
            source: e,
        })?;
        let mut case: TestCase =
            serde_json::from_str(&raw).map_err(|e| StoreError::Malformed { path, source: e })?;
        case.id = id.to_string();
        Ok(case)
    }

    /// Persist a document under an explicit id, validating first.
    pub fn save(&self, id: &str, case: &TestCase) -> Result<PathBuf> {
        let mut value = serde_json::to_value(case).map_err(|e| StoreError::Invalid {
            id: id.to_string(),
            detail: e.to_string(),
        })?;
        strip_transient_fields(&mut value);
        self.validator
            .validate(&value)
            .map_err(|detail| StoreError::Invalid {
                id: id.to_string(),
                detail,
            })?;

        let path = self.path_for(id);
        let body = serde_json::to_string_pretty(&value).map_err(|e| StoreError::Invalid {
            id: id.to_string(),
            detail: e.to_string(),
        })?;
        fs::write(&path, body).map_err(|e| StoreError::Write {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Allocate the next id and persist a new document under it.
    pub fn create(&self, case: &TestCase) -> Result<String> {
        let id = self.next_id()?;
        self.save(&id, case)?;
        Ok(id)
    }

    /// Next unused id: max existing numeric suffix + 1. Gaps from deleted
    /// documents are never refilled.
    pub fn next_id(&self) -> Result<String> {
        let mut max = 0u32;
        for id in self.list_ids()? {
            if let Some(n) = id
                .strip_prefix(ID_PREFIX)
                .and_then(|s| s.parse::<u32>().ok())
            {
                max = max.max(n);
            }
        }
        Ok(format!("{}{:03}", ID_PREFIX, max + 1))
    }

    /// Snapshot a document into `backups/` before mutation. Overwrites any
    /// previous backup of the same id (the snapshot is pre-*this*-run).
    pub fn backup(&self, id: &str) -> Result<PathBuf> {
        let original = self.path_for(id);
        if !original.exists() {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        let backup_dir = self.dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir).map_err(|e| StoreError::Write {
            path: backup_dir.clone(),
            source: e,
        })?;
        let backup_path = backup_dir.join(format!("{id}{BACKUP_SUFFIX}.json"));
        fs::copy(&original, &backup_path).map_err(|e| StoreError::Write {
            path: backup_path.clone(),
            source: e,
        })?;
        Ok(backup_path)
    }

    /// Validate every document against the schema without modifying anything.
    pub fn validate_all(&self) -> Result<StoreValidation> {
        let mut report = StoreValidation::default();
        for id in self.list_ids()? {
            report.total += 1;
            match self.raw_document(&id) {
                Ok(mut value) => {
                    strip_transient_fields(&mut value);
                    match self.validator.validate(&value) {
                        Ok(()) => report.valid += 1,
                        Err(detail) => report.invalid.push((id, detail)),
                    }
                }
                Err(err) => report.invalid.push((id, err.to_string())),
            }
        }
        Ok(report)
    }

    fn raw_document(&self, id: &str) -> Result<Value> {
        let path = self.path_for(id);
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::Read {
            path: path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&raw).map_err(|e| StoreError::Malformed { path, source: e })?)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}
