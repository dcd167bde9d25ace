//! JSON file persistence for parameters, scenarios and reports.
//!
//! Each collection is one pretty-printed JSON array in `<dir>/<name>.json`.
//! Every operation reads the whole file and writes it back; there is no
//! locking, the last writer wins.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::Parameters;
use crate::error::StoreError;
use crate::model::scenario::Scenario;
use crate::simulate::SimulationReport;

pub type RecordId = u32;

/// Something stored in a named collection and addressed by id.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn id(&self) -> RecordId;
}

impl Record for Parameters {
    const COLLECTION: &'static str = "parameters";

    fn id(&self) -> RecordId {
        Parameters::id(self)
    }
}

impl Record for Scenario {
    const COLLECTION: &'static str = "scenarios";

    fn id(&self) -> RecordId {
        Scenario::id(self)
    }
}

impl Record for SimulationReport {
    const COLLECTION: &'static str = "simulations";

    fn id(&self) -> RecordId {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<JsonStore, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir.display().to_string(), source })?;
        Ok(JsonStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn collection<R: Record>(&self) -> Collection<R> {
        Collection { path: self.dir.join(format!("{}.json", R::COLLECTION)), _record: PhantomData }
    }
}

#[derive(Debug, Clone)]
pub struct Collection<R> {
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Collection<R> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record; a missing file is an empty collection.
    pub fn all(&self) -> Result<Vec<R>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Json { collection: R::COLLECTION.to_string(), source })
    }

    pub fn filter(&self, mut predicate: impl FnMut(&R) -> bool) -> Result<Vec<R>, StoreError> {
        Ok(self.all()?.into_iter().filter(|record| predicate(record)).collect())
    }

    pub fn get(&self, id: RecordId) -> Result<R, StoreError> {
        self.all()?.into_iter().find(|record| record.id() == id).ok_or_else(|| not_found::<R>(id))
    }

    pub fn append(&self, record: R) -> Result<(), StoreError> {
        let mut records = self.all()?;
        records.push(record);
        self.write(&records)
    }

    /// Replaces the first record with the same id.
    pub fn update(&self, record: R) -> Result<(), StoreError> {
        let mut records = self.all()?;
        let id = record.id();
        let slot = records.iter_mut().find(|r| r.id() == id).ok_or_else(|| not_found::<R>(id))?;
        *slot = record;
        self.write(&records)
    }

    /// Removes every record with `id`.
    pub fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        let mut records = self.all()?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(not_found::<R>(id));
        }
        self.write(&records)
    }

    fn write(&self, records: &[R]) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(records)
            .map_err(|source| StoreError::Json { collection: R::COLLECTION.to_string(), source })?;
        fs::write(&self.path, text).map_err(|source| self.io_error(source))?;
        debug!(collection = R::COLLECTION, records = records.len(), "collection written");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io { path: self.path.display().to_string(), source }
    }
}

fn not_found<R: Record>(id: RecordId) -> StoreError {
    StoreError::ItemNotFound { collection: R::COLLECTION.to_string(), field: "id", value: id.to_string() }
}
