//! The object store collaborator: key-value blob storage for job-scoped
//! staging data.
//!
//! Keys are `"<kind>_<job_id>"` for the seven job-scoped kinds, plus the
//! shared land/water mask under a fixed key. The `state` value is one of
//! exactly the two literal strings `"ready"` / `"done"` (a boolean
//! encoded as text, kept for wire compatibility).

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

/// Shared mask blob, not job-scoped.
pub const MASK_KEY: &str = "is_water.json";

/// State-marker literal written at fetch time.
pub const STATE_READY: &str = "ready";

/// State-marker literal written by the compute side when results are
/// stored.
pub const STATE_DONE: &str = "done";

/// The seven job-scoped blob kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Job,
    Context,
    State,
    Results,
    Dsar,
    Dsir,
    Dsfr,
}

impl BlobKind {
    pub const ALL: [BlobKind; 7] = [
        BlobKind::Job,
        BlobKind::Context,
        BlobKind::State,
        BlobKind::Results,
        BlobKind::Dsar,
        BlobKind::Dsir,
        BlobKind::Dsfr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Job => "job",
            BlobKind::Context => "context",
            BlobKind::State => "state",
            BlobKind::Results => "results",
            BlobKind::Dsar => "dsar",
            BlobKind::Dsir => "dsir",
            BlobKind::Dsfr => "dsfr",
        }
    }

    /// Object-store key for this kind, scoped to one job.
    pub fn key(self, job_id: Uuid) -> String {
        format!("{}_{}", self.as_str(), job_id.simple())
    }
}

/// Blob storage contract. Transport (cloud bucket, tunnel, credentials)
/// is out of scope; only these three operations and the key scheme are.
pub trait ObjectStore {
    /// `Ok(None)` when the key is absent; `Err` only on operation
    /// failure.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Fetch and decode a JSON blob that must exist.
pub fn get_json<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<T> {
    let raw = store
        .get(key)?
        .ok_or_else(|| Error::Storage(format!("missing object '{key}'")))?;
    serde_json::from_str(&raw).map_err(|err| Error::Storage(format!("bad object '{key}': {err}")))
}

/// Encode and store a JSON blob.
pub fn put_json<T: Serialize>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<()> {
    store.put(key, &serde_json::to_string(value)?)
}

/// One file per key under a root directory. Stands in for the remote
/// bucket; same data contract.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Storage(format!("read '{key}': {err}"))),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|err| Error::Storage(format!("create store root: {err}")))?;
        fs::write(self.path(key), value)
            .map_err(|err| Error::Storage(format!("write '{key}': {err}")))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Storage(format!("delete '{key}': {err}"))),
        }
    }
}
