//! The shared-database collaborator: cluster state, per-model config,
//! and the four linked result collections (job, DSAR, DSIR, DSFR).
//!
//! Cluster-state saves are compare-and-swap on the document's `version`
//! counter: a save succeeds only if the stored version still matches the
//! one that was read. This replaces the reference design's blind
//! whole-document save, whose lost-update race is otherwise documented
//! rather than fixed.

use crate::error::{Error, Result};
use crate::records::{
    AggregateResult, ClusterState, JobRecord, ModelConfig, ModelState, ObservationRecord,
    SpatialContext, UpstreamAggregate,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

pub trait Database {
    /// The state document for one (instance, model) pair, if registered.
    fn cluster_state(&self, instance: &str, model: &str) -> Result<Option<ClusterState>>;

    /// Compare-and-swap save keyed on `state.version`. Returns `false`
    /// when the stored document moved on since it was read (a lost
    /// claim race), `Err` only on operation failure.
    fn save_cluster_state(&self, state: &ClusterState) -> Result<bool>;

    fn model_config(&self, model: &str) -> Result<ModelConfig>;

    /// The shared simulation spatial bounds (resolutions come from the
    /// per-model config).
    fn spatial_context(&self) -> Result<SpatialContext>;

    fn model_state(&self, model: &str) -> Result<ModelState>;

    fn save_model_state(&self, state: &ModelState) -> Result<()>;

    fn job(&self, id: Uuid) -> Result<Option<JobRecord>>;

    fn save_job(&self, job: &JobRecord) -> Result<()>;

    fn upstream_aggregate(&self, id: Uuid) -> Result<Option<UpstreamAggregate>>;

    fn intermediate(&self, id: Uuid) -> Result<Option<AggregateResult>>;

    fn insert_aggregate(&self, aggregate: &AggregateResult) -> Result<()>;

    /// All leaf records whose `parent` is the given intermediate.
    fn leaf_records(&self, parent: Uuid) -> Result<Vec<ObservationRecord>>;

    fn insert_leaf_records(&self, records: &[ObservationRecord]) -> Result<()>;
}

/// Shape of the shared config document (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigDoc {
    simulation_context: SimulationContext,
    model: std::collections::BTreeMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimulationContext {
    spatial: SpatialContext,
}

/// One JSON file per collection under a root directory. Stands in for
/// the remote database; same data contracts. Whole-file read-modify-
/// write, single worker per root.
#[derive(Debug, Clone)]
pub struct JsonDb {
    root: PathBuf,
}

impl JsonDb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonDb { root: root.into() }
    }

    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        match fs::read_to_string(self.root.join(file)) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| Error::Storage(format!("bad collection '{file}': {err}"))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(Error::Storage(format!("read collection '{file}': {err}"))),
        }
    }

    fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|err| Error::Storage(format!("create db root: {err}")))?;
        fs::write(self.root.join(file), serde_json::to_string_pretty(value)?)
            .map_err(|err| Error::Storage(format!("write collection '{file}': {err}")))
    }

    fn config(&self) -> Result<ConfigDoc> {
        match fs::read_to_string(self.root.join("config.json")) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| Error::Storage(format!("bad collection 'config.json': {err}"))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(Error::Config("config.json not found in database root".into()))
            }
            Err(err) => Err(Error::Storage(format!("read config.json: {err}"))),
        }
    }
}

impl Database for JsonDb {
    fn cluster_state(&self, instance: &str, model: &str) -> Result<Option<ClusterState>> {
        let all: Vec<ClusterState> = self.read("cluster_state.json")?;
        Ok(all
            .into_iter()
            .find(|s| s.instance == instance && s.model_type == model))
    }

    fn save_cluster_state(&self, state: &ClusterState) -> Result<bool> {
        let mut all: Vec<ClusterState> = self.read("cluster_state.json")?;
        let slot = all
            .iter_mut()
            .find(|s| s.instance == state.instance && s.model_type == state.model_type);
        match slot {
            Some(existing) => {
                if existing.version != state.version {
                    return Ok(false);
                }
                *existing = state.clone();
                existing.version += 1;
            }
            None => {
                let mut fresh = state.clone();
                fresh.version += 1;
                all.push(fresh);
            }
        }
        self.write("cluster_state.json", &all)?;
        Ok(true)
    }

    fn model_config(&self, model: &str) -> Result<ModelConfig> {
        self.config()?
            .model
            .get(model)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no config entry for model '{model}'")))
    }

    fn spatial_context(&self) -> Result<SpatialContext> {
        Ok(self.config()?.simulation_context.spatial)
    }

    fn model_state(&self, model: &str) -> Result<ModelState> {
        let all: Vec<ModelState> = self.read("model_state.json")?;
        all.into_iter()
            .find(|s| s.model_type == model)
            .ok_or_else(|| Error::Config(format!("no state entry for model '{model}'")))
    }

    fn save_model_state(&self, state: &ModelState) -> Result<()> {
        let mut all: Vec<ModelState> = self.read("model_state.json")?;
        match all.iter_mut().find(|s| s.model_type == state.model_type) {
            Some(existing) => *existing = state.clone(),
            None => all.push(state.clone()),
        }
        self.write("model_state.json", &all)
    }

    fn job(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let all: Vec<JobRecord> = self.read("jobs.json")?;
        Ok(all.into_iter().find(|j| j.id == id))
    }

    fn save_job(&self, job: &JobRecord) -> Result<()> {
        let mut all: Vec<JobRecord> = self.read("jobs.json")?;
        match all.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => all.push(job.clone()),
        }
        self.write("jobs.json", &all)
    }

    fn upstream_aggregate(&self, id: Uuid) -> Result<Option<UpstreamAggregate>> {
        let all: Vec<UpstreamAggregate> = self.read("dsar.json")?;
        Ok(all.into_iter().find(|a| a.id == id))
    }

    fn intermediate(&self, id: Uuid) -> Result<Option<AggregateResult>> {
        let all: Vec<AggregateResult> = self.read("dsir.json")?;
        Ok(all.into_iter().find(|a| a.id == id))
    }

    fn insert_aggregate(&self, aggregate: &AggregateResult) -> Result<()> {
        let mut all: Vec<AggregateResult> = self.read("dsir.json")?;
        all.push(aggregate.clone());
        self.write("dsir.json", &all)
    }

    fn leaf_records(&self, parent: Uuid) -> Result<Vec<ObservationRecord>> {
        let all: Vec<ObservationRecord> = self.read("dsfr.json")?;
        Ok(all.into_iter().filter(|r| r.parent == Some(parent)).collect())
    }

    fn insert_leaf_records(&self, records: &[ObservationRecord]) -> Result<()> {
        let mut all: Vec<ObservationRecord> = self.read("dsfr.json")?;
        all.extend_from_slice(records);
        self.write("dsfr.json", &all)
    }
}
