//! Shared test doubles and fixtures: in-memory collaborators plus a
//! seeded cluster ready for one fetch/finish cycle.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::grid::build_axes;
use crate::lifecycle::Worker;
use crate::mask::LandWaterMask;
use crate::records::{
    AggregateMetadata, AggregateResult, ClusterState, InstanceStatus, JobPool, JobRecord,
    JobVariables, ModelConfig, ModelState, ObservationRecord, ResultPool, SpatialContext,
    SpatiotemporalContext, TemporalContext, UpstreamAggregate, UpstreamMetadata,
};
use crate::store::{MASK_KEY, ObjectStore, put_json};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const INSTANCE: &str = "worker-1";
pub const MODEL: &str = "flood";
pub const UPSTREAM_MODEL: &str = "hurricane";

/// The standard test window: three timestamps, a 5x5 grid from -1.0 to
/// 1.0 at 0.5 degrees.
pub fn test_context() -> SpatiotemporalContext {
    SpatiotemporalContext {
        temporal: TemporalContext {
            begin: 0,
            end: 21_600,
            window_size: None,
            shift_size: None,
        },
        spatial: SpatialContext {
            left: -1.0,
            right: 1.0,
            top: 1.0,
            bottom: -1.0,
            x_resolution: 0.5,
            y_resolution: 0.5,
        },
    }
}

/// Land everywhere on the test lattice except (0.0, 0.0), which is
/// water.
pub fn land_mask_over() -> LandWaterMask {
    let mut mask = LandWaterMask::default();
    for i in -2..=2 {
        for j in -2..=2 {
            let lon = f64::from(i) * 0.5;
            let lat = f64::from(j) * 0.5;
            mask.insert(lon, lat, lon == 0.0 && lat == 0.0);
        }
    }
    mask
}

pub fn test_job(id: Uuid, scaling_factor: f64) -> JobRecord {
    JobRecord {
        id,
        model_type: MODEL.to_string(),
        input_dsars: Vec::new(),
        output_dsir: None,
        variables: JobVariables {
            scaling_factor,
            extra: BTreeMap::new(),
        },
    }
}

pub fn observation(lon: f64, lat: f64, timestamp: i64, rainfall: f64) -> ObservationRecord {
    ObservationRecord {
        id: None,
        coordinate: [lon, lat],
        timestamp,
        observation: vec![rainfall],
        model_type: None,
        parent: None,
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemStore {
    blobs: RefCell<BTreeMap<String, String>>,
}

impl MemStore {
    /// Drop a key without going through the trait (test setup only).
    pub fn remove(&self, key: &str) {
        self.blobs.borrow_mut().remove(key);
    }
}

impl ObjectStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.borrow().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.blobs
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemDbInner {
    cluster: Vec<ClusterState>,
    configs: BTreeMap<String, ModelConfig>,
    spatial: Option<SpatialContext>,
    model_states: Vec<ModelState>,
    jobs: Vec<JobRecord>,
    dsars: Vec<UpstreamAggregate>,
    dsirs: Vec<AggregateResult>,
    dsfrs: Vec<ObservationRecord>,
    fail_next_cluster_save: bool,
}

/// In-memory database honoring the compare-and-swap contract, with a
/// few hooks for poking at failure paths.
#[derive(Debug, Default)]
pub struct MemDb {
    inner: RefCell<MemDbInner>,
}

impl MemDb {
    /// Make the next cluster-state save lose its CAS (as if a concurrent
    /// fetcher got there first).
    pub fn fail_next_cluster_save(&self) {
        self.inner.borrow_mut().fail_next_cluster_save = true;
    }

    pub fn clear_leaf_records(&self) {
        self.inner.borrow_mut().dsfrs.clear();
    }

    /// Aggregates produced by the code under test, excluding the
    /// upstream DSIR the fixture pre-seeds.
    pub fn aggregates(&self) -> Vec<AggregateResult> {
        self.inner
            .borrow()
            .dsirs
            .iter()
            .filter(|a| a.metadata.model_type == MODEL)
            .cloned()
            .collect()
    }
}

impl Database for MemDb {
    fn cluster_state(&self, instance: &str, model: &str) -> Result<Option<ClusterState>> {
        Ok(self
            .inner
            .borrow()
            .cluster
            .iter()
            .find(|s| s.instance == instance && s.model_type == model)
            .cloned())
    }

    fn save_cluster_state(&self, state: &ClusterState) -> Result<bool> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_next_cluster_save {
            inner.fail_next_cluster_save = false;
            return Ok(false);
        }
        let slot = inner
            .cluster
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
                inner.cluster.push(fresh);
            }
        }
        Ok(true)
    }

    fn model_config(&self, model: &str) -> Result<ModelConfig> {
        self.inner
            .borrow()
            .configs
            .get(model)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no config entry for model '{model}'")))
    }

    fn spatial_context(&self) -> Result<SpatialContext> {
        self.inner
            .borrow()
            .spatial
            .clone()
            .ok_or_else(|| Error::Config("no simulation context seeded".into()))
    }

    fn model_state(&self, model: &str) -> Result<ModelState> {
        self.inner
            .borrow()
            .model_states
            .iter()
            .find(|s| s.model_type == model)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no state entry for model '{model}'")))
    }

    fn save_model_state(&self, state: &ModelState) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner
            .model_states
            .iter_mut()
            .find(|s| s.model_type == state.model_type)
        {
            Some(existing) => *existing = state.clone(),
            None => inner.model_states.push(state.clone()),
        }
        Ok(())
    }

    fn job(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.inner.borrow().jobs.iter().find(|j| j.id == id).cloned())
    }

    fn save_job(&self, job: &JobRecord) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => inner.jobs.push(job.clone()),
        }
        Ok(())
    }

    fn upstream_aggregate(&self, id: Uuid) -> Result<Option<UpstreamAggregate>> {
        Ok(self.inner.borrow().dsars.iter().find(|a| a.id == id).cloned())
    }

    fn intermediate(&self, id: Uuid) -> Result<Option<AggregateResult>> {
        Ok(self.inner.borrow().dsirs.iter().find(|a| a.id == id).cloned())
    }

    fn insert_aggregate(&self, aggregate: &AggregateResult) -> Result<()> {
        self.inner.borrow_mut().dsirs.push(aggregate.clone());
        Ok(())
    }

    fn leaf_records(&self, parent: Uuid) -> Result<Vec<ObservationRecord>> {
        Ok(self
            .inner
            .borrow()
            .dsfrs
            .iter()
            .filter(|r| r.parent == Some(parent))
            .cloned()
            .collect())
    }

    fn insert_leaf_records(&self, records: &[ObservationRecord]) -> Result<()> {
        self.inner.borrow_mut().dsfrs.extend_from_slice(records);
        Ok(())
    }
}

/// A seeded cluster: one registered instance, one model config with a
/// single upstream model, one upstream DSAR → DSIR chain with one leaf
/// observation, and the mask in the object store.
pub struct Fixture {
    pub db: MemDb,
    pub store: MemStore,
    pub job_id: Uuid,
    pub upstream_dsir: Uuid,
}

impl Fixture {
    /// A registered but idle instance: nothing waiting.
    pub fn idle() -> Self {
        Self::build(false)
    }

    /// One job at the head of the waiting queue.
    pub fn with_waiting_job() -> Self {
        Self::build(true)
    }

    fn build(waiting: bool) -> Self {
        let db = MemDb::default();
        let store = MemStore::default();
        let job_id = Uuid::new_v4();
        let dsar_id = Uuid::new_v4();
        let dsir_id = Uuid::new_v4();

        let context = test_context();
        {
            let mut inner = db.inner.borrow_mut();
            inner.configs.insert(
                MODEL.to_string(),
                ModelConfig {
                    input_window: 2,
                    shift_size: 1,
                    x_resolution: 0.5,
                    y_resolution: 0.5,
                    upstream_models: vec![UPSTREAM_MODEL.to_string()],
                },
            );
            inner.spatial = Some(SpatialContext {
                x_resolution: 0.0,
                y_resolution: 0.0,
                ..context.spatial.clone()
            });
            inner.model_states.push(ModelState {
                model_type: MODEL.to_string(),
                temporal_context: context.temporal.clone(),
                result_pool: ResultPool::default(),
            });
            inner.cluster.push(ClusterState {
                instance: INSTANCE.to_string(),
                model_type: MODEL.to_string(),
                pool: JobPool {
                    waiting: if waiting { vec![job_id] } else { Vec::new() },
                    running: Vec::new(),
                },
                status: InstanceStatus::Idle,
                time_updated: Utc::now(),
                version: 0,
            });

            let mut job = test_job(job_id, 2.0);
            job.input_dsars = vec![dsar_id];
            inner.jobs.push(job);

            inner.dsars.push(UpstreamAggregate {
                id: dsar_id,
                metadata: UpstreamMetadata {
                    model_type: UPSTREAM_MODEL.to_string(),
                    extra: BTreeMap::new(),
                },
                children: vec![dsir_id],
            });
            inner.dsirs.push(AggregateResult {
                id: dsir_id,
                parent: Some(dsar_id),
                metadata: AggregateMetadata {
                    spatial: context.spatial.clone(),
                    temporal: context.temporal.clone(),
                    model_type: UPSTREAM_MODEL.to_string(),
                    job_id: Uuid::new_v4(),
                },
                timestamp_list: vec![0],
            });
            inner.dsfrs.push(ObservationRecord {
                parent: Some(dsir_id),
                id: Some(Uuid::new_v4()),
                model_type: Some(UPSTREAM_MODEL.to_string()),
                ..observation(0.5, -0.5, 0, 1.5)
            });
        }

        put_json(&store, MASK_KEY, &land_mask_over()).unwrap();

        // The seeded context must actually discretize; catch fixture rot
        // here rather than in every test.
        build_axes(&context).unwrap();

        Fixture {
            db,
            store,
            job_id,
            upstream_dsir: dsir_id,
        }
    }

    pub fn worker(&self) -> Worker<'_> {
        Worker::new(INSTANCE, MODEL, &self.db, &self.store)
    }

    pub fn cluster_state(&self) -> ClusterState {
        self.db
            .cluster_state(INSTANCE, MODEL)
            .unwrap()
            .expect("fixture instance registered")
    }

    /// Add a raw observation under the seeded upstream DSIR so it gets
    /// staged by the next fetch.
    pub fn push_upstream_observation(&self, record: ObservationRecord) {
        self.db.inner.borrow_mut().dsfrs.push(ObservationRecord {
            parent: Some(self.upstream_dsir),
            id: Some(Uuid::new_v4()),
            model_type: Some(UPSTREAM_MODEL.to_string()),
            ..record
        });
    }
}
