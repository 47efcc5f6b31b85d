//! The job lifecycle: claim a pending job, stage its inputs, and
//! finalize its results.
//!
//! One [`Worker`] is one instance's view of the shared queue. All
//! collaborators and identity are threaded through it explicitly; there
//! is no process-wide current-job global.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::records::{
    AggregateMetadata, AggregateResult, InstanceStatus, ObservationRecord, ResultRecord,
    SpatiotemporalContext, UpstreamAggregate,
};
use crate::store::{BlobKind, ObjectStore, STATE_DONE, STATE_READY, get_json, put_json};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

/// The slot cycle for one instance. `Idle → Claimed` on a successful
/// fetch, `→ Processing` when the trigger fires, `→ Completed` when the
/// state marker reads `"done"`, `→ Finalized` once results are persisted
/// and the slot is released, then back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Claimed,
    Processing,
    Completed,
    Finalized,
}

impl JobPhase {
    pub fn advance(self) -> JobPhase {
        match self {
            JobPhase::Idle => JobPhase::Claimed,
            JobPhase::Claimed => JobPhase::Processing,
            JobPhase::Processing => JobPhase::Completed,
            JobPhase::Completed => JobPhase::Finalized,
            JobPhase::Finalized => JobPhase::Idle,
        }
    }
}

/// A successfully claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: Uuid,
}

/// Result of a finalize attempt. `NotReady` means the state marker was
/// not `"done"` yet; nothing was mutated and the caller decides whether
/// to try again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Finished { aggregate: Uuid },
    NotReady,
}

/// Placeholder upstream name when a model declares no upstreams; there
/// is always upstream data to set the context.
const UNDEFINED_UPSTREAM: &str = "undefined";

pub struct Worker<'a> {
    instance_id: String,
    model_type: String,
    db: &'a dyn Database,
    store: &'a dyn ObjectStore,
}

impl<'a> Worker<'a> {
    pub fn new(
        instance_id: impl Into<String>,
        model_type: impl Into<String>,
        db: &'a dyn Database,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Worker {
            instance_id: instance_id.into(),
            model_type: model_type.into(),
            db,
            store,
        }
    }

    /// Claim the head of the waiting queue and stage everything the
    /// compute side needs.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no pending jobs,
    /// a job already running on this instance, or a claim race lost to a
    /// concurrent fetcher (the compare-and-swap save failed). A losing
    /// fetcher backs off without deleting anything: the job-scoped keys
    /// it staged are the same ones the winner staged.
    pub fn fetch(&self) -> Result<Option<ClaimedJob>> {
        let mut state = self
            .db
            .cluster_state(&self.instance_id, &self.model_type)?
            .ok_or_else(|| {
                Error::Config(format!(
                    "instance '{}' with model '{}' is not registered; check instance.json",
                    self.instance_id, self.model_type
                ))
            })?;

        if !state.pool.running.is_empty() {
            warn!(
                instance = %self.instance_id,
                running = %state.pool.running[0],
                "cannot fetch a new job until the previous job is completed"
            );
            return Ok(None);
        }
        if state.pool.waiting.is_empty() {
            info!(instance = %self.instance_id, "no jobs pending, skipping");
            return Ok(None);
        }

        // FIFO, no priority.
        let job_id = state.pool.waiting[0];
        let job = self
            .db
            .job(job_id)?
            .ok_or_else(|| Error::Storage(format!("job {job_id} missing from results store")))?;
        put_json(self.store, &BlobKind::Job.key(job_id), &job)?;

        self.stage_inputs(job_id, &job.input_dsars)?;

        let context = self.assemble_context()?;
        put_json(self.store, &BlobKind::Context.key(job_id), &context)?;
        self.store
            .put(&BlobKind::State.key(job_id), STATE_READY)?;

        // Commit the claim last, compare-and-swap on the state document.
        // The loser must not touch the job-scoped keys afterwards: both
        // racers read the same queue head and staged the same keys, so a
        // cleanup here would destroy what the winner just staged. The
        // staged blobs belong to the winner now; finish clears them.
        state.pool.waiting.remove(0);
        state.pool.running = vec![job_id];
        state.status = InstanceStatus::Running;
        state.time_updated = Utc::now();
        if !self.db.save_cluster_state(&state)? {
            warn!(job = %job_id, "lost the claim race to a concurrent fetcher");
            return Ok(None);
        }

        info!(job = %job_id, "job claimed and staged, ready for processing");
        Ok(Some(ClaimedJob { id: job_id }))
    }

    /// Walk DSAR → DSIR → DSFR for each upstream model and stage the
    /// three record kinds, partitioned per model. A kind with no records
    /// for any model is not written at all.
    fn stage_inputs(&self, job_id: Uuid, input_dsars: &[Uuid]) -> Result<()> {
        let config = self.db.model_config(&self.model_type)?;
        let mut upstream = config.upstream_models.clone();
        if upstream.is_empty() {
            upstream.push(UNDEFINED_UPSTREAM.to_string());
        }

        let mut dsars: BTreeMap<String, Vec<UpstreamAggregate>> = BTreeMap::new();
        let mut dsirs: BTreeMap<String, Vec<AggregateResult>> = BTreeMap::new();
        let mut dsfrs: BTreeMap<String, Vec<ObservationRecord>> = BTreeMap::new();

        for model in &upstream {
            info!(model = %model, "caching input data");
            for dsar_id in input_dsars {
                let dsar = self.db.upstream_aggregate(*dsar_id)?.ok_or_else(|| {
                    Error::Storage(format!("input aggregate {dsar_id} missing"))
                })?;
                if dsar.metadata.model_type != *model {
                    continue;
                }
                for dsir_id in &dsar.children {
                    let dsir = self.db.intermediate(*dsir_id)?.ok_or_else(|| {
                        Error::Storage(format!("intermediate {dsir_id} missing"))
                    })?;
                    dsfrs
                        .entry(model.clone())
                        .or_default()
                        .extend(self.db.leaf_records(*dsir_id)?);
                    dsirs.entry(model.clone()).or_default().push(dsir);
                }
                dsars.entry(model.clone()).or_default().push(dsar);
            }
        }

        if !dsars.is_empty() {
            put_json(self.store, &BlobKind::Dsar.key(job_id), &dsars)?;
        }
        if !dsirs.is_empty() {
            put_json(self.store, &BlobKind::Dsir.key(job_id), &dsirs)?;
        }
        if !dsfrs.is_empty() {
            put_json(self.store, &BlobKind::Dsfr.key(job_id), &dsfrs)?;
        }
        Ok(())
    }

    /// Snapshot the current spatiotemporal window: temporal bounds from
    /// the model state, window/shift sizes and resolutions from the
    /// per-model config, spatial bounds from the shared simulation
    /// context.
    fn assemble_context(&self) -> Result<SpatiotemporalContext> {
        let config = self.db.model_config(&self.model_type)?;
        let model_state = self.db.model_state(&self.model_type)?;

        let mut temporal = model_state.temporal_context;
        temporal.window_size = Some(config.input_window);
        temporal.shift_size = Some(config.shift_size);

        let mut spatial = self.db.spatial_context()?;
        spatial.x_resolution = config.x_resolution;
        spatial.y_resolution = config.y_resolution;

        Ok(SpatiotemporalContext { temporal, spatial })
    }

    /// Finalize a completed job: persist the new aggregate and its
    /// stamped leaf records, hand the aggregate to the sync queue,
    /// release the slot, and clear the job-scoped blobs.
    pub fn finish(&self, job_id: Uuid) -> Result<FinishOutcome> {
        let marker = self
            .store
            .get(&BlobKind::State.key(job_id))?
            .ok_or_else(|| Error::Storage(format!("state marker for job {job_id} missing")))?;
        if marker != STATE_DONE {
            return Ok(FinishOutcome::NotReady);
        }

        let mut state = self
            .db
            .cluster_state(&self.instance_id, &self.model_type)?
            .ok_or_else(|| {
                Error::Config(format!(
                    "instance '{}' with model '{}' is not registered",
                    self.instance_id, self.model_type
                ))
            })?;

        let context = self.assemble_context()?;
        let mut aggregate = AggregateResult {
            id: Uuid::new_v4(),
            // Assigned later by the sync manager.
            parent: None,
            metadata: AggregateMetadata {
                spatial: context.spatial,
                temporal: context.temporal,
                model_type: self.model_type.clone(),
                job_id,
            },
            timestamp_list: Vec::new(),
        };

        // Reverse horizontal linkage: job -> its output aggregate.
        let mut job = self
            .db
            .job(job_id)?
            .ok_or_else(|| Error::Storage(format!("job {job_id} missing from results store")))?;
        job.output_dsir = Some(aggregate.id);
        self.db.save_job(&job)?;

        let results: Vec<ResultRecord> = get_json(self.store, &BlobKind::Results.key(job_id))?;
        let mut timestamps = BTreeSet::new();
        let stamped: Vec<ObservationRecord> = results
            .into_iter()
            .map(|record| {
                timestamps.insert(record.timestamp);
                record.stamp(&self.model_type, aggregate.id)
            })
            .collect();
        aggregate.timestamp_list = timestamps.into_iter().collect();

        self.db.insert_leaf_records(&stamped)?;
        self.db.insert_aggregate(&aggregate)?;

        let mut model_state = self.db.model_state(&self.model_type)?;
        model_state.result_pool.to_sync.push(aggregate.id);
        self.db.save_model_state(&model_state)?;

        state.pool.running.clear();
        state.status = InstanceStatus::Idle;
        state.time_updated = Utc::now();
        if !self.db.save_cluster_state(&state)? {
            return Err(Error::Storage(
                "cluster state changed concurrently while finalizing".into(),
            ));
        }

        self.delete_job_blobs(job_id);

        info!(job = %job_id, aggregate = %aggregate.id, "job finished");
        Ok(FinishOutcome::Finished {
            aggregate: aggregate.id,
        })
    }

    /// Best-effort, unordered deletion of every job-scoped key. A
    /// failure partway through leaves some keys stale: observable,
    /// non-fatal residue.
    fn delete_job_blobs(&self, job_id: Uuid) {
        for kind in BlobKind::ALL {
            if let Err(err) = self.store.delete(&kind.key(job_id)) {
                warn!(job = %job_id, kind = kind.as_str(), %err, "stale blob left behind");
            }
        }
    }
}
