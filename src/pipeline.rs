//! The compute side: run the full accumulation pass for one job,
//! synchronously, against the object store.
//!
//! Loads the job-scoped context, job document and staged observations
//! plus the shared mask; builds the axes; ingests; accumulates;
//! serializes; stores `results_<job>` and flips the state marker to
//! `"done"`. Success carries no payload beyond the summary: the caller
//! only needs to know no error was raised.

use crate::engine::{AccumulationEngine, IngestOutcome};
use crate::error::Result;
use crate::grid::build_axes;
use crate::mask::LandWaterMask;
use crate::records::{JobRecord, ObservationRecord, SpatiotemporalContext};
use crate::serialize::to_records;
use crate::store::{BlobKind, MASK_KEY, ObjectStore, STATE_DONE, get_json, put_json};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Ingest-and-emit counts for the run log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub observations: usize,
    pub applied: usize,
    pub skipped_water: usize,
    pub skipped_unknown: usize,
    pub skipped_off_grid: usize,
    pub records_emitted: usize,
}

/// Staged observations, partitioned per upstream model.
type StagedObservations = BTreeMap<String, Vec<ObservationRecord>>;

pub fn process_job(store: &dyn ObjectStore, job_id: Uuid) -> Result<ProcessSummary> {
    let context: SpatiotemporalContext = get_json(store, &BlobKind::Context.key(job_id))?;
    let job: JobRecord = get_json(store, &BlobKind::Job.key(job_id))?;
    let mask: LandWaterMask = get_json(store, MASK_KEY)?;

    // The fetch side skips staging a kind with no records at all, so an
    // absent observation blob means an empty ingest, not a failure.
    let staged: StagedObservations = match store.get(&BlobKind::Dsfr.key(job_id))? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => StagedObservations::new(),
    };

    let axes = build_axes(&context)?;
    let mut engine = AccumulationEngine::new(axes, &mask, job.variables.scaling_factor);

    let mut summary = ProcessSummary::default();
    for record in staged.values().flatten() {
        summary.observations += 1;
        match engine.ingest(record) {
            IngestOutcome::Applied => summary.applied += 1,
            IngestOutcome::SkippedWater => summary.skipped_water += 1,
            IngestOutcome::SkippedUnknown => summary.skipped_unknown += 1,
            IngestOutcome::SkippedOffGrid => {
                debug!(
                    timestamp = record.timestamp,
                    lon = record.coordinate[0],
                    lat = record.coordinate[1],
                    "observation off the generated grid, skipped"
                );
                summary.skipped_off_grid += 1;
            }
        }
    }

    engine.accumulate();
    let records = to_records(engine.grid());
    summary.records_emitted = records.len();

    put_json(store, &BlobKind::Results.key(job_id), &records)?;
    store.put(&BlobKind::State.key(job_id), STATE_DONE)?;

    info!(
        job = %job_id,
        observations = summary.observations,
        applied = summary.applied,
        skipped_water = summary.skipped_water,
        skipped_unknown = summary.skipped_unknown,
        skipped_off_grid = summary.skipped_off_grid,
        emitted = summary.records_emitted,
        "accumulation pass complete"
    );
    Ok(summary)
}
