//! Wire shapes shared with the job queue, the shared database and the
//! object store. Everything here is plain JSON.
//!
//! Record hierarchy in the results store (parent/child by id reference):
//!
//!   job  --output_dsir-->  DSIR (aggregate)  <--parent--  DSFR (leaf)
//!   job  --input_dsars-->  DSAR --children--> DSIR
//!
//! A DSFR is a single observation: coordinate, timestamp, observation
//! vector. A DSIR aggregates the DSFRs of one job/model. A DSAR groups
//! DSIRs as upstream input for downstream jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Window of space and time one job operates over.
///
/// JSON shape (the `context_<job>` blob):
/// {
///   "temporal": { "begin": 0, "end": 21600, "window_size": 2, "shift_size": 1 },
///   "spatial": { "left": -1.0, "right": 1.0, "top": 1.0, "bottom": -1.0,
///                "x_resolution": 0.5, "y_resolution": 0.5 }
/// }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatiotemporalContext {
    pub temporal: TemporalContext,
    pub spatial: SpatialContext,
}

/// Integer-second time bounds, plus the windowing parameters copied from
/// the model config when the snapshot is assembled at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub begin: i64,
    pub end: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_size: Option<i64>,
}

/// Decimal-degree bounds and grid resolutions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialContext {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,

    // Absent in the shared simulation context; filled in from the
    // per-model config when the job context is assembled.
    #[serde(default)]
    pub x_resolution: f64,

    #[serde(default)]
    pub y_resolution: f64,
}

/// A leaf observation record (DSFR).
///
/// As raw input only `coordinate`, `timestamp` and `observation` are
/// present; `_id`, `parent` and `model_type` are stamped on when the
/// record is inserted into the results store at finish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    pub coordinate: [f64; 2],
    pub timestamp: i64,

    /// Observation vector; only the first element (rainfall) is consumed
    /// by the accumulation grid.
    pub observation: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
}

/// One non-zero cell of the finished depth grid (the `results_<job>`
/// blob holds a list of these).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub timestamp: i64,
    pub coordinate: [f64; 2],

    /// Single-element vector holding the accumulated depth.
    pub observation: Vec<f64>,
}

impl ResultRecord {
    /// Promote this result into a leaf record owned by `parent`, with a
    /// fresh unique id.
    pub fn stamp(self, model_type: &str, parent: Uuid) -> ObservationRecord {
        ObservationRecord {
            id: Some(Uuid::new_v4()),
            coordinate: self.coordinate,
            timestamp: self.timestamp,
            observation: self.observation,
            model_type: Some(model_type.to_string()),
            parent: Some(parent),
        }
    }
}

/// Per-job coefficient table. `scaling_factor` converts a raw rainfall
/// observation into a water-depth contribution; other entries are
/// carried opaquely for other models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVariables {
    pub scaling_factor: f64,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A job document from the results store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,

    pub model_type: String,

    /// Upstream input aggregates (DSARs) staged during fetch.
    #[serde(default)]
    pub input_dsars: Vec<Uuid>,

    /// Set exactly once, at finish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dsir: Option<Uuid>,

    pub variables: JobVariables,
}

/// Instance status as stored in the cluster-state collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Idle,
    Running,
}

/// The waiting/running job pool for one instance. Invariant: `running`
/// holds at most one job id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobPool {
    #[serde(default)]
    pub waiting: Vec<Uuid>,

    #[serde(default)]
    pub running: Vec<Uuid>,
}

/// One instance's slot in the shared cluster-state collection, keyed by
/// (instance, model_type).
///
/// `version` is bumped by every successful save; saves are
/// compare-and-swap on it, so a claim commits only if the document has
/// not changed since it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub instance: String,
    pub model_type: String,
    pub pool: JobPool,
    pub status: InstanceStatus,
    pub time_updated: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

/// Context carried by an aggregate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetadata {
    pub spatial: SpatialContext,
    pub temporal: TemporalContext,
    pub model_type: String,
    pub job_id: Uuid,
}

/// An intermediate aggregate (DSIR): the output of one job, owning the
/// leaf records stamped at finish time. `parent` is assigned later by
/// the downstream sync manager, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(rename = "_id")]
    pub id: Uuid,

    #[serde(default)]
    pub parent: Option<Uuid>,

    pub metadata: AggregateMetadata,

    /// Sorted distinct timestamps across the child leaf records.
    pub timestamp_list: Vec<i64>,
}

/// Metadata on an upstream aggregate; only the model type is consulted
/// here, the rest is carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamMetadata {
    pub model_type: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A higher-level upstream aggregate (DSAR) referencing one or more
/// DSIRs, used as job input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAggregate {
    #[serde(rename = "_id")]
    pub id: Uuid,

    pub metadata: UpstreamMetadata,

    #[serde(default)]
    pub children: Vec<Uuid>,
}

/// Per-model entry of the shared config collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_window: i64,
    pub shift_size: i64,
    pub x_resolution: f64,
    pub y_resolution: f64,

    #[serde(default)]
    pub upstream_models: Vec<String>,
}

/// The downstream hand-off queue for finished aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultPool {
    #[serde(default)]
    pub to_sync: Vec<Uuid>,
}

/// Per-model scheduling state: the current temporal window plus the
/// pool of finished aggregates awaiting sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub model_type: String,
    pub temporal_context: TemporalContext,

    #[serde(default)]
    pub result_pool: ResultPool,
}

/// Local worker identity, read from `instance.json` under the root
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub model_type: String,
}
