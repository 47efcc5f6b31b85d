//! The compute-trigger collaborator.
//!
//! The wire protocol is free text: a response body containing the
//! substring `"success"` means the remote accumulation completed. The
//! trait surfaces a typed outcome instead; the substring parse survives
//! only as [`TriggerOutcome::from_legacy_body`], the compatibility shim
//! for transports that still speak the old protocol. Transport
//! implementations are responsible for bounding the call with a timeout;
//! an unreachable endpoint is a network error, not a failure outcome.

use crate::error::{Error, Result};
use crate::pipeline;
use crate::store::ObjectStore;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    Success,
    Failure,
}

/// Machine-readable result of one trigger call, with the raw response
/// body kept for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub status: TriggerStatus,
    pub body: String,
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TriggerStatus::Success
    }

    /// Legacy-compatibility shim: classify a free-text body by substring
    /// containment of `"success"`.
    pub fn from_legacy_body(body: String) -> Self {
        let status = if body.contains("success") {
            TriggerStatus::Success
        } else {
            TriggerStatus::Failure
        };
        TriggerOutcome { status, body }
    }
}

/// Invoke the remote accumulation for a claimed job. Blocks until the
/// compute side has finished (or failed).
pub trait ComputeTrigger {
    fn trigger(&self, job_id: Uuid) -> Result<TriggerOutcome>;
}

/// Runs the accumulation pipeline in-process against the same object
/// store. The compute side lives in this crate, so the default
/// deployment needs no transport at all; the response body still honors
/// the legacy protocol.
pub struct InProcessTrigger<'s> {
    store: &'s dyn ObjectStore,
}

impl<'s> InProcessTrigger<'s> {
    pub fn new(store: &'s dyn ObjectStore) -> Self {
        InProcessTrigger { store }
    }
}

impl ComputeTrigger for InProcessTrigger<'_> {
    fn trigger(&self, job_id: Uuid) -> Result<TriggerOutcome> {
        match pipeline::process_job(self.store, job_id) {
            // The compute side speaks the legacy body protocol.
            Ok(summary) => Ok(TriggerOutcome::from_legacy_body(format!(
                "success: {} records from {} observations",
                summary.records_emitted, summary.observations
            ))),
            // A pipeline failure is a non-success response, not a
            // transport error: the call itself completed.
            Err(err) => Ok(TriggerOutcome {
                status: TriggerStatus::Failure,
                body: err.to_string(),
            }),
        }
    }
}

/// Map a non-success outcome to the error the orchestrator propagates.
pub fn require_success(outcome: &TriggerOutcome) -> Result<()> {
    if outcome.is_success() {
        Ok(())
    } else {
        Err(Error::Network(format!(
            "compute trigger reported failure: {}",
            outcome.body
        )))
    }
}
