//! One run: fetch → trigger → finish. Single job, single-threaded, no
//! retries.

use crate::error::{Error, Result};
use crate::lifecycle::{FinishOutcome, JobPhase, Worker};
use crate::trigger::{ComputeTrigger, require_success};
use tracing::debug;
use uuid::Uuid;

/// What one invocation accomplished; the exit contract is 0 for any
/// `Ok`, 1 for any `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing pending (or a claim race lost); a clean no-op.
    NoJob,
    Finished { job: Uuid, aggregate: Uuid },
}

pub fn run_once(worker: &Worker<'_>, trigger: &dyn ComputeTrigger) -> Result<RunOutcome> {
    let mut phase = JobPhase::Idle;

    let Some(claimed) = worker.fetch()? else {
        return Ok(RunOutcome::NoJob);
    };
    phase = phase.advance();
    debug!(job = %claimed.id, ?phase, "claimed");

    phase = phase.advance();
    debug!(job = %claimed.id, ?phase, "triggering compute");
    let outcome = trigger.trigger(claimed.id)?;
    require_success(&outcome)?;
    phase = phase.advance();
    debug!(job = %claimed.id, ?phase, body = %outcome.body, "compute reported success");

    match worker.finish(claimed.id)? {
        FinishOutcome::Finished { aggregate } => {
            phase = phase.advance();
            debug!(job = %claimed.id, ?phase, "finalized");
            Ok(RunOutcome::Finished {
                job: claimed.id,
                aggregate,
            })
        }
        // The trigger reported success, so the marker must read "done";
        // anything else is real divergence, not a poll-again situation.
        FinishOutcome::NotReady => Err(Error::StateMismatch(format!(
            "job {} reported complete but its state marker is not 'done'",
            claimed.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{BlobKind, ObjectStore, STATE_READY};
    use crate::testutil::{Fixture, observation};
    use crate::trigger::{InProcessTrigger, TriggerOutcome, TriggerStatus};
    use pretty_assertions::assert_eq;

    struct ScriptedTrigger {
        status: TriggerStatus,
    }

    impl ComputeTrigger for ScriptedTrigger {
        fn trigger(&self, _job_id: Uuid) -> crate::error::Result<TriggerOutcome> {
            Ok(TriggerOutcome {
                status: self.status,
                body: "scripted".into(),
            })
        }
    }

    #[test]
    fn empty_queue_is_a_clean_no_op() {
        let fx = Fixture::idle();
        let trigger = InProcessTrigger::new(&fx.store);
        let outcome = run_once(&fx.worker(), &trigger).unwrap();
        assert_eq!(outcome, RunOutcome::NoJob);
    }

    #[test]
    fn full_cycle_claims_computes_and_finalizes() {
        let fx = Fixture::with_waiting_job();
        fx.push_upstream_observation(observation(0.5, -0.5, 10_800, 2.0));

        let trigger = InProcessTrigger::new(&fx.store);
        let outcome = run_once(&fx.worker(), &trigger).unwrap();

        let RunOutcome::Finished { job, aggregate } = outcome else {
            panic!("expected Finished, got {outcome:?}");
        };
        assert_eq!(job, fx.job_id);

        // Slot released, aggregate persisted with the distinct
        // timestamps of the staged observations, all blobs cleared.
        let state = fx.cluster_state();
        assert!(state.pool.running.is_empty());

        let stored = fx.db.aggregates();
        let produced = stored.iter().find(|a| a.id == aggregate).unwrap();
        // Observations at t=0 (seeded) and t=10800 accumulate onto the
        // same land cell, so both timestamps appear in the results.
        assert_eq!(produced.timestamp_list, vec![0, 10_800, 21_600]);

        for kind in BlobKind::ALL {
            assert_eq!(fx.store.get(&kind.key(fx.job_id)).unwrap(), None);
        }

        // The finished aggregate's children are queryable by parent.
        assert!(!fx.db.leaf_records(aggregate).unwrap().is_empty());
    }

    #[test]
    fn failed_trigger_propagates_as_network_error() {
        let fx = Fixture::with_waiting_job();
        let trigger = ScriptedTrigger {
            status: TriggerStatus::Failure,
        };
        let err = run_once(&fx.worker(), &trigger).unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
    }

    #[test]
    fn successful_trigger_without_done_marker_is_a_state_mismatch() {
        let fx = Fixture::with_waiting_job();
        // Scripted success without running the pipeline: the marker
        // stays "ready".
        let trigger = ScriptedTrigger {
            status: TriggerStatus::Success,
        };
        let err = run_once(&fx.worker(), &trigger).unwrap_err();
        assert!(matches!(err, Error::StateMismatch(_)), "got {err:?}");

        // The not-ready finish mutated nothing beyond the claim itself.
        assert_eq!(
            fx.store.get(&BlobKind::State.key(fx.job_id)).unwrap().as_deref(),
            Some(STATE_READY)
        );
        assert!(fx.db.aggregates().is_empty());
    }
}
