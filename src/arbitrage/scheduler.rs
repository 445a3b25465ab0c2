//! Timed-batch scheduling.
//!
//! The runner executes in waves until a wall-clock deadline: each wave
//! samples a handful of candidates from the catalog and evaluates them
//! concurrently. The deadline is advisory; in-flight evaluations always
//! complete. A fatal outcome for one candidate never aborts its siblings
//! in the same wave.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::catalog::CandidateCatalog;

use super::evaluator::{EvalError, Evaluation, OpportunityEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    RunUntilDeadline,
    /// Stop as soon as one transaction goes out; the original deployment
    /// model gave each process one shot.
    StopOnFirstSuccess,
}

pub struct SchedulerConfig {
    pub deadline: Duration,
    /// Candidates per wave, sampled without replacement.
    pub wave_size: usize,
    pub termination: TerminationPolicy,
    /// Abort the loop on the first fatal evaluation error.
    pub stop_on_fatal: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub waves: u64,
    pub evaluated: u64,
    pub submitted: u64,
    pub no_opportunity: u64,
    pub abstained: u64,
    pub rate_limited: u64,
    pub nonce_conflicts: u64,
    pub failed: u64,
}

pub struct SchedulingLoop {
    catalog: Arc<CandidateCatalog>,
    evaluator: Arc<OpportunityEvaluator>,
    config: SchedulerConfig,
}

impl SchedulingLoop {
    pub fn new(
        catalog: Arc<CandidateCatalog>,
        evaluator: Arc<OpportunityEvaluator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            catalog,
            evaluator,
            config,
        }
    }

    pub async fn run(&self) -> Result<LoopSummary, EvalError> {
        let started = Instant::now();
        let mut summary = LoopSummary::default();

        loop {
            let wave = self.catalog.sample(self.config.wave_size);
            if wave.is_empty() {
                warn!("candidate catalog is empty, nothing to do");
                break;
            }
            summary.waves += 1;
            debug!(wave = summary.waves, candidates = wave.len(), "starting wave");

            let results = join_all(wave.iter().map(|c| self.evaluator.evaluate(c))).await;

            let mut stop = false;
            for (candidate, result) in wave.iter().zip(results) {
                summary.evaluated += 1;
                match result {
                    Ok(Evaluation::Submitted { profit, .. }) => {
                        summary.submitted += 1;
                        if self.config.termination == TerminationPolicy::StopOnFirstSuccess {
                            info!(pair = %candidate.pair, %profit, "first success, stopping loop");
                            stop = true;
                        }
                    }
                    Ok(Evaluation::NoOpportunity { .. }) => summary.no_opportunity += 1,
                    Ok(Evaluation::Abstained) => summary.abstained += 1,
                    Ok(Evaluation::RateLimited { .. }) => summary.rate_limited += 1,
                    Ok(Evaluation::NonceConflict) => summary.nonce_conflicts += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!(pair = %candidate.pair, error = %e, "candidate evaluation failed");
                        if self.config.stop_on_fatal {
                            return Err(e);
                        }
                    }
                }
            }

            if stop {
                break;
            }
            if started.elapsed() >= self.config.deadline {
                info!(waves = summary.waves, "deadline reached");
                break;
            }
        }

        Ok(summary)
    }
}
