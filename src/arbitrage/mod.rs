//! Arbitrage pipeline: classification, evaluation, submission, scheduling.

pub mod classify;
pub mod evaluator;
pub mod scheduler;
pub mod submitter;

pub use classify::{RevertClass, RevertClassifier};
pub use evaluator::{EvalError, Evaluation, EvaluatorConfig, OpportunityEvaluator};
pub use scheduler::{LoopSummary, SchedulerConfig, SchedulingLoop, TerminationPolicy};
pub use submitter::{SubmitError, TransactionSubmitter};
