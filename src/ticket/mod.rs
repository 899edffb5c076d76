//! Job Model & Schema Validator (§3, §4.3).
//!
//! Parses, validates, and normalizes an incoming [`JobTicket`], computing
//! the effective QA threshold and resolving the output sink against the
//! configured allow-list of filesystem roots.

mod result;
mod schema;

pub use result::{CostBreakdown, JobResult, Outcome, StageTiming};
pub use schema::{
    JobTicket, JobType, MultiServerConfig, OutputSink, QaConfig, Quality, QualityTier,
    WorkerPreference, WORLD_CLASS_FLOOR,
};
