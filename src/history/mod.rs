//! History & Persistence (§6 "external interfaces", AMBIENT): a small
//! filesystem-backed store behind a [`HistoryStore`] trait, mirroring the
//! teacher's `Database` trait boundary in shape — persisting `JobResult`s
//! and their `Scorecard`s as one JSON file per job, since a long-term
//! artifact store beyond a local job/history store is explicitly out of
//! scope (spec.md Non-goals).

mod analytics;
mod file_store;

pub use analytics::JobStats;
pub use file_store::FileHistoryStore;

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::quality::Scorecard;
use crate::ticket::JobResult;

/// Persists and retrieves completed job records and their quality
/// scorecards. Kept as a trait, not a concrete file store, so a future
/// database-backed implementation (as the teacher's `Database` trait
/// has) is a drop-in replacement.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_result(&self, result: &JobResult) -> Result<(), HistoryError>;

    async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, HistoryError>;

    /// Most recently written results first, bounded by `limit`.
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobResult>, HistoryError>;

    async fn save_scorecard(&self, job_id: &str, scorecard: &Scorecard)
    -> Result<(), HistoryError>;

    async fn get_scorecard(&self, job_id: &str) -> Result<Option<Scorecard>, HistoryError>;
}
