//! Filesystem-backed [`HistoryStore`]: one JSON file per job under
//! `config.history_root`, and one per job under `config.scorecards_root`
//! for its [`Scorecard`] (§6 AMBIENT).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::history::HistoryStore;
use crate::quality::Scorecard;
use crate::ticket::JobResult;

pub struct FileHistoryStore {
    history_root: PathBuf,
    scorecards_root: PathBuf,
}

impl FileHistoryStore {
    pub fn new(history_root: PathBuf, scorecards_root: PathBuf) -> Self {
        Self {
            history_root,
            scorecards_root,
        }
    }

    fn result_path(&self, job_id: &str) -> PathBuf {
        self.history_root.join(format!("{job_id}.json"))
    }

    fn scorecard_path(&self, job_id: &str) -> PathBuf {
        self.scorecards_root.join(format!("{job_id}.json"))
    }
}

async fn write_json<T: serde::Serialize + Sync>(path: &Path, value: &T) -> Result<(), HistoryError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, HistoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save_result(&self, result: &JobResult) -> Result<(), HistoryError> {
        write_json(&self.result_path(&result.job_id), result).await
    }

    async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, HistoryError> {
        read_json(&self.result_path(job_id)).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobResult>, HistoryError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.history_root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            entries.push((modified, entry.path()));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut results = Vec::with_capacity(limit.min(entries.len()));
        for (_, path) in entries.into_iter().take(limit) {
            if let Some(result) = read_json(&path).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn save_scorecard(
        &self,
        job_id: &str,
        scorecard: &Scorecard,
    ) -> Result<(), HistoryError> {
        write_json(&self.scorecard_path(job_id), scorecard).await
    }

    async fn get_scorecard(&self, job_id: &str) -> Result<Option<Scorecard>, HistoryError> {
        read_json(&self.scorecard_path(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{CostBreakdown, Outcome};

    fn test_store() -> (FileHistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("history"), dir.path().join("scorecards"));
        (store, dir)
    }

    fn sample_result(job_id: &str) -> JobResult {
        JobResult {
            job_id: job_id.to_string(),
            outcome: Outcome::Success,
            artifact_paths: vec!["out.pdf".to_string()],
            scorecard: None,
            stage_timings: vec![],
            cost: CostBreakdown::default(),
            error_chain: vec![],
        }
    }

    #[tokio::test]
    async fn round_trips_a_job_result() {
        let (store, _dir) = test_store();
        let result = sample_result("job-1");
        store.save_result(&result).await.unwrap();

        let loaded = store.get_result("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn get_result_returns_none_for_an_unknown_job() {
        let (store, _dir) = test_store();
        assert!(store.get_result("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_recent_returns_newest_first_bounded_by_limit() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store.save_result(&sample_result(&format!("job-{i}"))).await.unwrap();
        }
        let recent = store.list_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn round_trips_a_scorecard_independently_of_the_result() {
        let (store, _dir) = test_store();
        let card = Scorecard::new();
        store.save_scorecard("job-1", &card).await.unwrap();
        assert!(store.get_scorecard("job-1").await.unwrap().is_some());
        assert!(store.get_result("job-1").await.unwrap().is_none());
    }
}
