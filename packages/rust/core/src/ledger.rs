//! Job ledger access and the per-job state tracker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notecast_shared::{GenerationJob, JobId, JobStatus, JobUpdate, NotecastError, Result};
use notecast_storage::Storage;
use tracing::{debug, warn};

use crate::cost::CostModel;
use crate::publisher::PublishedMedia;

/// Display progress checkpoints.
pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_SCRIPTED: u8 = 50;
pub const PROGRESS_RENDERING: u8 = 60;
pub const PROGRESS_PUBLISHING: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

/// Attempts at the terminal write before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 4;

/// Delay before the first terminal-write retry; doubles on each retry.
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(250);

/// Persistence for generation jobs.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn create(&self, job: &GenerationJob) -> Result<()>;

    async fn update(&self, id: &JobId, update: &JobUpdate) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<GenerationJob>>;
}

#[async_trait]
impl JobLedger for Storage {
    async fn create(&self, job: &GenerationJob) -> Result<()> {
        self.insert_job(job).await
    }

    async fn update(&self, id: &JobId, update: &JobUpdate) -> Result<()> {
        self.update_job(id, update).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<GenerationJob>> {
        self.get_job(id).await
    }
}

/// Drives one job's ledger row forward.
///
/// Status only moves along legal transitions, and progress and cost never
/// go down. Intermediate writes are best effort; terminal writes are retried
/// with backoff and propagate the last error.
pub struct JobTracker {
    ledger: Arc<dyn JobLedger>,
    id: JobId,
    status: JobStatus,
    progress: u8,
    cost_usd: f64,
    script: Option<String>,
}

impl JobTracker {
    pub fn new(ledger: Arc<dyn JobLedger>, job: &GenerationJob) -> Self {
        Self {
            ledger,
            id: job.id.clone(),
            status: job.status,
            progress: job.progress_percent,
            cost_usd: job.cost_usd,
            script: job.script.clone(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    fn check_transition(&self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(NotecastError::validation(format!(
                "job {}: illegal transition {} -> {next}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    async fn write_best_effort(&self, update: JobUpdate) {
        if let Err(e) = self.ledger.update(&self.id, &update).await {
            warn!(job_id = %self.id, error = %e, "ledger update failed, continuing");
        }
    }

    /// `pending → processing`.
    pub async fn start(&mut self) -> Result<()> {
        self.check_transition(JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.progress = self.progress.max(PROGRESS_STARTED);
        self.write_best_effort(JobUpdate {
            status: Some(JobStatus::Processing),
            progress_percent: Some(self.progress),
            ..Default::default()
        })
        .await;
        Ok(())
    }

    /// Advance the display progress (never backwards).
    pub async fn progress(&mut self, percent: u8) {
        let percent = percent.min(PROGRESS_DONE);
        if percent <= self.progress {
            return;
        }
        self.progress = percent;
        self.write_best_effort(JobUpdate {
            progress_percent: Some(percent),
            ..Default::default()
        })
        .await;
    }

    /// Persist the synthesized script and its cost.
    pub async fn record_script(&mut self, script: &str, model: &str, synthesis_cost: f64) {
        self.script = Some(script.to_string());
        self.cost_usd = CostModel::accumulate(self.cost_usd, synthesis_cost);
        self.progress = self.progress.max(PROGRESS_SCRIPTED);
        debug!(job_id = %self.id, cost_usd = self.cost_usd, "script recorded");
        self.write_best_effort(JobUpdate {
            script: Some(script.to_string()),
            model_used: Some(model.to_string()),
            cost_usd: Some(self.cost_usd),
            progress_percent: Some(self.progress),
            ..Default::default()
        })
        .await;
    }

    /// `processing → completed` with published media and its measured duration.
    pub async fn complete_published(&mut self, media: &PublishedMedia, stage_cost: f64) -> Result<()> {
        let cost = CostModel::accumulate(self.cost_usd, stage_cost);
        self.finish(JobUpdate {
            status: Some(JobStatus::Completed),
            media_path: Some(media.object_name.clone()),
            media_url: Some(media.url.clone()),
            mime_type: Some(media.mime_type.clone()),
            duration_seconds: Some(media.duration_seconds),
            cost_usd: Some(cost),
            ..Default::default()
        })
        .await?;
        self.cost_usd = cost;
        Ok(())
    }

    /// `processing → completed` without media, using an estimated duration.
    pub async fn complete_estimated(&mut self, duration_seconds: u32) -> Result<()> {
        self.finish(JobUpdate {
            status: Some(JobStatus::Completed),
            duration_seconds: Some(duration_seconds),
            ..Default::default()
        })
        .await
    }

    /// `→ failed` with a message.
    pub async fn fail(&mut self, message: &str) -> Result<()> {
        self.finish(JobUpdate {
            status: Some(JobStatus::Failed),
            error_message: Some(message.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn finish(&mut self, mut update: JobUpdate) -> Result<()> {
        let next = update
            .status
            .ok_or_else(|| NotecastError::validation("terminal update without a status"))?;
        self.check_transition(next)?;

        if next == JobStatus::Completed {
            update.progress_percent = Some(PROGRESS_DONE);
        }
        update.completed_at = Some(Utc::now());

        self.write_terminal(&update).await?;
        self.status = next;
        if let Some(progress) = update.progress_percent {
            self.progress = progress;
        }
        Ok(())
    }

    async fn write_terminal(&self, update: &JobUpdate) -> Result<()> {
        let mut delay = TERMINAL_WRITE_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.ledger.update(&self.id, update).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    warn!(job_id = %self.id, attempt, error = %e, "terminal ledger write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingLedger, test_storage};
    use notecast_shared::Variant;

    async fn tracked_job() -> (Arc<Storage>, JobTracker, JobId) {
        let storage = Arc::new(test_storage().await);
        let job = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        storage.insert_job(&job).await.unwrap();
        let tracker = JobTracker::new(storage.clone(), &job);
        (storage, tracker, job.id)
    }

    #[tokio::test]
    async fn happy_path_reaches_completed() {
        let (storage, mut tracker, id) = tracked_job().await;
        tracker.start().await.unwrap();
        tracker.record_script("Speaker: hi", "gemini-2.5-pro", 0.02).await;
        tracker.progress(PROGRESS_RENDERING).await;
        tracker.complete_estimated(1).await.unwrap();

        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.script.as_deref(), Some("Speaker: hi"));
        assert_eq!(job.model_used.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(job.duration_seconds, Some(1));
        assert!(job.completed_at.is_some());
        assert!(job.media_url.is_none());
    }

    #[tokio::test]
    async fn cannot_complete_from_pending() {
        let (_storage, mut tracker, _id) = tracked_job().await;
        let err = tracker.complete_estimated(5).await.unwrap_err();
        assert!(err.to_string().contains("illegal transition pending -> completed"));
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        let (storage, mut tracker, id) = tracked_job().await;
        tracker.start().await.unwrap();
        tracker.fail("no usable source content").await.unwrap();
        assert!(tracker.complete_estimated(5).await.is_err());
        assert!(tracker.start().await.is_err());

        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("no usable source content"));
        assert!(job.progress_percent < 100);
    }

    #[tokio::test]
    async fn progress_never_goes_backwards() {
        let (storage, mut tracker, id) = tracked_job().await;
        tracker.start().await.unwrap();
        tracker.progress(PROGRESS_PUBLISHING).await;
        tracker.progress(PROGRESS_RENDERING).await;
        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.progress_percent, PROGRESS_PUBLISHING);
    }

    #[tokio::test]
    async fn published_completion_accumulates_cost() {
        let (storage, mut tracker, id) = tracked_job().await;
        tracker.start().await.unwrap();
        tracker.record_script("Speaker: hi", "m", 0.25).await;
        let media = PublishedMedia {
            object_name: "nb-1/x.wav".into(),
            url: "mem://nb-1/x.wav".into(),
            mime_type: "audio/wav".into(),
            duration_seconds: 10,
            size_bytes: 480_044,
        };
        tracker.complete_published(&media, 0.5).await.unwrap();

        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert!((job.cost_usd - 0.75).abs() < 1e-9);
        assert!((tracker.cost_usd() - 0.75).abs() < 1e-9);
        assert_eq!(job.media_url.as_deref(), Some("mem://nb-1/x.wav"));
        assert_eq!(job.duration_seconds, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_write_is_retried_until_it_lands() {
        let storage = Arc::new(test_storage().await);
        let ledger = Arc::new(RecordingLedger::new(storage.clone()).failing_terminal_writes(2));
        let job = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        storage.insert_job(&job).await.unwrap();
        let mut tracker = JobTracker::new(ledger.clone(), &job);

        tracker.start().await.unwrap();
        tracker.complete_estimated(7).await.unwrap();

        assert_eq!(tracker.status(), JobStatus::Completed);
        assert_eq!(ledger.terminal_write_attempts(), 3);
        let row = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.duration_seconds, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_write_gives_up_after_bounded_attempts() {
        let storage = Arc::new(test_storage().await);
        let ledger = Arc::new(RecordingLedger::new(storage.clone()).failing_terminal_writes(100));
        let job = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        storage.insert_job(&job).await.unwrap();
        let mut tracker = JobTracker::new(ledger.clone(), &job);

        tracker.start().await.unwrap();
        let err = tracker.fail("boom").await.unwrap_err();

        assert!(matches!(err, NotecastError::Storage(_)));
        assert_eq!(ledger.terminal_write_attempts(), TERMINAL_WRITE_ATTEMPTS as usize);
        assert_eq!(tracker.status(), JobStatus::Processing);
    }
}
