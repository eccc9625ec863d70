//! End-to-end generation pipeline: sources → script → media → published artifact.

use std::sync::Arc;

use notecast_blob::BlobStore;
use notecast_providers::{RenderedMedia, TextGenerator};
use notecast_shared::{
    GenerationJob, GenerationKind, JobId, JobStatus, NotecastError, PipelineConfig,
    PricingConfig, Result, Variant,
};
use tracing::{Instrument, error, info, instrument, warn};

use crate::aggregator::{SourceCatalog, aggregate, truncate_chars};
use crate::cost::CostModel;
use crate::estimator::estimate_duration_secs;
use crate::ledger::{JobLedger, JobTracker, PROGRESS_PUBLISHING, PROGRESS_RENDERING};
use crate::poller::{PollOutcome, poll_operation};
use crate::publisher::{PublishOutcome, Publisher};
use crate::renderer::{MediaRenderer, RenderOutcome};
use crate::synthesizer::ScriptSynthesizer;

/// A user-initiated generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub notebook_id: String,
    pub kind: GenerationKind,
    /// Defaults to the kind's default variant.
    pub variant: Option<Variant>,
    /// Explicit subset of sources; `None` selects every ready source.
    pub source_ids: Option<Vec<String>>,
    pub custom_instructions: Option<String>,
}

/// Collaborators injected into a [`Studio`].
pub struct StudioParts {
    pub ledger: Arc<dyn JobLedger>,
    pub catalog: Arc<dyn SourceCatalog>,
    pub text_generator: Arc<dyn TextGenerator>,
    pub audio_renderer: Arc<dyn MediaRenderer>,
    pub video_renderer: Arc<dyn MediaRenderer>,
    pub blob_store: Arc<dyn BlobStore>,
}

struct StudioInner {
    ledger: Arc<dyn JobLedger>,
    catalog: Arc<dyn SourceCatalog>,
    audio_renderer: Arc<dyn MediaRenderer>,
    video_renderer: Arc<dyn MediaRenderer>,
    synthesizer: ScriptSynthesizer,
    publisher: Publisher,
    costs: CostModel,
    config: PipelineConfig,
}

/// Entry point for generation jobs. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Studio {
    inner: Arc<StudioInner>,
}

impl Studio {
    pub fn new(parts: StudioParts, config: PipelineConfig, pricing: PricingConfig) -> Self {
        let synthesizer = ScriptSynthesizer::new(
            parts.text_generator,
            config.text_model.clone(),
            config.synthesis_timeout,
        );
        Self {
            inner: Arc::new(StudioInner {
                ledger: parts.ledger,
                catalog: parts.catalog,
                audio_renderer: parts.audio_renderer,
                video_renderer: parts.video_renderer,
                synthesizer,
                publisher: Publisher::new(parts.blob_store),
                costs: CostModel::new(pricing),
                config,
            }),
        }
    }

    /// Create a job and run it on its own task. Returns as soon as the job exists.
    pub async fn start_generation(&self, request: GenerationRequest) -> Result<JobId> {
        let job = self.create_job(request).await?;
        let id = job.id.clone();

        let studio = self.clone();
        let span = tracing::info_span!("generation_task", job_id = %id);
        tokio::spawn(
            async move {
                if let Err(e) = studio.run_job(job).await {
                    error!(error = %e, "generation job could not be finalized");
                }
            }
            .instrument(span),
        );

        Ok(id)
    }

    /// Create a job, run it to a terminal state, and return the final ledger row.
    pub async fn run_generation(&self, request: GenerationRequest) -> Result<GenerationJob> {
        let job = self.create_job(request).await?;
        let id = job.id.clone();
        self.run_job(job).await?;
        self.get_job(&id).await
    }

    /// Current ledger row for `id`.
    pub async fn get_job(&self, id: &JobId) -> Result<GenerationJob> {
        self.inner
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| NotecastError::not_found("job", id.to_string()))
    }

    /// Resolve the variant and sources, then persist a `pending` row.
    #[instrument(skip_all, fields(notebook_id = %request.notebook_id, kind = %request.kind))]
    async fn create_job(&self, request: GenerationRequest) -> Result<GenerationJob> {
        let variant = request
            .variant
            .unwrap_or_else(|| Variant::default_for(request.kind));
        if variant.kind() != request.kind {
            return Err(NotecastError::validation(format!(
                "variant '{variant}' is not a {} variant",
                request.kind
            )));
        }

        let sources = self
            .inner
            .catalog
            .select_sources(&request.notebook_id, request.source_ids.as_deref())
            .await?;
        let source_ids = sources.into_iter().map(|s| s.id).collect();

        let job = GenerationJob::new_pending(
            request.notebook_id,
            variant,
            source_ids,
            request.custom_instructions,
        );
        self.inner.ledger.create(&job).await?;
        info!(job_id = %job.id, %variant, sources = job.source_ids.len(), "job created");
        Ok(job)
    }

    /// Run a pending job under the job deadline and write its terminal state.
    #[instrument(skip_all, fields(job_id = %job.id, kind = %job.kind, variant = %job.variant))]
    async fn run_job(&self, job: GenerationJob) -> Result<()> {
        let config = &self.inner.config;
        let mut tracker = JobTracker::new(self.inner.ledger.clone(), &job);

        let outcome =
            tokio::time::timeout(config.job_deadline, self.execute(&job, &mut tracker)).await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_fatal_to_job() => {
                warn!(error = %e, "job failed");
                tracker.fail(&e.to_string()).await
            }
            Ok(Err(e)) => {
                // storage or validation trouble outside the stage outcomes
                error!(error = %e, "job aborted by infrastructure error");
                tracker.fail(&e.to_string()).await
            }
            Err(_) => {
                warn!(
                    deadline_secs = config.job_deadline.as_secs(),
                    "job deadline elapsed"
                );
                // a terminal write may have landed just before the deadline
                let already_final = self
                    .inner
                    .ledger
                    .get(&job.id)
                    .await?
                    .is_some_and(|current| current.status.is_terminal());
                if already_final {
                    return Ok(());
                }
                let estimate = tracker
                    .script()
                    .map(|script| estimate_duration_secs(script, config.words_per_minute));
                match estimate {
                    Some(duration) if tracker.status() == JobStatus::Processing => {
                        tracker.complete_estimated(duration).await
                    }
                    _ => tracker.fail("job deadline exceeded").await,
                }
            }
        }
    }

    /// The stage sequence. Returns `Err` only for failures fatal to the job.
    async fn execute(&self, job: &GenerationJob, tracker: &mut JobTracker) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.config;
        tracker.start().await?;

        // --- Aggregate ---
        let sources = inner
            .catalog
            .select_sources(&job.notebook_id, Some(&job.source_ids))
            .await?;
        let context = aggregate(&sources, config.context_char_budget)?;

        // --- Synthesize ---
        let script = inner
            .synthesizer
            .synthesize(&context.text, job.variant, job.custom_instructions.as_deref())
            .await?;
        let generation = &script.generation;
        let synthesis_cost =
            inner
                .costs
                .text_cost(&generation.model, generation.input_tokens, generation.output_tokens);
        tracker
            .record_script(&script.text, &generation.model, synthesis_cost)
            .await;

        // --- Render (and poll) ---
        tracker.progress(PROGRESS_RENDERING).await;
        let renderer = match job.kind {
            GenerationKind::Audio => &inner.audio_renderer,
            GenerationKind::Video => &inner.video_renderer,
        };
        let media = self
            .render_media(renderer.as_ref(), &script.text, job.variant)
            .await;

        // --- Publish ---
        if let Some(media) = media {
            tracker.progress(PROGRESS_PUBLISHING).await;
            match inner.publisher.publish(&job.notebook_id, &job.id, media).await {
                PublishOutcome::Published(published) => {
                    let input_chars = truncate_chars(&script.text, config.narration_char_budget)
                        .chars()
                        .count();
                    let stage_cost = inner
                        .costs
                        .render_cost(job.kind, input_chars, published.duration_seconds)
                        + inner.costs.publish_cost(published.size_bytes);
                    info!(url = %published.url, "job completed with media");
                    return tracker.complete_published(&published, stage_cost).await;
                }
                PublishOutcome::Failed(reason) => {
                    warn!(%reason, "publish failed, falling back to estimate");
                }
            }
        }

        // --- Fallback ---
        let duration = estimate_duration_secs(&script.text, config.words_per_minute);
        info!(duration_seconds = duration, "job completed without media");
        tracker.complete_estimated(duration).await
    }

    /// Render, polling deferred operations. `None` means no media.
    async fn render_media(
        &self,
        renderer: &dyn MediaRenderer,
        script: &str,
        variant: Variant,
    ) -> Option<RenderedMedia> {
        let config = &self.inner.config;
        match renderer.render(script, variant).await {
            RenderOutcome::Immediate(media) => Some(media),
            RenderOutcome::Deferred(handle) => {
                info!(renderer = renderer.name(), operation = %handle, "render deferred, polling");
                match poll_operation(
                    renderer,
                    &handle,
                    config.poll_interval,
                    config.poll_max_attempts,
                )
                .await
                {
                    PollOutcome::Completed(media) => Some(media),
                    PollOutcome::Failed(reason) => {
                        warn!(%reason, "render operation failed");
                        None
                    }
                    PollOutcome::TimedOut { attempts } => {
                        warn!(attempts, "render operation timed out");
                        None
                    }
                }
            }
            RenderOutcome::Rejected(reason) => {
                warn!(renderer = renderer.name(), %reason, "render rejected");
                None
            }
        }
    }
}
