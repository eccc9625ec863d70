//! Media rendering: script → finished media, an operation to poll, or a rejection.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use notecast_providers::{
    NarrationSynthesizer, OperationHandle, OperationStatus, RenderedMedia, VideoGenerator,
    VideoOperations,
};
use notecast_shared::{GenerationKind, NotecastError, Result, Variant, VideoRenderMode};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::aggregator::truncate_chars;

/// Most distinct voices a narration can use.
const MAX_SPEAKERS: usize = 5;

/// Label used when the script has no `Name:` lines.
const DEFAULT_SPEAKER: &str = "Speaker";

/// Result of asking a renderer to start.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Finished media, no polling needed.
    Immediate(RenderedMedia),
    /// Accepted; poll the handle until it settles.
    Deferred(OperationHandle),
    /// Could not be started.
    Rejected(String),
}

/// A rendering strategy. Failures are folded into [`RenderOutcome::Rejected`].
#[async_trait]
pub trait MediaRenderer: Send + Sync {
    async fn render(&self, script: &str, variant: Variant) -> RenderOutcome;

    /// Query a handle previously returned as [`RenderOutcome::Deferred`].
    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        Err(NotecastError::Provider(format!(
            "renderer cannot poll operation {handle}"
        )))
    }

    /// Short name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Narration (audio)
// ---------------------------------------------------------------------------

/// Speaker labels (`Name:` at line start) in order of first appearance.
///
/// At most five are returned; a script without labels gets a single default speaker.
pub fn extract_speakers(script: &str) -> Vec<String> {
    static SPEAKER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^([A-Za-z0-9 \t]+):").expect("valid regex"));

    let mut seen = HashSet::new();
    let speakers: Vec<String> = SPEAKER_RE
        .captures_iter(script)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_SPEAKERS)
        .collect();

    if speakers.is_empty() {
        vec![DEFAULT_SPEAKER.to_string()]
    } else {
        speakers
    }
}

/// Wraps narration synthesis; always answers immediately.
pub struct NarrationRenderer {
    synthesizer: Arc<dyn NarrationSynthesizer>,
    char_budget: usize,
}

impl NarrationRenderer {
    /// `char_budget` caps the script text sent for narration.
    pub fn new(synthesizer: Arc<dyn NarrationSynthesizer>, char_budget: usize) -> Self {
        Self {
            synthesizer,
            char_budget,
        }
    }
}

#[async_trait]
impl MediaRenderer for NarrationRenderer {
    #[instrument(skip_all, fields(renderer = "narration"))]
    async fn render(&self, script: &str, _variant: Variant) -> RenderOutcome {
        let text = truncate_chars(script, self.char_budget);
        let speakers = extract_speakers(text);
        debug!(
            chars = text.chars().count(),
            ?speakers,
            model = self.synthesizer.narration_model(),
            "requesting narration"
        );

        match self.synthesizer.synthesize(text, &speakers).await {
            Ok(audio) if audio.pcm.is_empty() => {
                RenderOutcome::Rejected("narration returned no audio".into())
            }
            Ok(audio) => RenderOutcome::Immediate(RenderedMedia {
                mime_type: audio.format.mime_type(),
                bytes: audio.pcm,
            }),
            Err(e) => {
                warn!(error = %e, "narration rejected");
                RenderOutcome::Rejected(e.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "narration"
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Blocks on a single render call.
pub struct SyncVideoRenderer {
    generator: Arc<dyn VideoGenerator>,
    char_budget: usize,
}

impl SyncVideoRenderer {
    pub fn new(generator: Arc<dyn VideoGenerator>, char_budget: usize) -> Self {
        Self {
            generator,
            char_budget,
        }
    }
}

#[async_trait]
impl MediaRenderer for SyncVideoRenderer {
    #[instrument(skip_all, fields(renderer = "video-sync", variant = %variant))]
    async fn render(&self, script: &str, variant: Variant) -> RenderOutcome {
        let prompt = truncate_chars(script, self.char_budget);
        match self
            .generator
            .render(prompt, variant.target_duration_secs())
            .await
        {
            Ok(media) if media.bytes.is_empty() => {
                RenderOutcome::Rejected("video render returned no bytes".into())
            }
            Ok(media) => RenderOutcome::Immediate(media),
            Err(e) => {
                warn!(error = %e, "video render rejected");
                RenderOutcome::Rejected(e.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "video-sync"
    }
}

/// Submits a long-running operation; the caller polls it.
pub struct AsyncVideoRenderer {
    operations: Arc<dyn VideoOperations>,
    char_budget: usize,
}

impl AsyncVideoRenderer {
    pub fn new(operations: Arc<dyn VideoOperations>, char_budget: usize) -> Self {
        Self {
            operations,
            char_budget,
        }
    }
}

#[async_trait]
impl MediaRenderer for AsyncVideoRenderer {
    #[instrument(skip_all, fields(renderer = "video-async", variant = %variant))]
    async fn render(&self, script: &str, variant: Variant) -> RenderOutcome {
        let prompt = truncate_chars(script, self.char_budget);
        match self
            .operations
            .submit(prompt, variant.target_duration_secs())
            .await
        {
            Ok(handle) => RenderOutcome::Deferred(handle),
            Err(e) => {
                warn!(error = %e, "video submission rejected");
                RenderOutcome::Rejected(e.to_string())
            }
        }
    }

    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        self.operations.poll_status(handle).await
    }

    fn name(&self) -> &str {
        "video-async"
    }
}

/// Never renders. Jobs complete with script and estimated duration only.
pub struct DisabledRenderer {
    reason: String,
}

impl DisabledRenderer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for DisabledRenderer {
    fn default() -> Self {
        Self::new("rendering disabled")
    }
}

#[async_trait]
impl MediaRenderer for DisabledRenderer {
    async fn render(&self, _script: &str, _variant: Variant) -> RenderOutcome {
        RenderOutcome::Rejected(self.reason.clone())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Pick the renderer for `kind`, honoring the configured video mode.
pub fn renderer_for<C>(
    kind: GenerationKind,
    video_mode: VideoRenderMode,
    client: Arc<C>,
    char_budget: usize,
) -> Arc<dyn MediaRenderer>
where
    C: NarrationSynthesizer + VideoGenerator + VideoOperations + 'static,
{
    match (kind, video_mode) {
        (GenerationKind::Audio, _) => Arc::new(NarrationRenderer::new(client, char_budget)),
        (GenerationKind::Video, VideoRenderMode::Async) => {
            Arc::new(AsyncVideoRenderer::new(client, char_budget))
        }
        (GenerationKind::Video, VideoRenderMode::Sync) => {
            Arc::new(SyncVideoRenderer::new(client, char_budget))
        }
        (GenerationKind::Video, VideoRenderMode::Disabled) => {
            Arc::new(DisabledRenderer::new("video rendering disabled"))
        }
    }
}
