//! Core domain types for Notecast notebooks, sources and generation jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotecastError;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for generation job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// GenerationKind & Variant
// ---------------------------------------------------------------------------

/// What kind of artifact a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Audio,
    Video,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = NotecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(NotecastError::validation(format!(
                "unknown generation kind '{other}': expected 'audio' or 'video'"
            ))),
        }
    }
}

/// Format (audio) or style (video) selector for a job.
///
/// The variant drives prompt shaping and the target duration range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    // Audio formats
    DeepDive,
    Brief,
    Critique,
    Debate,
    // Video styles
    Documentary,
    Explainer,
    Presentation,
}

impl Variant {
    /// Every variant, audio first.
    pub const ALL: [Variant; 7] = [
        Self::DeepDive,
        Self::Brief,
        Self::Critique,
        Self::Debate,
        Self::Documentary,
        Self::Explainer,
        Self::Presentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepDive => "deep_dive",
            Self::Brief => "brief",
            Self::Critique => "critique",
            Self::Debate => "debate",
            Self::Documentary => "documentary",
            Self::Explainer => "explainer",
            Self::Presentation => "presentation",
        }
    }

    /// The generation kind this variant belongs to.
    pub fn kind(&self) -> GenerationKind {
        match self {
            Self::DeepDive | Self::Brief | Self::Critique | Self::Debate => GenerationKind::Audio,
            Self::Documentary | Self::Explainer | Self::Presentation => GenerationKind::Video,
        }
    }

    /// Default variant when the caller does not pick one.
    pub fn default_for(kind: GenerationKind) -> Self {
        match kind {
            GenerationKind::Audio => Self::DeepDive,
            GenerationKind::Video => Self::Explainer,
        }
    }

    /// Variants available for a kind.
    pub fn for_kind(kind: GenerationKind) -> impl Iterator<Item = Variant> {
        Self::ALL.into_iter().filter(move |v| v.kind() == kind)
    }

    /// Target duration range `(min, max)` in seconds.
    pub fn duration_range(&self) -> (u32, u32) {
        match self {
            Self::DeepDive => (360, 900),
            Self::Brief => (60, 180),
            Self::Critique => (300, 600),
            Self::Debate => (480, 900),
            Self::Documentary => (30, 60),
            Self::Explainer => (30, 90),
            Self::Presentation => (60, 120),
        }
    }

    /// Midpoint of [`Self::duration_range`], used as the render duration hint.
    pub fn target_duration_secs(&self) -> u32 {
        let (min, max) = self.duration_range();
        (min + max) / 2
    }

    /// Parse a variant name and check that it belongs to `kind`.
    pub fn parse_for(kind: GenerationKind, s: &str) -> crate::Result<Self> {
        let variant: Variant = s.parse()?;
        if variant.kind() != kind {
            return Err(NotecastError::validation(format!(
                "variant '{variant}' is not a {kind} variant"
            )));
        }
        Ok(variant)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = NotecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| NotecastError::validation(format!("unknown variant '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a generation job.
///
/// Transitions only move forward: `pending → processing → {completed, failed}`.
/// `pending` may also go straight to `failed` (deadline or crash reaping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = NotecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(NotecastError::validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// The persisted ledger record of one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub notebook_id: String,
    pub kind: GenerationKind,
    pub variant: Variant,
    /// Sources that fed the context, in aggregation order.
    pub source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    pub status: JobStatus,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Object name inside the blob store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// A fresh `pending` job.
    pub fn new_pending(
        notebook_id: impl Into<String>,
        variant: Variant,
        source_ids: Vec<String>,
        custom_instructions: Option<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            notebook_id: notebook_id.into(),
            kind: variant.kind(),
            variant,
            source_ids,
            custom_instructions,
            status: JobStatus::Pending,
            progress_percent: 0,
            script: None,
            media_path: None,
            media_url: None,
            mime_type: None,
            duration_seconds: None,
            model_used: None,
            cost_usd: 0.0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A partial update to a ledger row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress_percent: Option<u8>,
    pub script: Option<String>,
    pub model_used: Option<String>,
    pub media_path: Option<String>,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub duration_seconds: Option<u32>,
    /// New cumulative total, not a delta.
    pub cost_usd: Option<f64>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Notebooks & sources
// ---------------------------------------------------------------------------

/// A notebook groups sources and generated artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// How a source's content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Url,
    Pdf,
    Youtube,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Pdf => "pdf",
            Self::Youtube => "youtube",
        }
    }
}

impl FromStr for SourceKind {
    type Err = NotecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "url" => Ok(Self::Url),
            "pdf" => Ok(Self::Pdf),
            "youtube" => Ok(Self::Youtube),
            other => Err(NotecastError::validation(format!(
                "unknown source kind '{other}'"
            ))),
        }
    }
}

/// Ingestion state of a source. Only `ready` sources feed generation by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = NotecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(NotecastError::validation(format!(
                "unknown source status '{other}'"
            ))),
        }
    }
}

/// A document attached to a notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub notebook_id: String,
    /// Human-readable label.
    pub name: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
    /// Full extracted text (text sources).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Extracted summary (source guide).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
}
