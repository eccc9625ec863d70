//! Test doubles and fixtures shared by the core unit tests.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notecast_blob::BlobStore;
use notecast_providers::{
    Generation, NarrationAudio, NarrationSynthesizer, OperationHandle, OperationStatus, PcmFormat,
    RenderedMedia, TextGenerator, VideoGenerator, VideoOperations,
};
use notecast_shared::{
    GenerationJob, JobId, JobUpdate, NotecastError, Result, Source, SourceKind, SourceStatus,
};
use notecast_storage::Storage;
use uuid::Uuid;

use crate::ledger::JobLedger;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Fresh database in a uniquely named temp file.
pub async fn test_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("notecast_core_test_{}.db", Uuid::now_v7()));
    Storage::open(&tmp).await.expect("open test db")
}

/// A ready text source in notebook `nb-1`.
pub fn source(
    id: &str,
    name: &str,
    content: Option<&str>,
    summary: Option<&str>,
    topics: &[&str],
) -> Source {
    Source {
        id: id.into(),
        notebook_id: "nb-1".into(),
        name: name.into(),
        kind: SourceKind::Text,
        status: SourceStatus::Ready,
        content: content.map(str::to_string),
        summary: summary.map(str::to_string),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        created_at: Utc::now(),
    }
}

/// `secs` seconds of silent 24 kHz 16-bit mono PCM.
pub fn pcm_silence(secs: usize) -> Vec<u8> {
    vec![0u8; secs * 24_000 * 2]
}

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// Minimal MP4: `ftyp`, then `moov` holding an `mvhd` of the given version,
/// then a small `mdat`.
pub fn mp4_with_duration(version: u8, timescale: u32, duration: u64) -> Vec<u8> {
    let mut mvhd = vec![version, 0, 0, 0];
    if version == 1 {
        mvhd.extend_from_slice(&[0u8; 16]);
        mvhd.extend_from_slice(&timescale.to_be_bytes());
        mvhd.extend_from_slice(&duration.to_be_bytes());
    } else {
        mvhd.extend_from_slice(&[0u8; 8]);
        mvhd.extend_from_slice(&timescale.to_be_bytes());
        mvhd.extend_from_slice(&(duration as u32).to_be_bytes());
    }
    // rate, volume, matrix, next track id
    mvhd.extend_from_slice(&[0u8; 80]);

    let mut file = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2");
    file.extend(mp4_box(b"moov", &mp4_box(b"mvhd", &mvhd)));
    file.extend(mp4_box(b"mdat", &[0u8; 16]));
    file
}

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

pub struct FakeText {
    reply: std::result::Result<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl FakeText {
    pub fn ok(text: &str) -> Self {
        Self::with_reply(Ok(text.to_string()))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_reply(Err(message.to_string()))
    }

    fn with_reply(reply: std::result::Result<String, String>) -> Self {
        Self {
            reply,
            delay: None,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn generate(&self, prompt: &str, model_hint: &str) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(Generation {
                text: text.clone(),
                model: model_hint.to_string(),
                input_tokens: 10_000,
                output_tokens: 2_000,
            }),
            Err(message) => Err(NotecastError::Provider(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

pub struct FakeNarration {
    reply: std::result::Result<usize, String>,
    calls: AtomicUsize,
    last: Mutex<Option<(String, Vec<String>)>>,
}

impl FakeNarration {
    /// Answers with `secs` seconds of silence.
    pub fn seconds(secs: usize) -> Self {
        Self::with_reply(Ok(secs))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_reply(Err(message.to_string()))
    }

    fn with_reply(reply: std::result::Result<usize, String>) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(String, Vec<String>)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl NarrationSynthesizer for FakeNarration {
    async fn synthesize(&self, text: &str, speakers: &[String]) -> Result<NarrationAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((text.to_string(), speakers.to_vec()));
        match &self.reply {
            Ok(secs) => Ok(NarrationAudio {
                pcm: pcm_silence(*secs),
                format: PcmFormat::NARRATION_DEFAULT,
            }),
            Err(message) => Err(NotecastError::Provider(message.clone())),
        }
    }

    fn narration_model(&self) -> &str {
        "fake-tts"
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

enum VideoBehavior {
    CompleteAfter(u32),
    Never,
    Erroring,
    FailOperation(String),
}

/// Video provider whose operations follow a fixed script.
pub struct FakeVideo {
    behavior: VideoBehavior,
    polls: AtomicU32,
    hint: Mutex<Option<u32>>,
}

impl FakeVideo {
    fn with_behavior(behavior: VideoBehavior) -> Self {
        Self {
            behavior,
            polls: AtomicU32::new(0),
            hint: Mutex::new(None),
        }
    }

    /// `running` polls report Running, the next one succeeds.
    pub fn completing_after(running: u32) -> Self {
        Self::with_behavior(VideoBehavior::CompleteAfter(running))
    }

    pub fn never_completing() -> Self {
        Self::with_behavior(VideoBehavior::Never)
    }

    /// Every status query fails at the transport level.
    pub fn erroring() -> Self {
        Self::with_behavior(VideoBehavior::Erroring)
    }

    pub fn failing_operation(message: &str) -> Self {
        Self::with_behavior(VideoBehavior::FailOperation(message.to_string()))
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted_hint(&self) -> Option<u32> {
        *self.hint.lock().unwrap()
    }

    pub fn media() -> RenderedMedia {
        RenderedMedia {
            bytes: mp4_with_duration(0, 1000, 8_000),
            mime_type: "video/mp4".into(),
        }
    }
}

#[async_trait]
impl VideoOperations for FakeVideo {
    async fn submit(&self, _prompt: &str, duration_hint_secs: u32) -> Result<OperationHandle> {
        *self.hint.lock().unwrap() = Some(duration_hint_secs);
        Ok(OperationHandle("operations/fake-1".into()))
    }

    async fn poll_status(&self, _handle: &OperationHandle) -> Result<OperationStatus> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            VideoBehavior::CompleteAfter(running) if polls > *running => {
                Ok(OperationStatus::Succeeded(Self::media()))
            }
            VideoBehavior::CompleteAfter(_) | VideoBehavior::Never => Ok(OperationStatus::Running),
            VideoBehavior::Erroring => Err(NotecastError::Provider("connection reset".into())),
            VideoBehavior::FailOperation(message) => Ok(OperationStatus::Failed(message.clone())),
        }
    }
}

#[async_trait]
impl VideoGenerator for FakeVideo {
    async fn render(&self, _prompt: &str, duration_hint_secs: u32) -> Result<RenderedMedia> {
        *self.hint.lock().unwrap() = Some(duration_hint_secs);
        match &self.behavior {
            VideoBehavior::CompleteAfter(_) => Ok(Self::media()),
            VideoBehavior::FailOperation(message) => Err(NotecastError::Provider(message.clone())),
            VideoBehavior::Never | VideoBehavior::Erroring => {
                Err(NotecastError::Provider("render did not finish".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blob storage
// ---------------------------------------------------------------------------

/// In-memory object store with `mem://` URLs.
#[derive(Default)]
pub struct FakeBlobStore {
    objects: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeBlobStore {
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(&self, name: &str, _bytes: Vec<u8>, _mime_type: &str) -> Result<String> {
        if self.fail {
            return Err(NotecastError::Blob("bucket unavailable".into()));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.iter().any(|existing| existing == name) {
            return Err(NotecastError::Blob(format!("object already exists: {name}")));
        }
        objects.push(name.to_string());
        Ok(self.public_url(name))
    }

    fn public_url(&self, name: &str) -> String {
        format!("mem://{name}")
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.objects.lock().unwrap().retain(|existing| existing != name);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Storage-backed ledger that remembers every cost it was asked to write.
pub struct RecordingLedger {
    pub storage: Arc<Storage>,
    costs: Mutex<Vec<f64>>,
    terminal_failures: AtomicUsize,
    terminal_attempts: AtomicUsize,
}

impl RecordingLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            costs: Mutex::new(Vec::new()),
            terminal_failures: AtomicUsize::new(0),
            terminal_attempts: AtomicUsize::new(0),
        }
    }

    /// Refuse the next `count` terminal writes, as a locked database would.
    pub fn failing_terminal_writes(self, count: usize) -> Self {
        self.terminal_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn terminal_write_attempts(&self) -> usize {
        self.terminal_attempts.load(Ordering::SeqCst)
    }

    pub fn recorded_costs(&self) -> Vec<f64> {
        self.costs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobLedger for RecordingLedger {
    async fn create(&self, job: &GenerationJob) -> Result<()> {
        self.costs.lock().unwrap().push(job.cost_usd);
        self.storage.insert_job(job).await
    }

    async fn update(&self, id: &JobId, update: &JobUpdate) -> Result<()> {
        if update.status.is_some_and(|status| status.is_terminal()) {
            self.terminal_attempts.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .terminal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(NotecastError::Storage("database is locked".into()));
            }
        }
        if let Some(cost) = update.cost_usd {
            self.costs.lock().unwrap().push(cost);
        }
        self.storage.update_job(id, update).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<GenerationJob>> {
        self.storage.get_job(id).await
    }
}
