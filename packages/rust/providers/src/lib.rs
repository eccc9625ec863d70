//! External generation capabilities consumed by the pipeline.
//!
//! Each capability is a small `async_trait` so the pipeline can be driven by
//! the Gemini HTTP client in production and by in-process fakes in tests.
//! Implementations report failures as [`notecast_shared::NotecastError`];
//! deciding which failures are fatal is the pipeline's job, not theirs.

mod gemini;
mod wire;

use async_trait::async_trait;
use notecast_shared::Result;

pub use gemini::GeminiClient;

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

/// Output of one text-generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Prompt in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model_hint: &str) -> Result<Generation>;
}

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

/// Layout of a raw PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Gemini TTS output: 24 kHz, 16-bit, mono.
    pub const NARRATION_DEFAULT: PcmFormat = PcmFormat {
        bits_per_sample: 16,
        sample_rate: 24_000,
        channels: 1,
    };

    /// Parse an `audio/L8`, `audio/L16` or `audio/L24` MIME type.
    ///
    /// Missing `rate` and `channels` parameters fall back to
    /// [`Self::NARRATION_DEFAULT`]. Returns `None` for anything that is not
    /// raw PCM.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next()?.to_ascii_lowercase();
        let bits_per_sample = match essence.as_str() {
            "audio/l8" => 8,
            "audio/l16" => 16,
            "audio/l24" => 24,
            _ => return None,
        };

        let mut format = Self {
            bits_per_sample,
            ..Self::NARRATION_DEFAULT
        };
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => format.sample_rate = value.trim().parse().ok().filter(|r| *r > 0)?,
                "channels" => format.channels = value.trim().parse().ok().filter(|c| *c > 0)?,
                _ => {}
            }
        }
        Some(format)
    }

    /// Canonical MIME type, e.g. `audio/L16; rate=24000; channels=1`.
    pub fn mime_type(&self) -> String {
        format!(
            "audio/L{}; rate={}; channels={}",
            self.bits_per_sample, self.sample_rate, self.channels
        )
    }

    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }
}

/// Raw little-endian signed PCM returned by narration synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationAudio {
    pub pcm: Vec<u8>,
    pub format: PcmFormat,
}

/// Text to speech. `speakers` lists the labels used in `text`, in order of
/// first appearance, so implementations can assign one voice per speaker.
#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, speakers: &[String]) -> Result<NarrationAudio>;

    /// Model name recorded for tracing.
    fn narration_model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Finished binary media.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Single blocking render call that returns finished bytes.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn render(&self, prompt: &str, duration_hint_secs: u32) -> Result<RenderedMedia>;
}

/// Opaque reference to a provider-side long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle(pub String);

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One status query's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    /// Still working.
    Running,
    /// Done with a payload.
    Succeeded(RenderedMedia),
    /// Done with an error, or done without any payload.
    Failed(String),
}

/// Submit-then-poll rendering.
#[async_trait]
pub trait VideoOperations: Send + Sync {
    async fn submit(&self, prompt: &str, duration_hint_secs: u32) -> Result<OperationHandle>;

    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_mime_roundtrip() {
        let format = PcmFormat::NARRATION_DEFAULT;
        assert_eq!(format.mime_type(), "audio/L16; rate=24000; channels=1");
        assert_eq!(PcmFormat::from_mime(&format.mime_type()), Some(format));
        assert_eq!(format.bytes_per_frame(), 2);
    }

    #[test]
    fn pcm_mime_parsing() {
        let gemini = PcmFormat::from_mime("audio/L16;codec=pcm;rate=44100").unwrap();
        assert_eq!(gemini.sample_rate, 44_100);
        assert_eq!(gemini.channels, 1);

        let stereo = PcmFormat::from_mime("audio/l24; rate=48000; channels=2").unwrap();
        assert_eq!(stereo.bits_per_sample, 24);
        assert_eq!(stereo.bytes_per_frame(), 6);

        assert!(PcmFormat::from_mime("audio/wav").is_none());
        assert!(PcmFormat::from_mime("video/mp4").is_none());
        assert!(PcmFormat::from_mime("audio/L16; rate=0").is_none());
    }
}
