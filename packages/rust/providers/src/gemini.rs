//! Gemini REST client implementing every capability the pipeline consumes.
//!
//! - text: `POST {base}/models/{model}:generateContent`
//! - narration: the same endpoint on the TTS model with `responseModalities: ["AUDIO"]`
//! - video: `POST {base}/models/{model}:predictLongRunning`, then `GET {base}/{operation}`

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use notecast_shared::{AppConfig, GeminiConfig, NotecastError, Result, gemini_api_key};
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::wire::{
    ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    MultiSpeakerVoiceConfig, Operation, Part, PredictInstance, PredictParameters, PredictRequest,
    PrebuiltVoiceConfig, SpeakerVoiceConfig, SpeechConfig, VoiceConfig,
};
use crate::{
    Generation, NarrationAudio, NarrationSynthesizer, OperationHandle, OperationStatus, PcmFormat,
    RenderedMedia, TextGenerator, VideoGenerator, VideoOperations,
};

/// User-Agent string for Gemini requests.
const USER_AGENT: &str = concat!("Notecast/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Prebuilt voices, assigned to speakers in order.
const VOICE_NAMES: [&str; 5] = ["Kore", "Puck", "Charon", "Fenrir", "Aoede"];

/// Sampling temperature for script generation.
const TEXT_TEMPERATURE: f32 = 0.7;

/// Clip length bounds accepted by the video model.
const MIN_CLIP_SECS: u32 = 5;
const MAX_CLIP_SECS: u32 = 8;

/// Polling cadence for [`VideoGenerator::render`], which blocks until done.
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(10);
const SYNC_MAX_POLLS: u32 = 60;

/// HTTP client for the Gemini API.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    tts_model: String,
    video_model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, config: &GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NotecastError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tts_model: config.tts_model.clone(),
            video_model: config.video_model.clone(),
        })
    }

    /// Build a client from app config, reading the API key from the environment.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = gemini_api_key(config)?;
        Self::new(api_key, &config.gemini)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| NotecastError::Network(format!("{url}: {e}")))?;

        parse_json(url, response).await
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| NotecastError::Network(format!("{url}: {e}")))?;
        check_status(url, response).await
    }

    /// Download a generated video from its file URI.
    async fn download_video(&self, uri: &str) -> Result<RenderedMedia> {
        let response = self.get(uri).await?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or("video/mp4")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| NotecastError::Network(format!("{uri}: failed to read body: {e}")))?;

        debug!(uri, bytes = bytes.len(), %mime_type, "downloaded generated video");
        Ok(RenderedMedia {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn operation_status(&self, operation: Operation) -> Result<OperationStatus> {
        if !operation.done {
            return Ok(OperationStatus::Running);
        }
        if let Some(error) = operation.error {
            return Ok(OperationStatus::Failed(error.message));
        }

        let uri = operation
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().find_map(|s| s.video))
            .map(|v| v.uri);

        match uri {
            Some(uri) => Ok(OperationStatus::Succeeded(self.download_video(&uri).await?)),
            None => Ok(OperationStatus::Failed(
                "operation finished without a generated video".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %model_hint, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str, model_hint: &str) -> Result<Generation> {
        let url = self.model_url(model_hint, "generateContent");
        let request = GenerateContentRequest {
            contents: vec![user_text(prompt)],
            generation_config: Some(GenerationConfig {
                temperature: Some(TEXT_TEMPERATURE),
                ..Default::default()
            }),
        };

        let response: GenerateContentResponse = self.post_json(&url, &request).await?;
        let usage = response.usage_metadata.unwrap_or_default();
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        info!(
            input_tokens = usage.prompt_token_count,
            output_tokens = usage.candidates_token_count,
            "text generation complete"
        );

        Ok(Generation {
            text,
            model: response.model_version.unwrap_or_else(|| model_hint.to_string()),
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

#[async_trait]
impl NarrationSynthesizer for GeminiClient {
    #[instrument(skip_all, fields(model = %self.tts_model, chars = text.len(), speakers = speakers.len()))]
    async fn synthesize(&self, text: &str, speakers: &[String]) -> Result<NarrationAudio> {
        let url = self.model_url(&self.tts_model, "generateContent");
        let request = GenerateContentRequest {
            contents: vec![user_text(text)],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: Some(speech_config(speakers)),
                ..Default::default()
            }),
        };

        let response: GenerateContentResponse = self.post_json(&url, &request).await?;
        let inline = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or_else(|| NotecastError::Provider("TTS response carried no audio".into()))?;

        let format = PcmFormat::from_mime(&inline.mime_type).ok_or_else(|| {
            NotecastError::Provider(format!("unexpected TTS mime type: {}", inline.mime_type))
        })?;
        let pcm = BASE64
            .decode(inline.data.as_bytes())
            .map_err(|e| NotecastError::Provider(format!("invalid base64 audio: {e}")))?;

        Ok(NarrationAudio { pcm, format })
    }

    fn narration_model(&self) -> &str {
        &self.tts_model
    }
}

#[async_trait]
impl VideoOperations for GeminiClient {
    #[instrument(skip_all, fields(model = %self.video_model, hint = duration_hint_secs))]
    async fn submit(&self, prompt: &str, duration_hint_secs: u32) -> Result<OperationHandle> {
        let url = self.model_url(&self.video_model, "predictLongRunning");
        let request = PredictRequest {
            instances: vec![PredictInstance {
                prompt: prompt.to_string(),
            }],
            parameters: PredictParameters {
                duration_seconds: duration_hint_secs.clamp(MIN_CLIP_SECS, MAX_CLIP_SECS),
                aspect_ratio: "16:9".into(),
            },
        };

        let operation: Operation = self.post_json(&url, &request).await?;
        if operation.name.is_empty() {
            return Err(NotecastError::Provider(
                "video submission returned no operation name".into(),
            ));
        }
        info!(operation = %operation.name, "video operation submitted");
        Ok(OperationHandle(operation.name))
    }

    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let url = format!("{}/{}", self.base_url, handle.0.trim_start_matches('/'));
        let response = self.get(&url).await?;
        let operation: Operation = response
            .json()
            .await
            .map_err(|e| NotecastError::Provider(format!("{url}: invalid operation body: {e}")))?;
        self.operation_status(operation).await
    }
}

#[async_trait]
impl VideoGenerator for GeminiClient {
    /// Submit and block until the operation settles.
    async fn render(&self, prompt: &str, duration_hint_secs: u32) -> Result<RenderedMedia> {
        let handle = self.submit(prompt, duration_hint_secs).await?;
        for attempt in 1..=SYNC_MAX_POLLS {
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
            match self.poll_status(&handle).await {
                Ok(OperationStatus::Running) => {
                    debug!(attempt, operation = %handle, "video still rendering");
                }
                Ok(OperationStatus::Succeeded(media)) => return Ok(media),
                Ok(OperationStatus::Failed(reason)) => {
                    return Err(NotecastError::Provider(reason));
                }
                Err(e) => warn!(attempt, error = %e, "video status query failed"),
            }
        }
        Err(NotecastError::Provider(format!(
            "video operation {handle} did not finish after {SYNC_MAX_POLLS} polls"
        )))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn user_text(text: &str) -> Content {
    Content {
        role: Some("user".into()),
        parts: vec![Part {
            text: Some(text.to_string()),
            inline_data: None,
        }],
    }
}

fn voice(name: &str) -> VoiceConfig {
    VoiceConfig {
        prebuilt_voice_config: PrebuiltVoiceConfig {
            voice_name: name.to_string(),
        },
    }
}

/// One voice for zero or one speakers, otherwise one voice per speaker.
fn speech_config(speakers: &[String]) -> SpeechConfig {
    if speakers.len() <= 1 {
        return SpeechConfig {
            voice_config: Some(voice(VOICE_NAMES[0])),
            multi_speaker_voice_config: None,
        };
    }

    let speaker_voice_configs = speakers
        .iter()
        .zip(VOICE_NAMES.iter().cycle())
        .map(|(speaker, name)| SpeakerVoiceConfig {
            speaker: speaker.clone(),
            voice_config: voice(name),
        })
        .collect();

    SpeechConfig {
        voice_config: None,
        multi_speaker_voice_config: Some(MultiSpeakerVoiceConfig {
            speaker_voice_configs,
        }),
    }
}

/// Turn a non-2xx response into a provider error carrying the API's message.
async fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|env| env.error.message)
        .unwrap_or(body);
    Err(NotecastError::Provider(format!("{url}: HTTP {status}: {message}")))
}

async fn parse_json<R: DeserializeOwned>(url: &str, response: Response) -> Result<R> {
    let response = check_status(url, response).await?;
    response
        .json()
        .await
        .map_err(|e| NotecastError::Provider(format!("{url}: invalid response body: {e}")))
}
