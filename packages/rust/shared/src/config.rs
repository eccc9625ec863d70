//! Application configuration for Notecast.
//!
//! User config lives at `~/.notecast/notecast.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NotecastError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "notecast.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".notecast";

// ---------------------------------------------------------------------------
// Config structs (matching notecast.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Gemini provider settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Generation pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Blob storage backend.
    #[serde(default)]
    pub blob: BlobConfig,

    /// Cost accounting.
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Audio format used when `--variant` is omitted.
    #[serde(default = "default_audio_variant")]
    pub audio_variant: String,

    /// Video style used when `--variant` is omitted.
    #[serde(default = "default_video_variant")]
    pub video_variant: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            audio_variant: default_audio_variant(),
            video_variant: default_video_variant(),
        }
    }
}

fn default_database_path() -> String {
    "~/.notecast/notecast.db".into()
}
fn default_audio_variant() -> String {
    "deep_dive".into()
}
fn default_video_variant() -> String {
    "explainer".into()
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// REST base URL.
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model used for script synthesis.
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Model used for narration.
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Model used for video rendering.
    #[serde(default = "default_video_model")]
    pub video_model: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_gemini_base_url(),
            text_model: default_text_model(),
            tts_model: default_tts_model(),
            video_model: default_video_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_text_model() -> String {
    "gemini-2.5-pro".into()
}
fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".into()
}
fn default_video_model() -> String {
    "veo-3.0-generate-preview".into()
}
fn default_request_timeout() -> u64 {
    180
}

/// How video rendering is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoRenderMode {
    /// Submit a long-running operation and poll it.
    Async,
    /// Block on a single render call that returns bytes.
    Sync,
    /// Skip rendering; jobs complete with script and estimated duration only.
    Disabled,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Max characters of aggregated source context fed to the synthesizer.
    #[serde(default = "default_context_budget")]
    pub context_char_budget: usize,

    /// Max characters of script fed to narration synthesis.
    #[serde(default = "default_narration_budget")]
    pub narration_char_budget: usize,

    /// Narration rate assumed by the fallback duration estimate.
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,

    /// Delay between operation status queries.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum operation status queries before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_max_attempts: u32,

    /// Timeout for the script synthesis call.
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_secs: u64,

    /// Hard upper bound on a whole job's runtime.
    #[serde(default = "default_job_deadline")]
    pub job_deadline_secs: u64,

    /// Video render mode.
    #[serde(default = "default_video_mode")]
    pub video_mode: VideoRenderMode,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            context_char_budget: default_context_budget(),
            narration_char_budget: default_narration_budget(),
            words_per_minute: default_words_per_minute(),
            poll_interval_ms: default_poll_interval(),
            poll_max_attempts: default_poll_attempts(),
            synthesis_timeout_secs: default_synthesis_timeout(),
            job_deadline_secs: default_job_deadline(),
            video_mode: default_video_mode(),
        }
    }
}

fn default_context_budget() -> usize {
    100_000
}
fn default_narration_budget() -> usize {
    5_000
}
fn default_words_per_minute() -> u32 {
    150
}
fn default_poll_interval() -> u64 {
    10_000
}
fn default_poll_attempts() -> u32 {
    60
}
fn default_synthesis_timeout() -> u64 {
    120
}
fn default_job_deadline() -> u64 {
    900
}
fn default_video_mode() -> VideoRenderMode {
    VideoRenderMode::Async
}

/// Which blob store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    Local,
    Http,
}

/// `[blob]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_blob_backend")]
    pub backend: BlobBackend,

    /// Root directory for the local backend.
    #[serde(default = "default_blob_dir")]
    pub local_dir: String,

    /// URL prefix under which the local directory is served.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Storage API endpoint for the HTTP backend (e.g. `https://x.supabase.co/storage/v1`).
    #[serde(default)]
    pub http_endpoint: Option<String>,

    /// Bucket name for the HTTP backend.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Name of the env var holding the HTTP backend token.
    #[serde(default = "default_blob_token_env")]
    pub token_env: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            local_dir: default_blob_dir(),
            public_base_url: default_public_base_url(),
            http_endpoint: None,
            bucket: default_bucket(),
            token_env: default_blob_token_env(),
        }
    }
}

fn default_blob_backend() -> BlobBackend {
    BlobBackend::Local
}
fn default_blob_dir() -> String {
    "~/.notecast/media".into()
}
fn default_public_base_url() -> String {
    "file://~/.notecast/media".into()
}
fn default_bucket() -> String {
    "media".into()
}
fn default_blob_token_env() -> String {
    "NOTECAST_BLOB_TOKEN".into()
}

/// Per-million-token prices for one text model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// `[pricing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Token prices keyed by model name.
    #[serde(default = "default_model_prices")]
    pub models: BTreeMap<String, ModelPrice>,

    /// Model whose price applies to unknown models.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Narration cost per input character.
    #[serde(default = "default_narration_per_char")]
    pub narration_usd_per_char: f64,

    /// Video rendering cost per second of output.
    #[serde(default = "default_video_per_second")]
    pub video_usd_per_second: f64,

    /// Blob storage cost per uploaded megabyte.
    #[serde(default)]
    pub publish_usd_per_mb: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: default_model_prices(),
            fallback_model: default_fallback_model(),
            narration_usd_per_char: default_narration_per_char(),
            video_usd_per_second: default_video_per_second(),
            publish_usd_per_mb: 0.0,
        }
    }
}

fn default_model_prices() -> BTreeMap<String, ModelPrice> {
    [
        ("gemini-2.0-flash", 0.10, 0.40),
        ("gemini-2.0-flash-lite", 0.075, 0.30),
        ("gemini-2.5-pro", 1.25, 10.0),
        ("gemini-2.5-flash", 0.15, 0.60),
    ]
    .into_iter()
    .map(|(name, input, output)| {
        (
            name.to_string(),
            ModelPrice {
                input_per_million: input,
                output_per_million: output,
            },
        )
    })
    .collect()
}
fn default_fallback_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_narration_per_char() -> f64 {
    0.0001
}
fn default_video_per_second() -> f64 {
    0.10
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, derived from config file)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub context_char_budget: usize,
    pub narration_char_budget: usize,
    pub words_per_minute: u32,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub synthesis_timeout: Duration,
    pub job_deadline: Duration,
    pub text_model: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            context_char_budget: p.context_char_budget,
            narration_char_budget: p.narration_char_budget,
            words_per_minute: p.words_per_minute,
            poll_interval: Duration::from_millis(p.poll_interval_ms),
            poll_max_attempts: p.poll_max_attempts,
            synthesis_timeout: Duration::from_secs(p.synthesis_timeout_secs),
            job_deadline: Duration::from_secs(p.job_deadline_secs),
            text_model: config.gemini.text_model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.notecast/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NotecastError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.notecast/notecast.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NotecastError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| NotecastError::config(format!("failed to parse {}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NotecastError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NotecastError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NotecastError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings that would make the pipeline unbounded or degenerate.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let p = &config.pipeline;
    if p.context_char_budget == 0 || p.narration_char_budget == 0 {
        return Err(NotecastError::config("character budgets must be positive"));
    }
    if p.words_per_minute == 0 {
        return Err(NotecastError::config("words_per_minute must be positive"));
    }
    if p.poll_max_attempts == 0 {
        return Err(NotecastError::config("poll_max_attempts must be positive"));
    }
    if p.job_deadline_secs == 0 {
        return Err(NotecastError::config("job_deadline_secs must be positive"));
    }
    Ok(())
}

/// Read the Gemini API key from the configured env var.
pub fn gemini_api_key(config: &AppConfig) -> Result<String> {
    read_secret_env(&config.gemini.api_key_env, "Gemini API key")
}

/// Check that the Gemini API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    gemini_api_key(config).map(|_| ())
}

/// Read a non-empty secret from an environment variable.
pub fn read_secret_env(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(NotecastError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| NotecastError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("GOOGLE_API_KEY"));
        assert!(toml_str.contains("context_char_budget"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.context_char_budget, 100_000);
        assert_eq!(parsed.pipeline.words_per_minute, 150);
        assert_eq!(parsed.pipeline.video_mode, VideoRenderMode::Async);
        assert_eq!(parsed.pricing.models.len(), 4);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
narration_char_budget = 2000
video_mode = "disabled"

[blob]
backend = "http"
http_endpoint = "https://store.example.com/storage/v1"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.narration_char_budget, 2000);
        assert_eq!(config.pipeline.context_char_budget, 100_000);
        assert_eq!(config.pipeline.video_mode, VideoRenderMode::Disabled);
        assert_eq!(config.blob.backend, BlobBackend::Http);
        assert_eq!(config.blob.bucket, "media");
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.poll_interval, Duration::from_secs(10));
        assert_eq!(pipeline.poll_max_attempts, 60);
        assert_eq!(pipeline.job_deadline, Duration::from_secs(900));
        assert_eq!(pipeline.text_model, "gemini-2.5-pro");
    }

    #[test]
    fn zero_poll_attempts_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.poll_max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gemini.api_key_env = "NOTECAST_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/notecast.db").unwrap(),
            PathBuf::from("/var/lib/notecast.db")
        );
    }
}
