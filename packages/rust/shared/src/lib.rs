//! Shared types, error model, and configuration for Notecast.
//!
//! This crate is the foundation depended on by all other Notecast crates.
//! It provides:
//! - [`NotecastError`], the unified error type
//! - Domain types ([`GenerationJob`], [`Variant`], [`JobStatus`], [`Source`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlobBackend, BlobConfig, DefaultsConfig, GeminiConfig, ModelPrice, PipelineConfig,
    PipelineSection, PricingConfig, VideoRenderMode, config_dir, config_file_path, expand_home,
    gemini_api_key, init_config, load_config, load_config_from, read_secret_env, validate_api_key,
    validate_config,
};
pub use error::{NotecastError, Result};
pub use types::{
    GenerationJob, GenerationKind, JobId, JobStatus, JobUpdate, Notebook, Source, SourceKind,
    SourceStatus, Variant,
};
