//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use notecast_blob::{BlobStore, blob_store_from_config};
use notecast_core::{GenerationRequest, Studio, StudioParts, preflight_estimate, renderer_for};
use notecast_providers::GeminiClient;
use notecast_shared::{
    AppConfig, GenerationJob, GenerationKind, JobId, JobStatus, PipelineConfig, Source, SourceKind,
    SourceStatus, Variant, expand_home, init_config, load_config, validate_api_key,
    validate_config,
};
use notecast_storage::Storage;
use tracing::{info, warn};

/// Extra time `generate` waits past the job deadline before giving up.
const WAIT_SLACK: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Notecast: turn notebook sources into narrated audio and short video.
#[derive(Parser)]
#[command(
    name = "notecast",
    version,
    about = "Generate audio overviews and short videos from notebook sources.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Media kind argument.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum KindArg {
    Audio,
    Video,
}

impl From<KindArg> for GenerationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Audio => GenerationKind::Audio,
            KindArg::Video => GenerationKind::Video,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Notebook management.
    Notebook {
        #[command(subcommand)]
        action: NotebookAction,
    },

    /// Source management.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Generate audio or video from a notebook's sources.
    Generate {
        /// What to generate.
        kind: KindArg,

        /// Notebook ID.
        #[arg(long)]
        notebook: String,

        /// Variant (e.g. deep_dive, brief, explainer). Defaults from config.
        #[arg(long)]
        variant: Option<String>,

        /// Restrict to these source IDs (repeatable). Defaults to all ready sources.
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Extra instructions prepended to the script prompt.
        #[arg(long)]
        instructions: Option<String>,

        /// Print the finished job as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage generation jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Expected duration and cost of a generation, without running it.
    Estimate {
        /// What would be generated.
        kind: KindArg,

        /// Variant. Defaults from config.
        #[arg(long)]
        variant: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Notebook subcommands.
#[derive(Subcommand)]
pub(crate) enum NotebookAction {
    /// Create a notebook.
    Create {
        /// Notebook name.
        name: String,
    },
    /// List notebooks, newest first.
    List,
}

/// Source subcommands.
#[derive(Subcommand)]
pub(crate) enum SourceAction {
    /// Add a text source to a notebook.
    Add {
        /// Notebook ID.
        #[arg(long)]
        notebook: String,

        /// Source label.
        #[arg(long)]
        name: String,

        /// Source text.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Read the source text from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Optional summary used when the body is empty.
        #[arg(long)]
        summary: Option<String>,

        /// Key topic (repeatable).
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// List a notebook's sources.
    List {
        /// Notebook ID.
        #[arg(long)]
        notebook: String,
    },
    /// Change a source's status (pending, processing, ready, failed).
    SetStatus {
        /// Source ID.
        id: String,

        /// New status.
        status: String,
    },
}

/// Job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Show one job.
    Show {
        /// Job ID.
        id: String,

        /// Print the job as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List a notebook's jobs, newest first.
    List {
        /// Notebook ID.
        #[arg(long)]
        notebook: String,
    },
    /// Delete a finished job and its published media.
    Delete {
        /// Job ID.
        id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "notecast=info",
        1 => "notecast=debug",
        _ => "notecast=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries command output; logs go to stderr
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Notebook { action } => match action {
            NotebookAction::Create { name } => cmd_notebook_create(&name).await,
            NotebookAction::List => cmd_notebook_list().await,
        },
        Command::Source { action } => match action {
            SourceAction::Add {
                notebook,
                name,
                text,
                file,
                summary,
                topics,
            } => cmd_source_add(&notebook, &name, text, file, summary, topics).await,
            SourceAction::List { notebook } => cmd_source_list(&notebook).await,
            SourceAction::SetStatus { id, status } => cmd_source_set_status(&id, &status).await,
        },
        Command::Generate {
            kind,
            notebook,
            variant,
            sources,
            instructions,
            json,
        } => {
            cmd_generate(
                kind.into(),
                notebook,
                variant.as_deref(),
                sources,
                instructions,
                json,
            )
            .await
        }
        Command::Job { action } => match action {
            JobAction::Show { id, json } => cmd_job_show(&id, json).await,
            JobAction::List { notebook } => cmd_job_list(&notebook).await,
            JobAction::Delete { id } => cmd_job_delete(&id).await,
        },
        Command::Estimate { kind, variant } => cmd_estimate(kind.into(), variant.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Open the configured database for writing, reaping jobs a crashed run left behind.
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = expand_home(&config.defaults.database_path)?;
    let storage = Storage::open(&path).await?;

    let pipeline = PipelineConfig::from(config);
    let max_age = chrono::Duration::from_std(pipeline.job_deadline * 2)
        .map_err(|e| eyre!("job deadline out of range: {e}"))?;
    storage
        .fail_stale_jobs(Utc::now() - max_age, "job abandoned: process exited before it finished")
        .await?;

    Ok(storage)
}

/// Open the configured database for reading only. Falls back to a normal
/// open when the file does not exist yet.
async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = expand_home(&config.defaults.database_path)?;
    if !path.exists() {
        return open_storage(config).await;
    }
    Ok(Storage::open_readonly(&path).await?)
}

async fn require_notebook(storage: &Storage, id: &str) -> Result<()> {
    if storage.get_notebook(id).await?.is_none() {
        return Err(eyre!("notebook '{id}' not found"));
    }
    Ok(())
}

/// Resolve `--variant`, falling back to the configured default for `kind`.
fn resolve_variant(config: &AppConfig, kind: GenerationKind, variant: Option<&str>) -> Result<Variant> {
    let name = variant.unwrap_or(match kind {
        GenerationKind::Audio => config.defaults.audio_variant.as_str(),
        GenerationKind::Video => config.defaults.video_variant.as_str(),
    });
    Ok(Variant::parse_for(kind, name)?)
}

/// Wire the pipeline to Gemini, the configured blob store and the database.
fn build_studio(config: &AppConfig, storage: Arc<Storage>) -> Result<Studio> {
    let pipeline = PipelineConfig::from(config);
    let gemini = Arc::new(GeminiClient::from_config(config)?);
    let blob_store = blob_store_from_config(&config.blob)?;
    let budget = pipeline.narration_char_budget;
    let mode = config.pipeline.video_mode;

    let parts = StudioParts {
        ledger: storage.clone(),
        catalog: storage,
        text_generator: gemini.clone(),
        audio_renderer: renderer_for(GenerationKind::Audio, mode, gemini.clone(), budget),
        video_renderer: renderer_for(GenerationKind::Video, mode, gemini, budget),
        blob_store,
    };
    Ok(Studio::new(parts, pipeline, config.pricing.clone()))
}

fn spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

fn print_job(job: &GenerationJob) {
    println!();
    println!("  Job:      {}", job.id);
    println!("  Notebook: {}", job.notebook_id);
    println!("  Kind:     {} ({})", job.kind, job.variant);
    println!("  Status:   {} ({}%)", job.status, job.progress_percent);
    if let Some(url) = &job.media_url {
        println!("  Media:    {url}");
    }
    if let Some(mime) = &job.mime_type {
        println!("  Type:     {mime}");
    }
    if let Some(secs) = job.duration_seconds {
        let label = if job.media_url.is_some() { "" } else { " (estimated)" };
        println!("  Duration: {}m {:02}s{label}", secs / 60, secs % 60);
    }
    if let Some(model) = &job.model_used {
        println!("  Model:    {model}");
    }
    println!("  Cost:     ${:.4}", job.cost_usd);
    if let Some(err) = &job.error_message {
        println!("  Error:    {err}");
    }
    println!("  Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!();
}

// ---------------------------------------------------------------------------
// Notebooks and sources
// ---------------------------------------------------------------------------

async fn cmd_notebook_create(name: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let notebook = storage.insert_notebook(name).await?;
    info!(notebook_id = %notebook.id, "notebook created");
    println!("{}", notebook.id);
    Ok(())
}

async fn cmd_notebook_list() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let notebooks = storage.list_notebooks().await?;
    if notebooks.is_empty() {
        println!("No notebooks yet. Create one with `notecast notebook create <name>`.");
        return Ok(());
    }
    for nb in notebooks {
        println!(
            "{}  {}  {}",
            nb.id,
            nb.created_at.format("%Y-%m-%d %H:%M"),
            nb.name
        );
    }
    Ok(())
}

async fn cmd_source_add(
    notebook_id: &str,
    name: &str,
    text: Option<String>,
    file: Option<PathBuf>,
    summary: Option<String>,
    topics: Vec<String>,
) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    require_notebook(&storage, notebook_id).await?;

    let content = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?,
        (None, None) => return Err(eyre!("either --text or --file is required")),
    };

    let source = Source {
        id: uuid::Uuid::now_v7().to_string(),
        notebook_id: notebook_id.to_string(),
        name: name.to_string(),
        kind: SourceKind::Text,
        status: SourceStatus::Ready,
        content: Some(content),
        summary,
        topics,
        created_at: Utc::now(),
    };
    storage.insert_source(&source).await?;
    info!(source_id = %source.id, notebook_id, "source added");
    println!("{}", source.id);
    Ok(())
}

async fn cmd_source_list(notebook_id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    require_notebook(&storage, notebook_id).await?;

    for source in storage.list_sources(notebook_id).await? {
        let chars = source.content.as_deref().map_or(0, |c| c.chars().count());
        println!(
            "{}  {:<10}  {:>8} chars  {}",
            source.id,
            source.status.as_str(),
            chars,
            source.name
        );
    }
    Ok(())
}

async fn cmd_source_set_status(id: &str, status: &str) -> Result<()> {
    let status: SourceStatus = status.parse()?;
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    storage.set_source_status(id, status).await?;
    println!("source {id} is now {}", status.as_str());
    Ok(())
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

async fn cmd_generate(
    kind: GenerationKind,
    notebook_id: String,
    variant: Option<&str>,
    sources: Vec<String>,
    instructions: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    validate_config(&config)?;
    validate_api_key(&config)?;

    let variant = resolve_variant(&config, kind, variant)?;
    let storage = Arc::new(open_storage(&config).await?);
    require_notebook(&storage, &notebook_id).await?;
    let studio = build_studio(&config, storage)?;

    let request = GenerationRequest {
        notebook_id,
        kind,
        variant: Some(variant),
        source_ids: (!sources.is_empty()).then_some(sources),
        custom_instructions: instructions,
    };

    info!(%kind, %variant, "starting generation");
    let id = studio.start_generation(request).await?;

    // the job settles by its deadline; the slack covers terminal-write retries
    let wait_until = tokio::time::Instant::now()
        + PipelineConfig::from(&config).job_deadline
        + WAIT_SLACK;
    let progress = spinner()?;
    let job = loop {
        let job = studio.get_job(&id).await?;
        progress.set_message(format!(
            "{kind} ({variant}): {} {}%",
            job.status, job.progress_percent
        ));
        if job.status.is_terminal() {
            break job;
        }
        if tokio::time::Instant::now() >= wait_until {
            progress.finish_and_clear();
            return Err(eyre!(
                "timed out waiting for job {id} (last seen {} at {}%); check it with `notecast job show {id}`",
                job.status,
                job.progress_percent
            ));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    };
    progress.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job(&job);
    }

    if job.status == JobStatus::Failed {
        return Err(eyre!(
            "generation failed: {}",
            job.error_message.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

async fn cmd_estimate(kind: GenerationKind, variant: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let variant = resolve_variant(&config, kind, variant)?;
    let estimate = preflight_estimate(variant, &config.pricing);
    let (min, max) = variant.duration_range();

    println!();
    println!("  Kind:     {} ({})", estimate.kind, estimate.variant);
    println!(
        "  Duration: ~{}s (range {min}-{max}s)",
        estimate.duration_seconds
    );
    println!("  Cost:     ~${:.2}", estimate.cost_usd);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

async fn cmd_job_show(id: &str, json: bool) -> Result<()> {
    let id: JobId = id.parse().map_err(|e| eyre!("invalid job id '{id}': {e}"))?;
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let job = storage
        .get_job(&id)
        .await?
        .ok_or_else(|| eyre!("job '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job(&job);
    }
    Ok(())
}

async fn cmd_job_list(notebook_id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    require_notebook(&storage, notebook_id).await?;

    let jobs = storage.list_jobs(notebook_id).await?;
    if jobs.is_empty() {
        println!("No jobs for notebook {notebook_id}.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<5} {:<12} {:<10} {:>3}%  {}",
            job.id,
            job.kind.as_str(),
            job.variant.as_str(),
            job.status.as_str(),
            job.progress_percent,
            job.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

async fn cmd_job_delete(id: &str) -> Result<()> {
    let id: JobId = id.parse().map_err(|e| eyre!("invalid job id '{id}': {e}"))?;
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let job = storage
        .get_job(&id)
        .await?
        .ok_or_else(|| eyre!("job '{id}' not found"))?;

    if !job.status.is_terminal() {
        return Err(eyre!("job '{id}' is still {}; wait for it to finish", job.status));
    }

    if let Some(object) = &job.media_path {
        match blob_store_from_config(&config.blob) {
            Ok(store) => {
                if let Err(e) = store.delete(object).await {
                    warn!(object = %object, error = %e, "could not delete published media");
                }
            }
            Err(e) => warn!(error = %e, "blob store unavailable, keeping published media"),
        }
    }

    storage.delete_job(&id).await?;
    println!("Deleted job {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
