//! CLI binary for edgequake-doctrans.
//!
//! Runs one job in the foreground against a file-backed store, so a job
//! interrupted here (Ctrl-C, crash) can be picked up later with
//! `doctrans resume <ID>`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doctrans::{
    detect_language, split_sentences, Correction, CorrectionMatcher, CorrectionStore,
    EndpointConfig, FileStore, Governors, GovernorLimits, Job, JobId, JobProgressCallback,
    JobRequest, JobStatus, JobTicket, Language, LanguagePair, NewCorrection, Orchestrator,
    PipelineConfig, PipelineConfigBuilder, Resumed, RetryPolicy, Stage,
};
use edgequake_doctrans::pipeline::embed::EmbeddingClient;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per stage. Units complete in order, so the bar position is the
/// job cursor.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, _job: JobId, stage: Stage, cursor: usize, total: usize) {
        let unit = match stage {
            Stage::Recognition => "pages",
            Stage::Translation => "sentences",
        };
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}  {{msg}}"
        );
        self.bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
        );
        self.bar.set_length(total as u64);
        self.bar.set_position(cursor as u64);
        self.bar.set_prefix(match stage {
            Stage::Recognition => "Recognizing",
            Stage::Translation => "Translating",
        });
        self.bar.set_message("");
        self.bar.reset_eta();
    }

    fn on_unit_complete(&self, _job: JobId, _stage: Stage, cursor: usize, _total: usize) {
        self.bar.set_position(cursor as u64);
    }

    fn on_unit_error(&self, _job: JobId, _stage: Stage, index: usize, error: &str) {
        let msg = match error.char_indices().nth(80) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} Unit {:>3}  {}", red("✗"), index + 1, red(&msg)));
    }

    fn on_paused(&self, _job: JobId, cursor: usize, total: usize) {
        self.bar.set_message(format!("paused at {cursor}/{total}"));
    }

    fn on_resumed(&self, _job: JobId, _cursor: usize, _total: usize) {
        self.bar.set_message("");
    }

    fn on_job_finished(&self, _job: JobId, _status: JobStatus) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognize scanned pages (in order) and print the text
  doctrans ocr page1.png page2.png page3.jpg

  # Recognize, then translate the result to German
  doctrans ocr scans/*.png --translate --to de -o book.de.txt

  # Translate a text file, detecting the source language
  doctrans translate --file chapter.txt --to en

  # Resume a job that was stopped or interrupted
  doctrans resume 01926f3e-7c4b-7b9e-8a43-3f9d2e1c5a77

  # Inspect a job
  doctrans status 01926f3e-7c4b-7b9e-8a43-3f9d2e1c5a77 --json

  # Add a translation correction that later jobs will reuse
  doctrans corrections add --from en --to de --source "Sign in" --translation "Anmelden"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY                 Vision provider key (recognition)
  EDGEQUAKE_LLM_PROVIDER         Vision provider override (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL                Vision model override
  DOCTRANS_TRANSLATE_API_BASE    Translation API base URL
  DOCTRANS_TRANSLATE_API_KEY     Translation API key
  DOCTRANS_TRANSLATE_MODEL       Translation model
  DOCTRANS_EMBEDDING_API_KEY     Embedding API key (similar-correction matching)
  DOCTRANS_RETRY_DELAYS          Backoff between attempts in seconds (default 2,4,8)
  DOCTRANS_STORE_DIR             Job and correction store directory
  RUST_LOG                       Log filter (overrides --verbose / --quiet)
"#;

/// Resumable OCR and translation jobs over vision and chat LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doctrans",
    version,
    about = "Resumable OCR and translation jobs over vision and chat LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding job checkpoints and corrections.
    #[arg(long, global = true, env = "DOCTRANS_STORE_DIR", default_value = ".doctrans")]
    store_dir: PathBuf,

    #[command(flatten)]
    backends: BackendArgs,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCTRANS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCTRANS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCTRANS_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID (e.g. deepseek-ai/DeepSeek-OCR, gpt-4.1-nano).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Translation API base URL.
    #[arg(long, global = true, env = "DOCTRANS_TRANSLATE_API_BASE")]
    translate_api_base: Option<String>,

    /// Translation API key.
    #[arg(long, global = true, env = "DOCTRANS_TRANSLATE_API_KEY", hide_env_values = true)]
    translate_api_key: Option<String>,

    /// Translation model (a `gemini` model switches to the generateContent API).
    #[arg(long, global = true, env = "DOCTRANS_TRANSLATE_MODEL")]
    translate_model: Option<String>,

    /// Embedding API key; enables similar-correction matching.
    #[arg(long, global = true, env = "DOCTRANS_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Attempts per upstream call (first call included).
    #[arg(long, global = true, env = "DOCTRANS_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Backoff between attempts, in seconds (e.g. "2,4,8"; the last repeats).
    #[arg(long, global = true, env = "DOCTRANS_RETRY_DELAYS")]
    retry_delays: Option<String>,

    /// Requests per minute allowed against each API.
    #[arg(long, global = true, env = "DOCTRANS_RATE_LIMIT", default_value_t = 60)]
    rate_limit: u32,

    /// Upstream calls in flight per API.
    #[arg(short, long, global = true, env = "DOCTRANS_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Do not consult or feed stored corrections when translating.
    #[arg(long, global = true)]
    no_corrections: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize page images (or .txt/.md pages) in the given order.
    Ocr {
        /// Page files, first page first.
        #[arg(required = true)]
        pages: Vec<PathBuf>,

        /// Translate the recognized text afterwards.
        #[arg(long)]
        translate: bool,

        /// Source language code, or `auto`.
        #[arg(long, default_value = "auto")]
        from: String,

        /// Target language code (required with --translate).
        #[arg(long)]
        to: Option<String>,

        /// Write the result to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate text sentence by sentence.
    Translate {
        /// Text to translate.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// File whose contents to translate.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Source language code, or `auto`.
        #[arg(long, default_value = "auto")]
        from: String,

        /// Target language code.
        #[arg(long)]
        to: String,

        /// Write the result to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate the pages of a completed OCR job as a new job.
    TranslateJob {
        /// ID of a completed OCR job.
        id: JobId,

        #[arg(long, default_value = "auto")]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resume a stopped or interrupted job from its last checkpoint.
    Resume {
        id: JobId,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Mark a job that is not running as stopped.
    Stop { id: JobId },

    /// Show progress of one or more jobs.
    Status {
        #[arg(required = true)]
        ids: Vec<JobId>,

        /// Output JSON instead of a summary line.
        #[arg(long)]
        json: bool,
    },

    /// Print the recognized or translated text of a job.
    Result {
        id: JobId,

        /// Output the full job record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Split a text file into sentences, one per line.
    Split {
        file: PathBuf,

        /// Language code (en, de, ru, zh), or `auto`.
        #[arg(long, default_value = "auto")]
        lang: String,
    },

    /// Manage translation corrections.
    #[command(subcommand)]
    Corrections(CorrectionsCommand),
}

#[derive(Subcommand, Debug)]
enum CorrectionsCommand {
    /// Store a correction.
    Add {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        translation: String,
    },

    /// List stored corrections.
    List {
        #[arg(long, requires = "to")]
        from: Option<String>,
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Write all corrections as a JSON list.
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read corrections from a JSON list written by `export`.
    Import { file: PathBuf },

    /// Delete a correction by ID.
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the progress bar is
    // shown; the bar carries the feedback.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = Arc::new(
        FileStore::open(&cli.store_dir)
            .await
            .with_context(|| format!("Failed to open store at {}", cli.store_dir.display()))?,
    );
    let config = build_config(&cli.backends)?;

    match cli.command {
        Command::Ocr {
            ref pages,
            translate,
            ref from,
            ref to,
            ref output,
        } => {
            let request = if translate {
                let Some(to) = to else {
                    bail!("--translate needs a target language (--to)");
                };
                JobRequest::ocr_then_translate(pages.clone(), LanguagePair::new(from, to))
            } else {
                JobRequest::ocr(pages.clone())
            };
            let orchestrator = build_orchestrator(&cli, &config, &store, show_progress)?;
            let ticket = orchestrator.submit(request).await.context("Failed to submit job")?;
            let job = follow(&orchestrator, ticket, cli.quiet).await?;
            emit(&job, output.as_deref())?;
        }

        Command::Translate {
            ref text,
            ref file,
            ref from,
            ref to,
            ref output,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text.clone(),
                (None, Some(path)) => tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("pass --text or --file"),
            };
            let orchestrator = build_orchestrator(&cli, &config, &store, show_progress)?;
            let ticket = orchestrator
                .submit(JobRequest::translate_text(text, LanguagePair::new(from, to)))
                .await
                .context("Failed to submit job")?;
            let job = follow(&orchestrator, ticket, cli.quiet).await?;
            emit(&job, output.as_deref())?;
        }

        Command::TranslateJob {
            id,
            ref from,
            ref to,
            ref output,
        } => {
            let orchestrator = build_orchestrator(&cli, &config, &store, show_progress)?;
            let ticket = orchestrator
                .submit_translation_of(id, LanguagePair::new(from, to))
                .await
                .context("Failed to submit job")?;
            let job = follow(&orchestrator, ticket, cli.quiet).await?;
            emit(&job, output.as_deref())?;
        }

        Command::Resume { id, ref output } => {
            let orchestrator = build_orchestrator(&cli, &config, &store, show_progress)?;
            match orchestrator.resume(id).await.context("Failed to resume job")? {
                Resumed::Restarted(ticket) => {
                    let job = follow(&orchestrator, ticket, cli.quiet).await?;
                    emit(&job, output.as_deref())?;
                }
                Resumed::Signalled => {
                    // Registries are per process, so a fresh CLI never has a live run.
                    bail!("job {id} is running in this process already");
                }
            }
        }

        Command::Stop { id } => {
            let orchestrator = Orchestrator::new(store.clone(), edgequake_doctrans::ControlRegistry::new());
            orchestrator.stop(id).await.context("Failed to stop job")?;
            let progress = orchestrator.progress(id).await?;
            eprintln!("{} Job {}: {}", green("✔"), id, progress.message);
        }

        Command::Status { ref ids, json } => {
            let orchestrator = Orchestrator::new(store.clone(), edgequake_doctrans::ControlRegistry::new());
            let snapshots =
                futures::future::join_all(ids.iter().map(|id| orchestrator.progress(*id))).await;
            for (id, snapshot) in ids.iter().zip(snapshots) {
                let progress = snapshot.with_context(|| format!("Failed to read job {id}"))?;
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&progress).context("Failed to serialize progress")?
                    );
                } else {
                    println!(
                        "{}  {:<10} {:<12} {:>4}/{:<4} {:>3}%  {}",
                        bold(&id.to_string()),
                        progress.status,
                        progress.stage,
                        progress.cursor,
                        progress.total,
                        progress.percent(),
                        dim(&progress.message),
                    );
                    if let Some(ref error) = progress.error {
                        println!("  {}", red(error));
                    }
                }
            }
        }

        Command::Result { id, json } => {
            let orchestrator = Orchestrator::new(store.clone(), edgequake_doctrans::ControlRegistry::new());
            let job = orchestrator.load(id).await.context("Failed to read job")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&job).context("Failed to serialize job")?
                );
            } else {
                emit(&job, None)?;
            }
        }

        Command::Split { ref file, ref lang } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let language = if lang == "auto" {
                detect_language(&text)
            } else {
                Language::from_code(lang)
            };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for sentence in split_sentences(&text, language) {
                writeln!(handle, "{sentence}").context("Failed to write to stdout")?;
            }
        }

        Command::Corrections(ref command) => {
            corrections(command, &config, store.clone(), cli.quiet).await?;
        }
    }

    Ok(())
}

/// Map CLI args onto the environment-derived config.
fn build_config(args: &BackendArgs) -> Result<PipelineConfig> {
    let base = PipelineConfig::from_env();
    let mut translation = base.translation.endpoint.clone();
    if let Some(ref api_base) = args.translate_api_base {
        translation = EndpointConfig {
            api_base: api_base.trim_end_matches('/').to_string(),
            ..translation
        };
    }
    if let Some(ref key) = args.translate_api_key {
        translation = translation.with_api_key(key.clone());
    }
    if let Some(ref model) = args.translate_model {
        translation.model = model.clone();
    }
    let mut embedding = base.embedding.endpoint.clone();
    if let Some(ref key) = args.embedding_api_key {
        embedding = embedding.with_api_key(key.clone());
    }

    let limits = GovernorLimits::per_minute(args.rate_limit, args.concurrency);
    let mut builder = PipelineConfigBuilder::from_config(base)
        .max_attempts(args.max_attempts)
        .recognition_limits(limits)
        .translation_limits(limits)
        .translation_endpoint(translation)
        .embedding_endpoint(embedding)
        .corrections_enabled(!args.no_corrections);
    if let Some(ref raw) = args.retry_delays {
        let delays = RetryPolicy::parse_delays(raw)
            .with_context(|| format!("Invalid --retry-delays {raw:?}"))?;
        if delays.is_empty() {
            bail!("--retry-delays needs at least one value");
        }
        builder = builder.retry_delays(delays);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.recognition_provider_name(provider.clone());
    }
    if let Some(ref model) = args.model {
        builder = builder.recognition_model(model.clone());
    }
    builder.build().context("Invalid configuration")
}

fn build_orchestrator(
    cli: &Cli,
    config: &PipelineConfig,
    store: &Arc<FileStore>,
    show_progress: bool,
) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config, store.clone(), store.clone())
        .context("Failed to set up backends")?;
    Ok(if show_progress && !cli.quiet {
        orchestrator.with_progress(CliProgressCallback::new())
    } else {
        orchestrator
    })
}

/// Wait for a run, stopping it cooperatively on Ctrl-C.
async fn follow(orchestrator: &Orchestrator, ticket: JobTicket, quiet: bool) -> Result<Job> {
    let id = ticket.id;
    if !quiet {
        eprintln!("{} Job {}", cyan("◆"), bold(&id.to_string()));
    }

    let stopper = orchestrator.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Stopping after the current unit…", cyan("⚠"));
            if let Err(e) = stopper.stop(id).await {
                eprintln!("{} {}", red("✘"), e);
            }
        }
    });
    let outcome = ticket.wait().await;
    interrupt.abort();

    let job = orchestrator.load(id).await.context("Failed to read job")?;
    match outcome {
        Ok(JobStatus::Completed) => {
            if !quiet {
                let failed = job.results.iter().filter(|r| r.is_error()).count();
                if failed == 0 {
                    eprintln!("{} {} units done", green("✔"), bold(&job.total.to_string()));
                } else {
                    eprintln!(
                        "{} {}/{} units done  ({} failed)",
                        cyan("⚠"),
                        bold(&(job.total - failed).to_string()),
                        job.total,
                        red(&failed.to_string()),
                    );
                }
            }
            Ok(job)
        }
        Ok(status) => {
            bail!(
                "job {id} {status}: {}. Resume with `doctrans resume {id}`",
                job.message
            )
        }
        Err(e) => Err(e).with_context(|| format!("Job {id} failed")),
    }
}

/// Write the job's text to `output` or stdout.
fn emit(job: &Job, output: Option<&Path>) -> Result<()> {
    let mut text = if job.kind.needs_translation() && job.stage == Stage::Translation {
        job.translated_text()
    } else {
        job.recognized_text()
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    match output {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
        None => {
            io::stdout()
                .lock()
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

async fn corrections(
    command: &CorrectionsCommand,
    config: &PipelineConfig,
    store: Arc<FileStore>,
    quiet: bool,
) -> Result<()> {
    match command {
        CorrectionsCommand::Add {
            from,
            to,
            source,
            translation,
        } => {
            let governors = Governors::from_config(config);
            let embedder = EmbeddingClient::from_config(config, governors.embedding)
                .context("Failed to set up embedding backend")?;
            let matcher = CorrectionMatcher::new(
                store,
                embedder.map(Arc::new),
                config.corrections.similarity_threshold,
            );
            let created = matcher
                .create(NewCorrection::new(source, translation, from, to))
                .await
                .context("Failed to store correction")?;
            if !quiet {
                eprintln!(
                    "{} Correction {} ({})",
                    green("✔"),
                    created.id,
                    if created.embedding.is_some() { "with embedding" } else { "exact match only" }
                );
            }
        }

        CorrectionsCommand::List { from, to } => {
            let all = match (from, to) {
                (Some(from), Some(to)) => store.load_corrections(from, to).await?,
                _ => store.list_corrections().await?,
            };
            for c in all {
                println!(
                    "{}  {}→{}  {:>3}×  \"{}\" → \"{}\"",
                    dim(&c.id.to_string()),
                    c.source_language,
                    c.target_language,
                    c.usage_count,
                    c.source_text,
                    c.corrected_translation,
                );
            }
        }

        CorrectionsCommand::Export { output } => {
            let all = store.list_corrections().await?;
            let json = serde_json::to_string_pretty(&all).context("Failed to serialize corrections")?;
            match output {
                Some(path) => std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{json}"),
            }
        }

        CorrectionsCommand::Import { file } => {
            let raw = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let imported: Vec<Correction> =
                serde_json::from_str(&raw).context("Failed to parse corrections")?;
            let existing: Vec<Uuid> = store.list_corrections().await?.iter().map(|c| c.id).collect();
            let mut added = 0;
            for correction in imported.iter().filter(|c| !existing.contains(&c.id)) {
                store.insert_correction(correction).await?;
                added += 1;
            }
            if !quiet {
                eprintln!(
                    "{} Imported {} corrections ({} already present)",
                    green("✔"),
                    added,
                    imported.len() - added
                );
            }
        }

        CorrectionsCommand::Delete { id } => {
            if !store.delete_correction(*id).await? {
                bail!("no correction with id {id}");
            }
            if !quiet {
                eprintln!("{} Deleted {}", green("✔"), id);
            }
        }
    }
    Ok(())
}
