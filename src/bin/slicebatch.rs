//! CLI binary for slicebatch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! drives a progress bar, and prints a per-document summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use slicebatch::output::{DocumentOutcome, RunReport};
use slicebatch::prompts::{self, PRESETS};
use slicebatch::{
    BatchConfig, CancelToken, DocumentSource, FileSource, NoopObserver, PageKind, Pipeline,
    ProgressEvent, ProgressObserver, ProviderParser, SamplingParams, SharedObserver, Stage,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

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

// ── CLI progress observer using indicatif ────────────────────────────────────

/// One bar, reused for each stage of each document. Parsing events arrive out
/// of page order, so the bar is positioned from the event's counters rather
/// than incremented.
struct CliProgress {
    bar: ProgressBar,
    /// Stage the bar is currently styled for (0 = none yet).
    styled: AtomicU8,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            styled: AtomicU8::new(0),
        })
    }

    fn restyle(&self, stage: Stage, total: usize, document: &str) {
        let code = match stage {
            Stage::Rendering => 1,
            Stage::Parsing => 2,
            Stage::Finished => 3,
        };
        if self.styled.swap(code, Ordering::SeqCst) == code {
            return;
        }
        let prefix = match stage {
            Stage::Rendering => "Slicing",
            _ => "Parsing",
        };
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(prefix);
        self.bar.reset_elapsed();
        if stage == Stage::Rendering {
            self.bar
                .println(format!("{} {}", cyan("◆"), bold(&format!("Slicing {document}…"))));
        }
    }
}

impl ProgressObserver for CliProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event.stage {
            Stage::Rendering | Stage::Parsing => {
                self.restyle(event.stage, event.total, &event.document);
                self.bar.set_position(event.completed as u64);
                let msg = if event.failed > 0 {
                    let failed = red(&format!("{} failed", event.failed));
                    format!("{}  {}", event.current_label, failed)
                } else {
                    event.current_label.clone()
                };
                self.bar.set_message(msg);
            }
            Stage::Finished => {
                self.styled.store(0, Ordering::SeqCst);
                self.bar.set_position(0);
                let mark = if event.failed == 0 {
                    green("✔")
                } else if event.failed == event.completed {
                    red("✘")
                } else {
                    cyan("⚠")
                };
                self.bar
                    .println(format!("{} {}  {}", mark, event.document, dim(&event.status())));
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse one document with the default instruction
  slicebatch plan.pdf

  # Several documents, a built-in preset, three pages at a time
  slicebatch --preset invoice --workers 3 a.pdf b.pdf c.pdf

  # Custom instruction from a file, results under ./out
  slicebatch --prompt-file prompt.txt --output-dir out deck.pdf

  # Another vision provider through edgequake-llm
  slicebatch --provider openai --model gpt-4.1-mini deck.pdf

  # Parse image files directly, no PDF rendering
  slicebatch --images --preset table scan1.png scan2.jpg

  # List presets
  slicebatch --list-presets

OUTPUT LAYOUT (per document):
  <output-dir>/<name>/pdf/<name>.pdf          copy of the input
  <output-dir>/<name>/slice-pics/<n>.png      one image per page
  <output-dir>/<name>/summaries/<n>.txt       extracted content
  <output-dir>/<name>/summaries/<n>_error.txt failure record
  <output-dir>/<name>/summaries/_summary.txt  run summary

OUTPUT LAYOUT (--images, one directory per run):
  <output-dir>/Image Parse Results/<YYYYmmdd_HHMMSS>/images/<n>.<ext>
  <output-dir>/Image Parse Results/<YYYYmmdd_HHMMSS>/summaries/<n>.txt
  <output-dir>/Image Parse Results/<YYYYmmdd_HHMMSS>/summaries/_summary.txt

ENVIRONMENT VARIABLES:
  ARK_API_KEY             API key for the default endpoint
  SLICEBATCH_BASE_URL     OpenAI-compatible endpoint base URL
  SLICEBATCH_MODEL        Model / endpoint id
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, overrides -v / -q

Press Ctrl-C once to stop submitting pages; pages already sent finish and
the rest are recorded as cancelled.
"#;

/// Slice PDFs into page images and extract each page with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "slicebatch",
    version,
    about = "Slice PDFs into page images and extract each page with a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process (at most 20), or image files with --images.
    #[arg(required_unless_present = "list_presets")]
    inputs: Vec<PathBuf>,

    /// Treat inputs as PNG/JPEG/GIF/BMP images and parse them in one batch.
    #[arg(long)]
    images: bool,

    /// Instruction sent with every page.
    #[arg(short, long, conflicts_with_all = ["prompt_file", "preset"])]
    prompt: Option<String>,

    /// Read the instruction from a text file.
    #[arg(long, conflicts_with = "preset")]
    prompt_file: Option<PathBuf>,

    /// Use a built-in instruction (see --list-presets).
    #[arg(long)]
    preset: Option<String>,

    /// Print the built-in presets and exit.
    #[arg(long)]
    list_presets: bool,

    /// Rendering DPI (100–400).
    #[arg(long, env = "SLICEBATCH_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(100..=400))]
    dpi: u32,

    /// Pages parsed concurrently (1–5).
    #[arg(short, long, env = "SLICEBATCH_WORKERS", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..=5))]
    workers: u64,

    /// Per-page model call timeout in seconds (10–300).
    #[arg(long, env = "SLICEBATCH_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(10..=300))]
    timeout: u64,

    /// Root directory for results. Default: ~/Desktop/PDF Parse Results.
    #[arg(short, long, env = "SLICEBATCH_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Model or endpoint id.
    #[arg(long, env = "SLICEBATCH_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible base URL (`/chat/completions` is appended).
    #[arg(long, env = "SLICEBATCH_BASE_URL")]
    base_url: Option<String>,

    /// API key for the OpenAI-compatible endpoint.
    #[arg(long, env = "ARK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Use an edgequake-llm provider (openai, anthropic, gemini, ollama, …)
    /// instead of the OpenAI-compatible endpoint.
    #[arg(long, requires = "model")]
    provider: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SLICEBATCH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to libpdfium (file or containing directory).
    #[arg(long)]
    pdfium_lib: Option<PathBuf>,

    /// Write page text without the page/timestamp header.
    #[arg(long)]
    no_header: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar carries the feedback while it is shown; keep library logs to
    // errors unless asked.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    if cli.list_presets {
        for p in PRESETS {
            println!("{:<22} {}", bold(p.name), p.description);
        }
        return Ok(());
    }

    let instruction = resolve_instruction(&cli).await?;
    let config = build_config(&cli)?;

    let pipeline = match &cli.provider {
        Some(name) => {
            let model = cli.model.as_deref().unwrap_or(&config.model);
            let parser = ProviderParser::from_name(name, model, SamplingParams::from(&config))
                .context("Failed to set up LLM provider")?;
            Pipeline::new(config, Arc::new(parser))
        }
        None => Pipeline::from_config(config)
            .context("Set ARK_API_KEY or pass --api-key to use the default endpoint")?,
    };

    // ── Cancellation ─────────────────────────────────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
                if !quiet {
                    eprintln!(
                        "\n{} Cancelling: no new pages will be sent; waiting for those in flight…",
                        cyan("⚠")
                    );
                }
            }
        });
    }

    let cli_progress = show_progress.then(CliProgress::new);
    let observer: SharedObserver = match &cli_progress {
        Some(p) => Arc::clone(p) as SharedObserver,
        None => Arc::new(NoopObserver),
    };

    let sources: Vec<Box<dyn DocumentSource>> = cli
        .inputs
        .iter()
        .map(|p| Box::new(FileSource::new(p)) as Box<dyn DocumentSource>)
        .collect();

    let run = if cli.images {
        let (output_dir, report) = pipeline
            .process_images(&sources, &instruction, observer, &cancel)
            .await
            .context("Image batch failed")?;
        RunReport {
            documents: vec![DocumentOutcome::Completed { output_dir, report }],
        }
    } else {
        pipeline
            .process_documents(&sources, &instruction, observer, &cancel)
            .await
            .context("Batch failed")?
    };
    if let Some(p) = cli_progress {
        p.bar.finish_and_clear();
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialise run report")?
        );
    } else if !cli.quiet {
        print_summary(&run);
    }

    let failed = run.failed_documents();
    if failed > 0 {
        anyhow::bail!("{} of {} documents could not be processed", failed, run.documents.len());
    }
    Ok(())
}

/// `--prompt-file`, then `--prompt`, then `--preset`, then the default.
async fn resolve_instruction(cli: &Cli) -> Result<String> {
    if let Some(ref path) = cli.prompt_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        if text.trim().is_empty() {
            anyhow::bail!("Prompt file {:?} is empty", path);
        }
        return Ok(text.trim().to_string());
    }
    if let Some(ref prompt) = cli.prompt {
        if prompt.trim().is_empty() {
            anyhow::bail!("--prompt must not be empty");
        }
        return Ok(prompt.clone());
    }
    if let Some(ref name) = cli.preset {
        let preset = prompts::preset(name).with_context(|| {
            let names: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
            format!("Unknown preset '{}'; available: {}", name, names.join(", "))
        })?;
        return Ok(preset.instruction.to_string());
    }
    Ok(prompts::DEFAULT_INSTRUCTION.to_string())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .dpi(cli.dpi)
        .workers(cli.workers as usize)
        .api_timeout_secs(cli.timeout)
        .provenance_header(!cli.no_header);

    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_root(dir);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(run: &RunReport) {
    eprintln!();
    eprintln!(
        "{:<32} {:>6} {:>6} {:>6} {:>8}",
        bold("Document"),
        "Pages",
        "OK",
        "Failed",
        "Rate"
    );
    for outcome in &run.documents {
        match outcome {
            DocumentOutcome::Completed { output_dir, report } => {
                let rate = format!("{:.1}%", report.success_rate());
                eprintln!(
                    "{:<32} {:>6} {:>6} {:>6} {:>8}",
                    report.document,
                    report.total_pages,
                    green(&report.success_count.to_string()),
                    if report.failure_count > 0 {
                        red(&report.failure_count.to_string())
                    } else {
                        report.failure_count.to_string()
                    },
                    rate
                );
                eprintln!("  {}", dim(&output_dir.display().to_string()));
                for f in report.failures() {
                    match report.kind {
                        PageKind::Document => {
                            eprintln!("  {} page {}: {}", red("✗"), f.page, f.reason)
                        }
                        PageKind::Image => {
                            let name = report.labels.get(&f.page).map_or("", String::as_str);
                            eprintln!("  {} {} ({}): {}", red("✗"), name, f.page, f.reason)
                        }
                    }
                }
            }
            DocumentOutcome::Failed { document, error } => {
                eprintln!("{:<32} {}", document, red(error));
            }
        }
    }
}
