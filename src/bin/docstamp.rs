//! CLI binary for docstamp.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `StampSpec` and prints result descriptors.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docstamp::{
    page_indices, parse_page_ranges, Anchor, Color, ImageStamp, MergeOptions, OutputSpec,
    PageFormat, PdfStamp, PdfTransform, PipelineConfig, Point, ProgressCallback,
    ResolveProgressCallback, ResultDescriptor, StampLayout, StampOptions, StampSource, StampSpec,
    TextStamp,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeSet, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over all inputs plus a log line per
/// input. Inputs within a batch finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} inputs  {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Fetching");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl ResolveProgressCallback for CliProgressCallback {
    fn on_resolve_start(&self, total_inputs: usize) {
        self.bar.set_length(total_inputs as u64);
        self.bar.reset_eta();
    }

    fn on_input_start(&self, index: usize) {
        self.bar.set_message(format!("input #{}", index + 1));
    }

    fn on_input_resolved(&self, index: usize, filename: &str) {
        self.bar.println(format!(
            "  {} #{:<3} {}",
            green("✓"),
            index + 1,
            dim(filename)
        ));
        self.bar.inc(1);
    }

    fn on_input_failed(&self, index: usize, error: &str) {
        let msg = match error.char_indices().nth(80) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} #{:<3} {}", red("✗"), index + 1, red(&msg)));
        self.bar.abandon();
    }

    fn on_resolve_complete(&self, total_inputs: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} inputs ready",
            green("✔"),
            bold(&total_inputs.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge local files and a URL; images become A4 pages
  docstamp merge -f cover.pdf scan.png https://example.com/annex.pdf -d merged.pdf

  # Merge without outline, print the PDF to stdout
  docstamp merge -f a.pdf b.pdf --no-outline -o text > out.pdf

  # Stamp "CONFIDENTIAL" over pages 1-2 of every file into ./out/
  docstamp stamp text -f a.pdf b.pdf -t CONFIDENTIAL -p TOP_RIGHT --over --pages 1-2 -d out

  # Image stamp, rotated and half size
  docstamp stamp image -f report.pdf -i logo.png -s 0.5 -r 90 -p br -d out

  # Use the first page of letterhead.pdf as background
  docstamp stamp pdf -f body.pdf --stamp letterhead.pdf -d out

  # HTTP API (built with --features server)
  docstamp serve --port 8080

POSITIONS:
  TOP_LEFT (tl)  TOP (t)     TOP_RIGHT (tr)
  LEFT (l)       CENTER (c)  RIGHT (r)
  BOTTOM_LEFT (bl)  BOTTOM (b)  BOTTOM_RIGHT (br)

ENVIRONMENT VARIABLES:
  Every flag can be set through DOCSTAMP_<FLAG>, e.g. DOCSTAMP_DPI=300.
  RUST_LOG overrides --verbose / --quiet.
"#;

/// Fetch, merge and stamp PDF and image documents.
#[derive(Parser, Debug)]
#[command(
    name = "docstamp",
    version,
    about = "Fetch, merge and stamp PDF and image documents",
    long_about = "Fetch PDF and image documents from local paths or HTTP(S) URLs, convert images \
to PDF pages, then merge them into one document or stamp them with text, an image or another PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSTAMP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSTAMP_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCSTAMP_NO_PROGRESS")]
    no_progress: bool,

    /// Do not verify TLS certificates of remote inputs.
    #[arg(long, global = true, env = "DOCSTAMP_INSECURE")]
    insecure: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCSTAMP_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// DPI used to fit images onto A4 pages (72, 96, 150, 300).
    #[arg(long, global = true, env = "DOCSTAMP_DPI", default_value_t = 150)]
    dpi: u32,

    /// Image scale in points per pixel; 1.0 fits images onto A4.
    #[arg(long, global = true, env = "DOCSTAMP_IMAGE_SCALE", default_value_t = 1.0)]
    image_scale: f32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Concatenate inputs into one PDF with an outline entry per input.
    Merge(MergeArgs),

    /// Stamp every input with text, an image or a PDF page.
    #[command(subcommand)]
    Stamp(StampCommand),

    /// Run the HTTP API.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Input files or URLs, in order.
    #[arg(short, long = "files", num_args = 1.., required = true)]
    files: Vec<String>,

    /// Output file, or directory to write `<name>` into.
    #[arg(short, long, env = "DOCSTAMP_DEST")]
    dest: Option<PathBuf>,

    /// Output file name.
    #[arg(short, long, env = "DOCSTAMP_NAME")]
    name: Option<String>,

    /// Do not add outline entries.
    #[arg(long, env = "DOCSTAMP_NO_OUTLINE")]
    no_outline: bool,

    /// Result format on stdout.
    #[arg(short, long, value_enum, env = "DOCSTAMP_OUTPUT", default_value = "json")]
    output: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Result descriptors as JSON.
    Json,
    /// Raw bytes of the first result.
    Text,
}

#[derive(Subcommand, Debug)]
enum StampCommand {
    /// Stamp a line of text.
    Text(TextArgs),
    /// Stamp an image.
    Image(ImageArgs),
    /// Stamp the first page of a PDF.
    Pdf(PdfArgs),
}

#[derive(Args, Debug)]
struct StampCommon {
    /// Input files or URLs, in order.
    #[arg(short, long = "files", num_args = 1.., required = true)]
    files: Vec<String>,

    /// Draw over the page content instead of under it.
    #[arg(long, env = "DOCSTAMP_OVER")]
    over: bool,

    /// Pages to stamp, e.g. 1-2,5 (1-based). Default: all.
    #[arg(long, env = "DOCSTAMP_PAGES")]
    pages: Option<String>,

    /// Directory to write stamped files into.
    #[arg(short, long, env = "DOCSTAMP_DEST")]
    dest: Option<PathBuf>,

    /// Result format on stdout.
    #[arg(short, long, value_enum, env = "DOCSTAMP_OUTPUT", default_value = "json")]
    output: OutputFormat,
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Anchor: TOP_LEFT, TOP_RIGHT, ..., CENTER or tl, tr, ..., c.
    #[arg(short, long, env = "DOCSTAMP_POSITION", default_value = "TOP_LEFT")]
    position: Anchor,

    /// Explicit top-left corner in mm, "x,y"; negative counts from right/bottom.
    #[arg(long, allow_hyphen_values = true)]
    at: Option<Point>,

    /// Shift in mm, "x,y".
    #[arg(long, allow_hyphen_values = true, default_value = "0,0")]
    offset: Point,

    /// Opacity, 0.0 to 1.0.
    #[arg(long, env = "DOCSTAMP_OPACITY", default_value_t = 1.0)]
    opacity: f32,

    /// Draw a border around the stamp.
    #[arg(long)]
    border: bool,

    /// Border width in points.
    #[arg(long, default_value_t = 1)]
    border_width: u32,

    /// Fill the stamp box with a background colour ("#rrggbb" or "r,g,b").
    #[arg(long)]
    background: Option<Color>,

    /// Page format for pages without a usable size (a4, letter, 210x297, ...).
    #[arg(long, default_value = "a4")]
    page_format: PageFormat,
}

impl LayoutArgs {
    fn layout(&self) -> StampLayout {
        StampLayout {
            page_format: self.page_format,
            opacity: self.opacity,
            border: self.border,
            border_width: self.border_width,
            background: self.background.is_some(),
            background_color: self.background.unwrap_or(Color::WHITE),
            position_name: self.position,
            position: self.at,
            position_offset: self.offset,
        }
    }
}

#[derive(Args, Debug)]
struct TextArgs {
    #[command(flatten)]
    common: StampCommon,

    #[command(flatten)]
    layout: LayoutArgs,

    /// Text to stamp.
    #[arg(short, long, env = "DOCSTAMP_TEXT")]
    text: String,

    /// Standard PDF font (Helvetica, Times-Roman, Courier-Bold, ...).
    #[arg(long, env = "DOCSTAMP_FONT", default_value = "Helvetica")]
    font: String,

    /// Font size in points.
    #[arg(long, env = "DOCSTAMP_TEXT_SIZE", default_value_t = 16.0)]
    text_size: f32,

    /// Text colour ("#rrggbb" or "r,g,b").
    #[arg(long, env = "DOCSTAMP_COLOR", default_value = "#ff0000")]
    color: Color,
}

#[derive(Args, Debug)]
struct ImageArgs {
    #[command(flatten)]
    common: StampCommon,

    #[command(flatten)]
    layout: LayoutArgs,

    /// Image file or URL.
    #[arg(short, long, env = "DOCSTAMP_IMAGE")]
    image: String,

    /// Points per image pixel.
    #[arg(short, long, env = "DOCSTAMP_SCALE", default_value_t = 1.0)]
    scale: f32,

    /// Counter-clockwise rotation in degrees.
    #[arg(short, long, env = "DOCSTAMP_ROTATE", default_value_t = 0, allow_hyphen_values = true)]
    rotate: i32,
}

#[derive(Args, Debug)]
struct PdfArgs {
    #[command(flatten)]
    common: StampCommon,

    /// PDF file or URL whose first page is the stamp.
    #[arg(long, env = "DOCSTAMP_STAMP")]
    stamp: String,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "DOCSTAMP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long, env = "DOCSTAMP_PORT", default_value_t = 8080)]
    port: u16,

    /// Maximum request body in MiB.
    #[arg(long, env = "DOCSTAMP_MAX_BODY_MB", default_value_t = 100)]
    max_body_mb: usize,

    /// Accept server-local paths in `files` text fields.
    #[arg(long, env = "DOCSTAMP_ALLOW_LOCAL_PATHS")]
    allow_local_paths: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are hidden while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && is_batch_command(&cli.command);
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ResolveProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    match cli.command {
        Command::Merge(args) => {
            let result = run_merge(&args, config).await?;
            emit(vec![result], args.output, cli.quiet)
        }
        Command::Stamp(kind) => {
            let (common, spec) = stamp_spec(kind)?;
            let results = run_stamp(&common, &spec, config).await?;
            emit(results, common.output, cli.quiet)
        }
        #[cfg(feature = "server")]
        Command::Serve(args) => {
            let server_config = docstamp::server::ServerConfig {
                host: args.host,
                port: args.port,
                max_body_mb: args.max_body_mb,
                allow_local_paths: args.allow_local_paths,
            };
            docstamp::server::serve(server_config, config)
                .await
                .context("Server failed")
        }
    }
}

fn is_batch_command(command: &Command) -> bool {
    match command {
        Command::Merge(_) | Command::Stamp(_) => true,
        #[cfg(feature = "server")]
        Command::Serve(_) => false,
    }
}

/// Map global CLI flags to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .image_scale(cli.image_scale)
        .verify_tls(!cli.insecure)
        .download_timeout_secs(cli.download_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_merge(args: &MergeArgs, config: PipelineConfig) -> Result<ResultDescriptor> {
    let output = match &args.dest {
        Some(dest) if dest.is_dir() => {
            let name = args.name.clone().unwrap_or_else(|| "merged.pdf".into());
            OutputSpec::Path(dest.join(name))
        }
        Some(dest) => OutputSpec::Path(dest.clone()),
        None => OutputSpec::Temporary,
    };

    let mut transform = PdfTransform::from_sources(&args.files, config)?;
    transform
        .merge(MergeOptions {
            name: args.name.clone(),
            outline: !args.no_outline,
            output,
        })
        .await
        .context("Merge failed")
}

fn stamp_spec(kind: StampCommand) -> Result<(StampCommon, StampSpec)> {
    Ok(match kind {
        StampCommand::Text(a) => {
            let spec = StampSpec::Text(TextStamp {
                text: a.text,
                font: a.font,
                size: a.text_size,
                color: a.color,
                over: a.common.over,
                layout: a.layout.layout(),
            });
            (a.common, spec)
        }
        StampCommand::Image(a) => {
            let spec = StampSpec::Image(ImageStamp {
                image: StampSource::parse(&a.image),
                angle: a.rotate,
                scale: a.scale,
                over: a.common.over,
                layout: a.layout.layout(),
            });
            (a.common, spec)
        }
        StampCommand::Pdf(a) => {
            let spec = StampSpec::Pdf(PdfStamp {
                stamp: StampSource::parse(&a.stamp),
                over: a.common.over,
            });
            (a.common, spec)
        }
    })
}

async fn run_stamp(
    common: &StampCommon,
    spec: &StampSpec,
    config: PipelineConfig,
) -> Result<Vec<ResultDescriptor>> {
    let mut transform = PdfTransform::from_sources(common.files.iter(), config)?;

    let pages: Option<BTreeSet<usize>> = match &common.pages {
        Some(p) => Some(page_indices(&parse_page_ranges(p)?)),
        None => None,
    };

    let documents = transform.files().await.context("Failed to resolve inputs")?;
    let outputs = match &common.dest {
        Some(dest) => output_paths(dest, documents.iter().map(|d| d.filename.as_str())),
        None => Vec::new(),
    };
    let pages = pages.map(|set| vec![set; documents.len()]);

    transform
        .stamp(
            spec,
            StampOptions {
                outputs,
                pages,
                name: None,
            },
        )
        .await
        .context("Stamp failed")
}

/// `<dest>/<stem>_stamped.pdf` per input, suffixed with `_<n>` on collisions.
fn output_paths<'a>(dest: &Path, filenames: impl Iterator<Item = &'a str>) -> Vec<OutputSpec> {
    let mut seen = HashSet::new();
    filenames
        .map(|filename| {
            let stem = Path::new(filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".into());
            let mut name = format!("{stem}_stamped.pdf");
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{stem}_stamped_{n}.pdf");
                n += 1;
            }
            OutputSpec::Path(dest.join(name))
        })
        .collect()
}

/// Print results: JSON descriptors, or the first result's raw bytes.
fn emit(mut results: Vec<ResultDescriptor>, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let summaries: Vec<_> = results.iter().map(ResultDescriptor::summary).collect();
            let json =
                serde_json::to_string_pretty(&summaries).context("Failed to serialise results")?;
            println!("{json}");
        }
        OutputFormat::Text => {
            let first = results.first_mut().context("No result to write")?;
            let bytes = first.read_all().context("Failed to read result")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(&bytes)
                .and_then(|_| handle.flush())
                .context("Failed to write to stdout")?;
        }
    }

    if !quiet {
        for r in &results {
            let target = r
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(in memory)".into());
            eprintln!("{} {}  {}", green("✔"), bold(&r.filename), dim(&target));
        }
    }
    Ok(())
}
