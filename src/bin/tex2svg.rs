//! CLI binary for tex2svg.
//!
//! A thin shim over the library crate that maps CLI flags onto a config
//! layer, renders every input through one shared [`Renderer`] and reports
//! per-input results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tex2svg::{
    BoundingBox, ComponentLayers, ConfigLayer, Engine, IntermediateFiletype, Outcome, PaperSize,
    ProgressCallback, RenderProgressCallback, Renderer, ResolvedConfig, ShellEscape, TexRequest,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished input. Inputs finish
/// out of order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    names: Vec<String>,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(names: Vec<String>) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} snippets  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(names.len() as u64);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn name(&self, index: usize) -> &str {
        self.names.get(index).map_or("?", String::as_str)
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_snippet_start(&self, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
        self.bar.set_message(self.name(index).to_string());
    }

    fn on_snippet_complete(&self, index: usize, _total: usize, outcome: Outcome, svg_len: usize) {
        let secs = self.elapsed_secs(index);
        let how = match outcome {
            Outcome::Built => "built",
            Outcome::Cached => "cached",
            Outcome::Joined => "joined",
        };
        self.bar.println(format!(
            "  {} {:<32} {:<7} {}  {}",
            green("✓"),
            self.name(index),
            how,
            dim(&format!("{svg_len:>7} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_snippet_error(&self, index: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('…');
            s
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<32} {}  {}",
            red("✗"),
            self.name(index),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} snippet(s) rendered", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} snippet(s) rendered  ({} failed)",
                if failed == total { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a math snippet from stdin
  echo '$x^2$' | tex2svg -

  # Render several TikZ files with xelatex into public/svg
  tex2svg --kind tikz --engine xelatex -o public/svg figures/*.tex

  # PDF intermediate with a 2pt margin, no optimizer
  tex2svg --filetype pdf --bbox 2pt --no-optimize formula.tex

  # Check which tools are installed
  tex2svg --doctor

CONFIG FILE (--config):
  {
    "base":       { "engine": "lualatex", "converter": { "exact_bbox": true } },
    "components": { "tikz": { "document": { "preamble": ["\\usetikzlibrary{arrows}"] } } }
  }
  Command-line flags override the file; per-kind layers apply on top of both.

ENVIRONMENT VARIABLES:
  TEX2SVG_CACHE_DIR       Cache directory (records + work dirs)
  TEX2SVG_<TOOL>_PATH     Explicit path for a tool, e.g. TEX2SVG_DVISVGM_PATH
  RUST_LOG                Override log filtering
"#;

/// Render TeX snippets to SVG.
#[derive(Parser, Debug)]
#[command(
    name = "tex2svg",
    version,
    about = "Render TeX snippets to SVG with a TeX engine and dvisvgm",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// TeX files to render; `-` reads one snippet from stdin.
    inputs: Vec<String>,

    /// Component kind: math, tikz, document, or one defined in --config.
    #[arg(long, env = "TEX2SVG_KIND", default_value = "math")]
    kind: String,

    /// TeX engine: pdflatex, xelatex, lualatex, pdflatexmk, lualatexmk.
    #[arg(long, env = "TEX2SVG_ENGINE")]
    engine: Option<Engine>,

    /// Intermediate file type: pdf or dvi.
    #[arg(long, env = "TEX2SVG_FILETYPE")]
    filetype: Option<IntermediateFiletype>,

    /// Shell escape: none, restricted, full.
    #[arg(long, env = "TEX2SVG_SHELL_ESCAPE")]
    shell_escape: Option<ShellEscape>,

    /// Directory for the generated SVG files.
    #[arg(short, long = "output-dir", env = "TEX2SVG_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Cache directory (default: platform cache dir).
    #[arg(long, env = "TEX2SVG_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Always rebuild and do not record results.
    #[arg(long, env = "TEX2SVG_NO_CACHE")]
    no_cache: bool,

    /// Skip the built-in SVG optimizer.
    #[arg(long, env = "TEX2SVG_NO_OPTIMIZE")]
    no_optimize: bool,

    /// Bounding box: one padding length (`2pt`) or four corners (`0pt,0pt,5cm,3cm`).
    #[arg(long, env = "TEX2SVG_BBOX")]
    bbox: Option<BoundingBox>,

    /// Paper-sized box: A4, letter, A5-landscape, 12cmx8cm, ...
    #[arg(long, env = "TEX2SVG_PAPER", conflicts_with = "bbox")]
    paper: Option<PaperSize>,

    /// Per-process timeout in seconds.
    #[arg(long, env = "TEX2SVG_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Snippets rendered concurrently.
    #[arg(short = 'j', long, env = "TEX2SVG_JOBS", default_value_t = 4)]
    jobs: usize,

    /// JSON file with `base` and `components` config layers.
    #[arg(long, env = "TEX2SVG_CONFIG")]
    config: Option<PathBuf>,

    /// Name artifacts by fingerprint instead of by input file stem.
    #[arg(long)]
    hash_names: bool,

    /// Print results as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Report installed tools and exit.
    #[arg(long)]
    doctor: bool,

    /// Disable the progress bar.
    #[arg(long, env = "TEX2SVG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level logs and echo tool output.
    #[arg(short, long, env = "TEX2SVG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TEX2SVG_QUIET")]
    quiet: bool,
}

/// Contents of a `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayersFile {
    #[serde(default)]
    base: ConfigLayer,
    #[serde(default)]
    components: HashMap<String, ConfigLayer>,
}

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct InputReport<'a> {
    input: &'a str,
    #[serde(flatten)]
    result: &'a tex2svg::SnippetResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.doctor;
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

    // ── Build config ─────────────────────────────────────────────────────
    let (base, components) = build_config(&cli).await?;

    if cli.doctor {
        return doctor(&base);
    }
    if cli.inputs.is_empty() {
        bail!("no inputs given (pass TeX files, or `-` for stdin)");
    }

    // ── Read inputs ──────────────────────────────────────────────────────
    let requests = read_inputs(&cli).await?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new(cli.inputs.clone()) as Arc<dyn RenderProgressCallback>)
    } else {
        None
    };

    let mut builder = Renderer::builder()
        .base_config(base)
        .component_layers(components)
        .concurrency(cli.jobs);
    if let Some(dir) = &cli.cache_dir {
        builder = builder.cache_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let renderer = builder.build().context("Invalid configuration")?;

    // ── Render ───────────────────────────────────────────────────────────
    let batch = renderer.render_batch(&requests).await;

    if cli.json {
        let reports: Vec<InputReport<'_>> = batch
            .results
            .iter()
            .map(|r| InputReport {
                input: cli.inputs.get(r.index).map_or("?", String::as_str),
                result: r,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise results")?
        );
    } else if !cli.quiet && !show_progress {
        for r in &batch.results {
            let input = cli.inputs.get(r.index).map_or("?", String::as_str);
            match &r.result {
                Ok(out) => eprintln!("{input} → {} ({:?})", out.artifact_path.display(), out.outcome),
                Err(e) => eprintln!("{input}: {e}"),
            }
        }
    }

    // Warnings and error logs go to stderr regardless of the progress bar.
    if !cli.quiet {
        for r in &batch.results {
            let input = cli.inputs.get(r.index).map_or("?", String::as_str);
            match &r.result {
                Ok(out) => {
                    for w in &out.warnings {
                        eprintln!("{} {input}: {w}", yellow("warning:"));
                    }
                }
                Err(e) if cli.verbose => {
                    if let Some(log) = e.log() {
                        eprintln!("{}", dim(&format!("── {input} ──\n{}", log.tail(20))));
                    }
                }
                Err(_) => {}
            }
        }
    }

    if batch.stats.failed > 0 {
        bail!("{} of {} input(s) failed", batch.stats.failed, batch.stats.total);
    }
    Ok(())
}

/// Map the config file and CLI flags onto a base config and component layers.
async fn build_config(cli: &Cli) -> Result<(ResolvedConfig, ComponentLayers)> {
    let file = match &cli.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str::<LayersFile>(&text)
                .with_context(|| format!("Invalid config file {:?}", path))?
        }
        None => LayersFile::default(),
    };

    let flags = flag_layer(cli)?;
    let base = tex2svg::resolve(&ResolvedConfig::default(), &file.base, &flags)
        .context("Invalid configuration")?;

    let mut components = ComponentLayers::builtin();
    for (kind, layer) in &file.components {
        components.extend(kind.as_str(), layer);
    }
    Ok((base, components))
}

fn flag_layer(cli: &Cli) -> Result<ConfigLayer> {
    let mut layer = ConfigLayer::new();
    if let Some(e) = cli.engine {
        layer = layer.set("engine", e.as_str());
    }
    if let Some(ft) = cli.filetype {
        layer = layer.set("intermediate_filetype", serde_json::to_value(ft)?);
    }
    if let Some(mode) = cli.shell_escape {
        layer = layer.set("shell_escape", serde_json::to_value(mode)?);
    }
    if let Some(dir) = &cli.output_dir {
        layer = layer.set("output_dir", dir.to_string_lossy().into_owned());
    }
    if cli.no_cache {
        layer = layer.set("caching", false);
    }
    if cli.no_optimize {
        layer = layer.set("optimizer.enabled", false);
    }
    if let Some(bbox) = cli.bbox {
        layer = layer.set("converter.bbox", bbox.to_string());
    }
    if let Some(paper) = cli.paper {
        layer = layer.set("converter.paper_size", paper.to_string());
    }
    if let Some(t) = cli.timeout {
        layer = layer.set("timeout_secs", t);
    }
    if cli.verbose {
        layer = layer.set("silent", false);
    }
    Ok(layer)
}

async fn read_inputs(cli: &Cli) -> Result<Vec<TexRequest>> {
    let mut requests = Vec::with_capacity(cli.inputs.len());
    let mut stdin_used = false;
    for input in &cli.inputs {
        let req = if input == "-" {
            if stdin_used {
                bail!("`-` (stdin) can only be given once");
            }
            stdin_used = true;
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read stdin")?;
            TexRequest::new(source)
        } else {
            let path = Path::new(input);
            let source = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {:?}", path))?;
            let mut req = TexRequest::new(source);
            if !cli.hash_names {
                if let Some(stem) = path.file_stem() {
                    req = req.with_artifact_name(stem.to_string_lossy());
                }
            }
            req
        };
        requests.push(req.with_kind(cli.kind.as_str()));
    }
    Ok(requests)
}

/// Report every tool the CLI might run, then fail if the configured ones
/// are missing.
fn doctor(base: &ResolvedConfig) -> Result<()> {
    let mut tools: Vec<&str> = Engine::ALL.iter().map(|e| e.program()).collect();
    tools.dedup();
    tools.push(tex2svg::pipeline::convert::CONVERTER_PROGRAM);

    let report = tex_toolchain::check_tools(&tools);
    for tool in &report.found {
        let version = tex_toolchain::tool_version(&tool.path)
            .unwrap_or_else(|e| dim(&e.to_string()));
        println!(
            "{} {:<10} {}  {}",
            green("✓"),
            tool.name,
            tool.path.display(),
            dim(&version)
        );
    }
    for name in &report.missing {
        println!(
            "{} {:<10} {}",
            red("✗"),
            name,
            dim(&format!("not found (set {})", tex_toolchain::override_var(name)))
        );
    }

    let required = tex_toolchain::check_tools(&base.required_tools());
    if !required.is_complete() {
        bail!(
            "missing tool(s) for the current configuration: {}",
            required.missing.join(", ")
        );
    }
    println!("{} ready: {} → dvisvgm", green("✔"), base.engine);
    Ok(())
}
