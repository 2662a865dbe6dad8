//! # tex2svg
//!
//! Render embedded TeX (math, TikZ diagrams, whole documents) to SVG for
//! inlining into web pages.
//!
//! ## Why this crate?
//!
//! Building a TeX snippet means running a TeX engine and a DVI/PDF-to-SVG
//! converter, two external programs with their own failure modes, and doing
//! so for hundreds of snippets per site. This crate owns the orchestration
//! around those tools: layered configuration, a content-addressed cache that
//! never serves stale output, one build per distinct snippet no matter how
//! many pages request it, and structured errors that carry the tool logs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! TexRequest
//!  │
//!  ├─ 1. Resolve      base ⊕ component layer ⊕ instance overrides → ResolvedConfig
//!  ├─ 2. Fingerprint  SHA-256 of source + output-affecting config
//!  ├─ 3. Cache        record hit → done; build in flight → join it
//!  ├─ 4. Compile      pdflatex / xelatex / lualatex / latexmk → .dvi/.xdv/.pdf
//!  ├─ 5. Convert      dvisvgm → raw SVG
//!  ├─ 6. Optimize     built-in rules or custom hook, then transforms (never fatal)
//!  └─ 7. Commit       artifact in output dir + cache record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tex2svg::{Renderer, ResolvedConfig, TexRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let renderer = Renderer::builder()
//!         .base_config(ResolvedConfig::builder().output_dir("public/svg").build()?)
//!         .build()?;
//!
//!     let out = renderer.render(&TexRequest::new(r"$e^{i\pi} + 1 = 0$")).await?;
//!     println!("{} ({:?})", out.artifact_path.display(), out.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tex2svg` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! tex2svg = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod geometry;
pub mod hooks;
pub mod layers;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod render;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheManager, CacheRecord};
pub use config::{
    DocumentTemplate, Engine, IntermediateFiletype, OptimizerOptions, OptimizerRule,
    ResolvedConfig, ResolvedConfigBuilder, ShellEscape, TransformSpec,
};
pub use error::{HookError, RenderError, Stage};
pub use fingerprint::Fingerprint;
pub use geometry::{BoundingBox, ConverterOptions, Length, LengthUnit, PaperSize};
pub use hooks::{CompileCommand, HookRegistry, SvgPostprocess};
pub use layers::{resolve, ComponentLayers, ConfigLayer};
pub use output::{BatchOutput, BatchStats, Outcome, RenderOutput, SnippetResult};
pub use process::{ProcessOutput, ProcessRunner, SpawnSpec, TokioProcessRunner};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use render::{BuildState, Renderer, RendererBuilder, TexRequest};
pub use stream::{render_stream, SnippetStream};
pub use tex_toolchain::DependencyReport;
