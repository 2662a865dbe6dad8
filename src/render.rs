//! Pipeline orchestrator.
//!
//! [`Renderer::render`] takes one [`TexRequest`] through:
//!
//! ```text
//! resolve config ─▶ fingerprint ─▶ cache record? ──yes──▶ Cached
//!                                      │ no
//!                                      ▼
//!                              acquire_or_join ──in flight──▶ Joined
//!                                      │ builder
//!                                      ▼
//!      Pending ─▶ Compiling ─▶ Converting ─▶ Optimizing ─▶ Done ─▶ commit
//!         └────────────┴─────────────┴─────────────┴──▶ Failed ─▶ fail
//! ```
//!
//! Work files live in a fingerprint-prefixed temporary directory under the
//! cache directory and are removed when the build settles. The only file a
//! build writes to the output directory is the final SVG, written atomically
//! once every stage has passed.

use crate::cache::{Acquisition, BuildArtifact, CacheManager};
use crate::config::ResolvedConfig;
use crate::error::RenderError;
use crate::fingerprint::{source_hash, Fingerprint};
use crate::hooks::HookRegistry;
use crate::layers::{self, ComponentLayers, ConfigLayer, DEFAULT_KIND};
use crate::output::{BatchOutput, BatchStats, Outcome, RenderOutput, SnippetResult};
use crate::pipeline::{compile, convert, optimize, source};
use crate::process::{ProcessOutput, ProcessRunner, TokioProcessRunner};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tex_toolchain::DependencyReport;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

// ── Request ──────────────────────────────────────────────────────────────

/// One embedded TeX snippet to render. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TexRequest {
    pub source: String,
    /// Component type (`math`, `tikz`, `document`, ...).
    pub kind: String,
    /// Per-instance overrides, merged last.
    pub overrides: ConfigLayer,
    /// Stable file stem for the artifact. Defaults to the fingerprint.
    pub artifact_name: Option<String>,
}

impl TexRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: DEFAULT_KIND.to_string(),
            overrides: ConfigLayer::new(),
            artifact_name: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigLayer) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = Some(name.into());
        self
    }
}

// ── Build state machine ──────────────────────────────────────────────────

/// State of one in-flight build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Compiling,
    Converting,
    Optimizing,
    Done,
    Failed,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Done | BuildState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: BuildState) -> bool {
        use BuildState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, Compiling) | (Compiling, Converting) | (Converting, Optimizing) => true,
            (Optimizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Pending => "pending",
            BuildState::Compiling => "compiling",
            BuildState::Converting => "converting",
            BuildState::Optimizing => "optimizing",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Transient state of one build, owned by the builder.
pub struct BuildJob<'a> {
    pub fingerprint: Fingerprint,
    pub request: &'a TexRequest,
    pub config: &'a ResolvedConfig,
    state: BuildState,
    /// Captured output of every process this build ran, in order.
    logs: Vec<ProcessOutput>,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> BuildJob<'a> {
    pub fn new(
        fingerprint: Fingerprint,
        request: &'a TexRequest,
        config: &'a ResolvedConfig,
        progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            fingerprint,
            request,
            config,
            state: BuildState::Pending,
            logs: Vec::new(),
            progress,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn logs(&self) -> &[ProcessOutput] {
        &self.logs
    }

    fn record(&mut self, output: ProcessOutput) {
        self.logs.push(output);
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: BuildState) -> Result<(), RenderError> {
        if !self.state.can_transition_to(next) {
            return Err(RenderError::Internal(format!(
                "illegal build transition {} → {}",
                self.state, next
            )));
        }
        debug!("{}: {} → {}", self.fingerprint.short(), self.state, next);
        self.state = next;
        if let Some(cb) = self.progress {
            cb.on_state_change(&self.fingerprint, next);
        }
        Ok(())
    }

    fn fail(&mut self, err: &RenderError) {
        if !self.state.is_terminal() {
            warn!("{}: failed while {}: {}", self.fingerprint.short(), self.state, err);
            self.state = BuildState::Failed;
            if let Some(cb) = self.progress {
                cb.on_state_change(&self.fingerprint, BuildState::Failed);
            }
        }
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────

/// Renders TeX snippets to SVG, sharing one cache and build-slot pool.
///
/// # Example
/// ```rust,no_run
/// use tex2svg::{Renderer, TexRequest};
///
/// # async fn run() -> Result<(), tex2svg::RenderError> {
/// let renderer = Renderer::builder().build()?;
/// let out = renderer.render(&TexRequest::new("$x^2$")).await?;
/// println!("{}", out.inline_markup());
/// # Ok(())
/// # }
/// ```
pub struct Renderer {
    base: ResolvedConfig,
    components: ComponentLayers,
    hooks: HookRegistry,
    runner: Arc<dyn ProcessRunner>,
    cache: Arc<CacheManager>,
    build_slots: Arc<Semaphore>,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("base", &self.base)
            .field("hooks", &self.hooks)
            .field("cache_dir", &self.cache.cache_dir())
            .field("concurrency", &self.concurrency)
            .field("progress_callback", &self.progress.as_ref().map(|_| "<callback>"))
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn builder() -> RendererBuilder {
        RendererBuilder::default()
    }

    pub fn base_config(&self) -> &ResolvedConfig {
        &self.base
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Snippets processed concurrently by the batch APIs.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// Resolve the configuration `req` will be built with.
    pub fn resolve(&self, req: &TexRequest) -> Result<ResolvedConfig, RenderError> {
        let empty = ConfigLayer::new();
        let component = self.components.get(&req.kind).unwrap_or_else(|| {
            debug!("no layer for component kind '{}'; using the base config", req.kind);
            &empty
        });
        let config = layers::resolve(&self.base, component, &req.overrides)?;
        self.hooks.check(&config)?;
        Ok(config)
    }

    /// Fingerprint of `req` under its resolved configuration.
    pub fn fingerprint(&self, req: &TexRequest) -> Result<Fingerprint, RenderError> {
        let config = self.resolve(req)?;
        Fingerprint::compute(&req.source, &config)
    }

    /// Report which external programs `config` needs and which are missing.
    pub fn check_dependencies(&self, config: &ResolvedConfig) -> DependencyReport {
        tex_toolchain::check_tools(&config.required_tools())
    }

    /// Render one snippet.
    ///
    /// Reuses a persisted artifact when possible, joins an identical build
    /// already in flight, and otherwise runs the pipeline as the sole builder
    /// for the fingerprint.
    pub async fn render(&self, req: &TexRequest) -> Result<RenderOutput, RenderError> {
        let start = Instant::now();

        // ── Step 1: Resolve and fingerprint ──────────────────────────────
        let config = self.resolve(req)?;
        let fp = Fingerprint::compute(&req.source, &config)?;
        let target = artifact_target(&config, req.artifact_name.as_deref(), &fp)?;
        let src_hash = source_hash(&req.source);

        // ── Step 2: Cache short-circuit ──────────────────────────────────
        if config.caching {
            if let Some((record, svg)) = self.cache.load_hit(&fp, &src_hash).await {
                info!("cache hit {} → {}", fp.short(), record.artifact_path.display());
                let path = materialize(&target, &record.artifact_path, &svg).await?;
                return Ok(finish(svg, fp, path, Outcome::Cached, Vec::new(), Vec::new(), start));
            }
            debug!("cache miss {}", fp.short());
        }

        // ── Step 3: Build or join ────────────────────────────────────────
        let ticket = match self.cache.acquire_or_join(&fp) {
            Acquisition::Waiter(waiter) => {
                info!("joining in-flight build {}", fp.short());
                let artifact = waiter.wait().await?;
                let path = materialize(&target, &artifact.artifact_path, &artifact.svg).await?;
                return Ok(finish(
                    artifact.svg.clone(),
                    fp,
                    path,
                    Outcome::Joined,
                    artifact.warnings.clone(),
                    artifact.logs.clone(),
                    start,
                ));
            }
            Acquisition::Builder(ticket) => ticket,
        };

        // A build may have committed between the lookup and the acquire.
        if config.caching {
            if let Some((record, svg)) = self.cache.load_hit(&fp, &src_hash).await {
                let shared = ticket
                    .commit(
                        BuildArtifact {
                            artifact_path: record.artifact_path.clone(),
                            svg: svg.clone(),
                            warnings: Vec::new(),
                            logs: Vec::new(),
                        },
                        src_hash,
                        false,
                    )
                    .await;
                let path = materialize(&target, &shared.artifact_path, &svg).await?;
                return Ok(finish(svg, fp, path, Outcome::Cached, Vec::new(), Vec::new(), start));
            }
        }

        let _permit = self
            .build_slots
            .acquire()
            .await
            .map_err(|_| RenderError::Internal("build slot pool was closed".into()))?;

        info!("building {} ({}, {})", fp.short(), config.engine, req.kind);
        let mut job = BuildJob::new(fp.clone(), req, &config, self.progress.as_ref());
        match self.run_job(&mut job, &target).await {
            Ok(artifact) => {
                let shared = ticket.commit(artifact, src_hash, config.caching).await;
                info!(
                    "built {} in {}ms → {}",
                    fp.short(),
                    start.elapsed().as_millis(),
                    shared.artifact_path.display()
                );
                Ok(finish(
                    shared.svg.clone(),
                    fp,
                    shared.artifact_path.clone(),
                    Outcome::Built,
                    shared.warnings.clone(),
                    shared.logs.clone(),
                    start,
                ))
            }
            Err(e) => {
                job.fail(&e);
                ticket.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Render many snippets with bounded concurrency.
    ///
    /// A failing snippet never affects its siblings; results come back in
    /// request order.
    pub async fn render_batch(&self, requests: &[TexRequest]) -> BatchOutput {
        let start = Instant::now();
        let total = requests.len();
        if let Some(cb) = &self.progress {
            cb.on_batch_start(total);
        }

        let mut results: Vec<SnippetResult> = stream::iter(
            requests
                .iter()
                .enumerate()
                .map(|(index, req)| self.render_indexed(index, total, req)),
        )
        .buffer_unordered(self.concurrency)
        .collect()
        .await;
        results.sort_by_key(|r| r.index);

        let mut stats = BatchStats::from_results(&results);
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "batch complete: {}/{} ok ({} built, {} cached, {} joined), {}ms",
            stats.succeeded(),
            stats.total,
            stats.built,
            stats.cached,
            stats.joined,
            stats.total_duration_ms
        );
        if let Some(cb) = &self.progress {
            cb.on_batch_complete(total, stats.succeeded());
        }
        BatchOutput { results, stats }
    }

    /// Synchronous wrapper around [`render`](Self::render).
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn render_sync(&self, req: &TexRequest) -> Result<RenderOutput, RenderError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| RenderError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.render(req))
    }

    pub(crate) async fn render_indexed(
        &self,
        index: usize,
        total: usize,
        req: &TexRequest,
    ) -> SnippetResult {
        if let Some(cb) = &self.progress {
            cb.on_snippet_start(index, total);
        }
        let result = self.render(req).await;
        if let Some(cb) = &self.progress {
            match &result {
                Ok(out) => cb.on_snippet_complete(index, total, out.outcome, out.svg.len()),
                Err(e) => cb.on_snippet_error(index, total, &e.to_string()),
            }
        }
        SnippetResult {
            index,
            kind: req.kind.clone(),
            result,
        }
    }

    /// Run every stage for `job`, writing the artifact to `target` last.
    async fn run_job(
        &self,
        job: &mut BuildJob<'_>,
        target: &Path,
    ) -> Result<BuildArtifact, RenderError> {
        let config = job.config;
        let job_name = source::JOB_NAME;
        let tex_file = format!("{job_name}.tex");

        // ── Step 1: Work directory ───────────────────────────────────────
        let work_root = self.cache.work_root();
        tokio::fs::create_dir_all(&work_root)
            .await
            .map_err(|e| RenderError::io(&work_root, e))?;
        let work = tempfile::Builder::new()
            .prefix(&format!("{}-", job.fingerprint.short()))
            .tempdir_in(&work_root)
            .map_err(|e| RenderError::io(&work_root, e))?;
        let tex_path = work.path().join(&tex_file);
        tokio::fs::write(&tex_path, source::prepare_document(&job.request.source, &config.document))
            .await
            .map_err(|e| RenderError::io(&tex_path, e))?;

        // ── Step 2: Compile ──────────────────────────────────────────────
        job.advance(BuildState::Compiling)?;
        let (intermediate, log) = compile::compile(
            self.runner.as_ref(),
            &self.hooks,
            config,
            work.path(),
            job_name,
            &tex_file,
        )
        .await?;
        job.record(log);

        // ── Step 3: Convert ──────────────────────────────────────────────
        job.advance(BuildState::Converting)?;
        let (raw_svg, log) = convert::convert(
            self.runner.as_ref(),
            config,
            work.path(),
            job_name,
            &intermediate,
        )
        .await?;
        job.record(log);

        // ── Step 4: Optimize ─────────────────────────────────────────────
        job.advance(BuildState::Optimizing)?;
        let optimized = optimize::optimize(raw_svg, config, &self.hooks);
        let warnings: Vec<String> = optimized.fallback.iter().map(|e| e.to_string()).collect();

        // ── Step 5: Persist the artifact ─────────────────────────────────
        write_atomic(target, &optimized.svg).await?;
        job.advance(BuildState::Done)?;

        if let Err(e) = work.close() {
            debug!("could not remove work directory: {}", e);
        }

        Ok(BuildArtifact {
            artifact_path: target.to_path_buf(),
            svg: optimized.svg,
            warnings,
            logs: job.logs().to_vec(),
        })
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`Renderer`].
pub struct RendererBuilder {
    base: ResolvedConfig,
    components: ComponentLayers,
    hooks: HookRegistry,
    runner: Option<Arc<dyn ProcessRunner>>,
    cache_dir: Option<PathBuf>,
    max_parallel_builds: usize,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl Default for RendererBuilder {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            base: ResolvedConfig::default(),
            components: ComponentLayers::builtin(),
            hooks: HookRegistry::new(),
            runner: None,
            cache_dir: None,
            max_parallel_builds: cpus,
            concurrency: 8,
            progress: None,
        }
    }
}

impl RendererBuilder {
    /// Base (global) configuration layer.
    pub fn base_config(mut self, config: ResolvedConfig) -> Self {
        self.base = config;
        self
    }

    /// Replace all component-type layers.
    pub fn component_layers(mut self, layers: ComponentLayers) -> Self {
        self.components = layers;
        self
    }

    /// Register or replace the layer for one component kind.
    pub fn component_layer(mut self, kind: impl Into<String>, layer: ConfigLayer) -> Self {
        self.components.insert(kind, layer);
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Process runner; defaults to [`TokioProcessRunner`].
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Cache directory; defaults to [`tex_toolchain::default_cache_dir`].
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Upper bound on builds running external tools at once (min 1).
    pub fn max_parallel_builds(mut self, n: usize) -> Self {
        self.max_parallel_builds = n.max(1);
        self
    }

    /// Snippets the batch APIs drive concurrently (min 1).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn build(self) -> Result<Renderer, RenderError> {
        self.base.validate()?;
        self.hooks.check(&self.base)?;
        let cache_dir = self
            .cache_dir
            .unwrap_or_else(tex_toolchain::default_cache_dir);
        Ok(Renderer {
            base: self.base,
            components: self.components,
            hooks: self.hooks,
            runner: self
                .runner
                .unwrap_or_else(|| Arc::new(TokioProcessRunner)),
            cache: Arc::new(CacheManager::new(cache_dir)),
            build_slots: Arc::new(Semaphore::new(self.max_parallel_builds)),
            concurrency: self.concurrency,
            progress: self.progress,
        })
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Absolute output path for a request: `<output_dir>/<name or fingerprint>.svg`.
///
/// Cache records outlive the working directory they were written from, so a
/// relative `output_dir` is anchored here.
fn artifact_target(
    config: &ResolvedConfig,
    name: Option<&str>,
    fp: &Fingerprint,
) -> Result<PathBuf, RenderError> {
    let stem = match name {
        Some(n) => {
            let bad = n.is_empty()
                || n == "."
                || n == ".."
                || n.contains(['/', '\\'])
                || n.chars().any(char::is_control);
            if bad {
                return Err(RenderError::InvalidConfiguration(format!(
                    "artifact name '{n}' must be a plain file stem"
                )));
            }
            n
        }
        None => fp.as_str(),
    };
    let dir = std::path::absolute(&config.output_dir)
        .map_err(|e| RenderError::io(&config.output_dir, e))?;
    Ok(dir.join(format!("{stem}.svg")))
}

/// Make sure `svg` exists at `target`, copying from a shared artifact
/// written under a different name or directory.
async fn materialize(target: &Path, existing: &Path, svg: &str) -> Result<PathBuf, RenderError> {
    if target != existing {
        write_atomic(target, svg).await?;
    }
    Ok(target.to_path_buf())
}

/// Write via a temporary sibling and rename, so readers never see a
/// partial SVG and a failed write leaves nothing behind.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::io(parent, e))?;
        }
    }
    let tmp = path.with_extension("svg.tmp");
    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(RenderError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(RenderError::io(path, e));
    }
    Ok(())
}

fn finish(
    svg: String,
    fingerprint: Fingerprint,
    artifact_path: PathBuf,
    outcome: Outcome,
    warnings: Vec<String>,
    logs: Vec<ProcessOutput>,
    start: Instant,
) -> RenderOutput {
    RenderOutput {
        svg,
        fingerprint,
        artifact_path,
        outcome,
        warnings,
        logs,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
