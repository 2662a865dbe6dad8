//! Output types returned by the renderer.

use crate::error::RenderError;
use crate::fingerprint::Fingerprint;
use crate::pipeline::optimize::strip_prolog;
use crate::process::ProcessOutput;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a request obtained its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// This request ran the external tools.
    Built,
    /// Served from a persisted cache record; no process was spawned.
    Cached,
    /// Joined another request's in-flight build for the same fingerprint.
    Joined,
}

/// A successfully rendered snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    /// Final SVG document.
    pub svg: String,
    pub fingerprint: Fingerprint,
    /// Where the SVG was written for this request.
    pub artifact_path: PathBuf,
    pub outcome: Outcome,
    /// Recovered problems, e.g. an optimizer failure that fell back to the
    /// raw converter output.
    pub warnings: Vec<String>,
    /// Captured output of the TeX engine and converter. Empty for cache hits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<ProcessOutput>,
    /// Wall-clock time spent on this request.
    pub duration_ms: u64,
}

impl RenderOutput {
    /// `data:image/svg+xml;base64,...` URI for `<img src=...>`.
    pub fn to_data_uri(&self) -> String {
        format!("data:image/svg+xml;base64,{}", BASE64.encode(self.svg.as_bytes()))
    }

    /// SVG markup suitable for inlining into an HTML page (no XML prolog).
    pub fn inline_markup(&self) -> String {
        strip_prolog(&self.svg)
    }
}

/// Outcome of one snippet within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetResult {
    /// Position of the request in the batch (0-based).
    pub index: usize,
    /// Component kind the request was resolved against.
    pub kind: String,
    pub result: Result<RenderOutput, RenderError>,
}

impl SnippetResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub built: usize,
    pub cached: usize,
    pub joined: usize,
    pub failed: usize,
    /// Successful snippets that carry at least one warning.
    pub with_warnings: usize,
    pub total_duration_ms: u64,
}

impl BatchStats {
    /// Tally `results`; `total_duration_ms` is left for the caller.
    pub fn from_results(results: &[SnippetResult]) -> Self {
        let mut stats = BatchStats {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            match &r.result {
                Ok(out) => {
                    match out.outcome {
                        Outcome::Built => stats.built += 1,
                        Outcome::Cached => stats.cached += 1,
                        Outcome::Joined => stats.joined += 1,
                    }
                    if !out.warnings.is_empty() {
                        stats.with_warnings += 1;
                    }
                }
                Err(_) => stats.failed += 1,
            }
        }
        stats
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

/// Results of [`crate::Renderer::render_batch`], in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub results: Vec<SnippetResult>,
    pub stats: BatchStats,
}

impl BatchOutput {
    pub fn outputs(&self) -> impl Iterator<Item = &RenderOutput> {
        self.results.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &RenderError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.index, e)))
    }
}
