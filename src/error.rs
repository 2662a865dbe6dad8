//! Error types for the tex2svg library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RenderError`]: the build of one snippet did not produce an artifact
//!   (missing tool, TeX error, converter error, timeout, bad configuration).
//!   It is `Clone` because the same failure is delivered to every request that
//!   joined the in-flight build for that fingerprint.
//!
//! * [`HookError`]: a user-supplied strategy (custom compile command or SVG
//!   postprocessor) rejected its input. Compile-side hook errors become
//!   fatal [`RenderError`]s; postprocess hook errors are recovered by the
//!   optimization stage.
//!
//! A failure never aborts sibling snippets: batch APIs keep one
//! `Result` per snippet.

use crate::process::ProcessOutput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used for error attribution and progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration resolution and pre-spawn checks.
    Prepare,
    /// TeX engine run.
    Compile,
    /// DVI/PDF → SVG conversion.
    Convert,
    /// SVG optimization and user transforms.
    Optimize,
    /// Cache record and artifact persistence.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prepare => "prepare",
            Stage::Compile => "compile",
            Stage::Convert => "convert",
            Stage::Optimize => "optimize",
            Stage::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// All build errors returned by the tex2svg library.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum RenderError {
    // ── Toolchain errors ─────────────────────────────────────────────────
    /// The external program could not be spawned because it does not exist.
    #[error("'{tool}' is not installed or not on PATH (needed by the {stage} stage)")]
    MissingExternalTool { tool: String, stage: Stage },

    /// The TeX engine failed or did not produce the intermediate file.
    #[error("TeX compilation failed: {detail}")]
    CompilationFailed { detail: String, log: ProcessOutput },

    /// The DVI/PDF → SVG converter failed or produced no SVG.
    #[error("SVG conversion failed: {detail}")]
    ConversionFailed { detail: String, log: ProcessOutput },

    /// The optimizer or a transform failed. Recovered: the un-optimized SVG
    /// is used instead. Only ever surfaced as a warning.
    #[error("SVG optimization failed: {detail}")]
    OptimizationFailed { detail: String },

    /// An external process exceeded its time budget and was killed.
    #[error("'{program}' timed out after {secs}s during the {stage} stage")]
    Timeout {
        stage: Stage,
        program: String,
        secs: u64,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration is structurally unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read or write a work, cache, or output file.
    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenderError {
    /// The stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RenderError::MissingExternalTool { stage, .. } => Some(*stage),
            RenderError::CompilationFailed { .. } => Some(Stage::Compile),
            RenderError::ConversionFailed { .. } => Some(Stage::Convert),
            RenderError::OptimizationFailed { .. } => Some(Stage::Optimize),
            RenderError::Timeout { stage, .. } => Some(*stage),
            RenderError::InvalidConfiguration(_) => Some(Stage::Prepare),
            RenderError::Io { .. } => Some(Stage::Persist),
            RenderError::Internal(_) => None,
        }
    }

    /// Captured process output attached to the error, if any.
    pub fn log(&self) -> Option<&ProcessOutput> {
        match self {
            RenderError::CompilationFailed { log, .. }
            | RenderError::ConversionFailed { log, .. } => Some(log),
            _ => None,
        }
    }

    /// Whether the pipeline recovers from this error locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::OptimizationFailed { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            detail: err.to_string(),
        }
    }
}

/// Failure reported by a user-supplied hook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        HookError(msg.into())
    }
}
