//! # tex-toolchain
//!
//! Locate the external programs a TeX-to-SVG build needs (a TeX engine,
//! `latexmk`, `dvisvgm`) and report which of them are missing, so callers can
//! fail early with a readable message instead of a spawn error deep inside a
//! build.
//!
//! ## How it works
//!
//! For every requested tool name:
//!
//! 1. Checks `TEX2SVG_<TOOL>_PATH` (upper-cased, `-` → `_`) for an explicit
//!    override, e.g. `TEX2SVG_DVISVGM_PATH=/opt/texlive/bin/dvisvgm`.
//! 2. Otherwise scans every directory on `PATH` for an executable file of
//!    that name (with the platform executable suffix).
//!
//! Nothing is cached process-wide: [`check_tools`] returns a fresh
//! [`DependencyReport`] every time and the caller decides what to do with it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tex_toolchain::check_tools;
//!
//! let report = check_tools(&["pdflatex", "dvisvgm"]);
//! if !report.is_complete() {
//!     eprintln!("missing: {}", report.missing.join(", "));
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `TEX2SVG_<TOOL>_PATH`: absolute path to a specific tool.
//! - `TEX2SVG_CACHE_DIR`: override the default cache directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by tex-toolchain operations.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// The tool could not be found on `PATH` or through its override variable.
    #[error("'{tool}' was not found on PATH (set {env_var} to point at it)")]
    NotFound { tool: String, env_var: String },

    /// The tool exists but `--version` could not be run.
    #[error("Failed to run '{path}' --version: {reason}")]
    Probe { path: PathBuf, reason: String },
}

// ── Report ───────────────────────────────────────────────────────────────────

/// A located external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocation {
    /// Name the tool was requested under, e.g. `dvisvgm`.
    pub name: String,
    /// Resolved path of the executable.
    pub path: PathBuf,
}

/// Outcome of a dependency check. Built per call; never global.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    /// Tools that were located, in request order.
    pub found: Vec<ToolLocation>,
    /// Tools that could not be located, in request order.
    pub missing: Vec<String>,
}

impl DependencyReport {
    /// Returns `true` if every requested tool was found.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Path of a found tool, if it was part of this report.
    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.found
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.path.as_path())
    }

    /// Merge another report into this one, skipping names already present.
    pub fn merge(&mut self, other: DependencyReport) {
        for tool in other.found {
            if self.path_of(&tool.name).is_none() {
                self.found.push(tool);
            }
        }
        for name in other.missing {
            if !self.missing.contains(&name) {
                self.missing.push(name);
            }
        }
    }
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the default cache directory for build records and work dirs.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/tex2svg/`
/// - **Linux**: `~/.cache/tex2svg/`
/// - **Windows**: `%LOCALAPPDATA%\tex2svg\`
///
/// Override by setting `TEX2SVG_CACHE_DIR`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("TEX2SVG_CACHE_DIR") {
        if !override_dir.is_empty() {
            return PathBuf::from(override_dir);
        }
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("tex2svg")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Name of the override variable for `tool`, e.g. `TEX2SVG_DVISVGM_PATH`.
pub fn override_var(tool: &str) -> String {
    let upper: String = tool
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("TEX2SVG_{upper}_PATH")
}

/// Locate `tool`, honouring its override variable first.
pub fn find_executable(tool: &str) -> Result<PathBuf, ToolchainError> {
    let env_var = override_var(tool);

    if let Ok(p) = std::env::var(&env_var) {
        let pb = PathBuf::from(p);
        if is_executable(&pb) {
            return Ok(pb);
        }
        // Fall through: override set but stale → still try PATH.
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    find_in_dirs(tool, std::env::split_paths(&path_var))
        .ok_or(ToolchainError::NotFound {
            tool: tool.to_string(),
            env_var,
        })
}

/// Locate every tool in `tools` and collect the outcome.
pub fn check_tools(tools: &[&str]) -> DependencyReport {
    let mut report = DependencyReport::default();
    for &tool in tools {
        if report.path_of(tool).is_some() || report.missing.iter().any(|m| m == tool) {
            continue;
        }
        match find_executable(tool) {
            Ok(path) => report.found.push(ToolLocation {
                name: tool.to_string(),
                path,
            }),
            Err(_) => report.missing.push(tool.to_string()),
        }
    }
    report
}

/// Run `<path> --version` and return the first non-empty output line.
///
/// Blocking; call from `spawn_blocking` when inside an async runtime.
pub fn tool_version(path: &Path) -> Result<String, ToolchainError> {
    let output = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ToolchainError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolchainError::Probe {
            path: path.to_path_buf(),
            reason: format!("no version output (exit status {})", output.status),
        })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn find_in_dirs<I>(tool: &str, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let file_name = format!("{tool}{}", std::env::consts::EXE_SUFFIX);
    dirs.into_iter()
        .filter(|d| !d.as_os_str().is_empty())
        .map(|d| d.join(&file_name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
