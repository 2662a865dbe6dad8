//! Pipeline stages for TeX-to-SVG builds.
//!
//! Each submodule implements exactly one step. Stages talk to the outside
//! world only through a [`ProcessRunner`](crate::process::ProcessRunner) and
//! the build's work directory, so each is testable with a scripted runner.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ compile ──▶ convert ──▶ optimize
//! (.tex)     (engine)    (dvisvgm)   (rules + hooks)
//!            .dvi/.pdf   .svg        final SVG
//! ```
//!
//! 1. [`source`]: wrap the snippet into a document, normalise line endings
//! 2. [`compile`]: run the TeX engine (or a custom compile command)
//! 3. [`convert`]: run `dvisvgm` with the configured geometry
//! 4. [`optimize`]: built-in rules or a custom postprocessor, then
//!    transforms; never fatal

pub mod compile;
pub mod convert;
pub mod optimize;
pub mod source;

use crate::error::{RenderError, Stage};
use crate::process::{ProcessOutput, SpawnError};

/// Map a spawn failure onto the error taxonomy for `stage`.
pub(crate) fn spawn_failure(err: SpawnError, stage: Stage) -> RenderError {
    match err {
        SpawnError::NotFound { program } => RenderError::MissingExternalTool {
            tool: program,
            stage,
        },
        SpawnError::Timeout { program, after } => RenderError::Timeout {
            stage,
            program,
            secs: after.as_secs(),
        },
        SpawnError::Io { program, source } => {
            let detail = format!("could not run '{program}': {source}");
            if stage == Stage::Convert {
                RenderError::ConversionFailed {
                    detail,
                    log: ProcessOutput::default(),
                }
            } else {
                RenderError::CompilationFailed {
                    detail,
                    log: ProcessOutput::default(),
                }
            }
        }
    }
}
