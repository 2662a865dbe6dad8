//! Compilation stage: run the TeX engine to produce the intermediate file.
//!
//! Engine command lines are fixed per [`Engine`]. Plain engines run with
//! `-interaction=nonstopmode -halt-on-error -file-line-error` so a bad
//! snippet fails fast instead of waiting on a prompt. The `*mk` engines run
//! `latexmk`, which picks the real engine from a flag and forwards the
//! shell-escape flag with `-latexoption=`.
//!
//! A custom [`CompileCommand`](crate::hooks::CompileCommand) replaces all of
//! this; engine and shell-escape selection are then the hook's business.

use crate::config::{Engine, IntermediateFiletype, ResolvedConfig};
use crate::error::{RenderError, Stage};
use crate::hooks::{CompileContext, HookRegistry};
use crate::pipeline::spawn_failure;
use crate::process::{ProcessOutput, ProcessRunner, SpawnSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Arguments for the configured engine, ending with the `.tex` file.
pub fn engine_args(config: &ResolvedConfig, job_name: &str, tex_file: &str) -> Vec<String> {
    let engine = config.engine;
    let ft = config.intermediate_filetype;
    let shell = config.shell_escape.engine_flag();
    let mut args: Vec<String> = Vec::with_capacity(10);

    if engine.is_managed() {
        let mode = match (engine, ft) {
            (Engine::Lualatexmk, IntermediateFiletype::Pdf) => "-lualatex",
            (Engine::Lualatexmk, IntermediateFiletype::Dvi) => "-dvilua",
            (_, IntermediateFiletype::Pdf) => "-pdf",
            (_, IntermediateFiletype::Dvi) => "-dvi",
        };
        args.push(mode.into());
        args.push("-norc".into());
        args.push("-interaction=nonstopmode".into());
        args.push("-halt-on-error".into());
        args.push("-file-line-error".into());
        args.push(format!("-latexoption={shell}"));
    } else {
        args.push("-interaction=nonstopmode".into());
        args.push("-halt-on-error".into());
        args.push("-file-line-error".into());
        args.push(shell.into());
        if ft == IntermediateFiletype::Dvi {
            let dvi_switch = match engine {
                Engine::Xelatex => "-no-pdf",
                _ => "-output-format=dvi",
            };
            args.push(dvi_switch.into());
        }
    }

    args.push(format!("-jobname={job_name}"));
    args.push(tex_file.into());
    args
}

/// Name of the intermediate file the engine is expected to write.
pub fn intermediate_name(config: &ResolvedConfig, job_name: &str) -> String {
    let ext = config
        .engine
        .intermediate_extension(config.intermediate_filetype);
    format!("{job_name}.{ext}")
}

/// Run the compile step in `work_dir`, which must already hold `tex_file`.
///
/// Returns the intermediate file path and the captured output.
pub async fn compile(
    runner: &dyn ProcessRunner,
    hooks: &HookRegistry,
    config: &ResolvedConfig,
    work_dir: &Path,
    job_name: &str,
    tex_file: &str,
) -> Result<(PathBuf, ProcessOutput), RenderError> {
    let intermediate = intermediate_name(config, job_name);

    let mut spec = match &config.custom_compile_command {
        Some(name) => {
            let hook = hooks.compile(name).ok_or_else(|| {
                RenderError::InvalidConfiguration(format!(
                    "custom_compile_command '{name}' is not registered"
                ))
            })?;
            let ctx = CompileContext {
                work_dir,
                job_name,
                tex_file,
                intermediate_file: &intermediate,
                config,
            };
            let line = hook.command(&ctx).map_err(|e| RenderError::CompilationFailed {
                detail: format!("compile hook '{name}' failed: {e}"),
                log: ProcessOutput::default(),
            })?;
            let mut spec = SpawnSpec::new(line.program, work_dir).args(line.args);
            for (k, v) in line.env {
                spec = spec.env(k, v);
            }
            spec
        }
        None => SpawnSpec::new(config.engine.program(), work_dir)
            .args(engine_args(config, job_name, tex_file)),
    };
    for (k, v) in &config.env {
        spec = spec.env(k.as_str(), v.as_str());
    }
    let spec = spec
        .silent(config.silent)
        .timeout(Some(Duration::from_secs(config.timeout_secs)));

    let output = runner
        .run(&spec)
        .await
        .map_err(|e| spawn_failure(e, Stage::Compile))?;

    let intermediate_path = work_dir.join(&intermediate);
    if !output.success() {
        let detail = failure_detail(work_dir, job_name, &output, &spec.program).await;
        return Err(RenderError::CompilationFailed {
            detail,
            log: output,
        });
    }
    if !tokio::fs::try_exists(&intermediate_path).await.unwrap_or(false) {
        return Err(RenderError::CompilationFailed {
            detail: format!(
                "'{}' exited successfully but did not produce {intermediate}",
                spec.program
            ),
            log: output,
        });
    }

    debug!("compiled {}", intermediate_path.display());
    Ok((intermediate_path, output))
}

async fn failure_detail(
    work_dir: &Path,
    job_name: &str,
    output: &ProcessOutput,
    program: &str,
) -> String {
    let log_path = work_dir.join(format!("{job_name}.log"));
    let from_log = match tokio::fs::read(&log_path).await {
        Ok(bytes) => first_tex_error(&String::from_utf8_lossy(&bytes)),
        Err(_) => None,
    };
    from_log
        .or_else(|| first_tex_error(&output.stdout))
        .unwrap_or_else(|| {
            let code = output
                .exit_code
                .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
            let tail = output.tail(3);
            if tail.is_empty() {
                format!("'{program}' exited with {code}")
            } else {
                format!("'{program}' exited with {code}: {tail}")
            }
        })
}

// `file:line: message` as written with -file-line-error.
static RE_FILE_LINE_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s:][^:]*:\d+: .+$").unwrap());

/// First TeX error line in a log (`! ...` or `file:line: ...`).
pub fn first_tex_error(log: &str) -> Option<String> {
    log.lines()
        .map(str::trim_end)
        .find(|l| l.starts_with("! ") || RE_FILE_LINE_ERROR.is_match(l))
        .map(str::to_string)
}
