//! Conversion stage: DVI/PDF → SVG with `dvisvgm`.

use crate::config::{IntermediateFiletype, ResolvedConfig};
use crate::error::{RenderError, Stage};
use crate::pipeline::spawn_failure;
use crate::process::{ProcessOutput, ProcessRunner, SpawnSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The converter binary.
pub const CONVERTER_PROGRAM: &str = "dvisvgm";

/// Converter arguments for `input_file`, writing `output_file`.
pub fn converter_args(config: &ResolvedConfig, input_file: &str, output_file: &str) -> Vec<String> {
    let opts = &config.converter;
    let mut args = Vec::with_capacity(10);

    if config.intermediate_filetype == IntermediateFiletype::Pdf {
        args.push("--pdf".to_string());
    }
    if opts.no_fonts {
        args.push("--no-fonts".to_string());
    }
    if opts.exact_bbox {
        args.push("--exact-bbox".to_string());
    }
    if let Some(p) = opts.precision {
        args.push(format!("--precision={p}"));
    }
    if let Some(z) = opts.zoom {
        args.push(format!("--zoom={z}"));
    }
    if let Some(bbox) = opts.bbox_arg() {
        args.push(format!("--bbox={bbox}"));
    }
    args.push(format!("--page={}", opts.page));
    args.push(format!("--output={output_file}"));
    args.push(input_file.to_string());
    args
}

/// Convert `intermediate` (inside `work_dir`) to SVG text.
pub async fn convert(
    runner: &dyn ProcessRunner,
    config: &ResolvedConfig,
    work_dir: &Path,
    job_name: &str,
    intermediate: &Path,
) -> Result<(String, ProcessOutput), RenderError> {
    let input_name = intermediate
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            RenderError::Internal(format!(
                "intermediate path {} has no file name",
                intermediate.display()
            ))
        })?;
    let output_name = format!("{job_name}.svg");

    let mut spec = SpawnSpec::new(CONVERTER_PROGRAM, work_dir)
        .args(converter_args(config, &input_name, &output_name))
        .silent(config.silent)
        .timeout(Some(Duration::from_secs(config.timeout_secs)));
    for (k, v) in &config.env {
        spec = spec.env(k.as_str(), v.as_str());
    }

    let output = runner
        .run(&spec)
        .await
        .map_err(|e| spawn_failure(e, Stage::Convert))?;

    if !output.success() {
        let code = output
            .exit_code
            .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
        return Err(RenderError::ConversionFailed {
            detail: format!("{CONVERTER_PROGRAM} exited with {code}: {}", output.tail(3)),
            log: output,
        });
    }

    let svg_path = work_dir.join(&output_name);
    let svg = match tokio::fs::read(&svg_path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => {
            return Err(RenderError::ConversionFailed {
                detail: format!("{CONVERTER_PROGRAM} exited successfully but wrote no {output_name}"),
                log: output,
            })
        }
    };
    if svg.trim().is_empty() || !svg.contains("<svg") {
        return Err(RenderError::ConversionFailed {
            detail: format!("{CONVERTER_PROGRAM} produced an empty SVG"),
            log: output,
        });
    }

    debug!("converted {} → {} bytes of SVG", input_name, svg.len());
    Ok((scrub_build_paths(&svg, &input_name, work_dir), output))
}

static RE_XML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->\n?").unwrap());

/// Remove traces of the build from the SVG.
///
/// Comments naming the intermediate file or the work directory are dropped;
/// any remaining absolute work-directory path is cut down to the bare name.
pub fn scrub_build_paths(svg: &str, intermediate_name: &str, work_dir: &Path) -> String {
    let work = work_dir.to_string_lossy();
    let scrubbed = RE_XML_COMMENT.replace_all(svg, |caps: &regex::Captures| {
        let comment = &caps[0];
        if comment.contains(intermediate_name) || (!work.is_empty() && comment.contains(work.as_ref())) {
            String::new()
        } else {
            comment.to_string()
        }
    });
    if work.is_empty() {
        return scrubbed.into_owned();
    }
    scrubbed.replace(&format!("{work}/"), "").replace(work.as_ref(), "")
}
