//! Optimization stage: shrink the raw SVG and apply user transforms.
//!
//! The stage runs in two steps:
//!
//! 1. the built-in rule set ([`OptimizerRule`]) or, when configured, a
//!    custom [`SvgPostprocess`](crate::hooks::SvgPostprocess) in its place
//! 2. every [`TransformSpec`] in declaration order
//!
//! Nothing here can fail a build. If any step errors or a hook panics, the
//! whole stage is abandoned, the pre-optimization SVG becomes the artifact
//! and the error is reported as a warning.
//!
//! ## Rule Order
//!
//! Rules run in the order listed in [`OptimizerOptions::rules`]. The default
//! order strips prolog and comments before removing empty groups, so groups
//! that only held a comment are removed too, and collapses whitespace last.

use crate::config::{OptimizerOptions, OptimizerRule, ResolvedConfig, TransformSpec};
use crate::error::{HookError, RenderError};
use crate::hooks::{HookRegistry, SvgPostprocess};
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Output of the optimization stage.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub svg: String,
    /// Set when the stage fell back to the raw SVG.
    pub fallback: Option<RenderError>,
}

/// Optimize `raw`, falling back to it unchanged on any error.
pub fn optimize(raw: String, config: &ResolvedConfig, hooks: &HookRegistry) -> Optimized {
    match run_stage(&raw, config, hooks) {
        Ok(svg) => {
            debug!("optimized SVG: {} → {} bytes", raw.len(), svg.len());
            Optimized {
                svg,
                fallback: None,
            }
        }
        Err(e) => {
            warn!("{}; keeping the un-optimized SVG", e);
            Optimized {
                svg: raw,
                fallback: Some(e),
            }
        }
    }
}

fn run_stage(
    raw: &str,
    config: &ResolvedConfig,
    hooks: &HookRegistry,
) -> Result<String, RenderError> {
    let mut svg = match &config.custom_postprocess {
        Some(name) => {
            let hook = hooks.postprocess(name).ok_or_else(|| failed(format!(
                "postprocess hook '{name}' is not registered"
            )))?;
            run_hook(&**hook, raw.to_string())
                .map_err(|e| failed(format!("postprocess hook '{name}': {e}")))?
        }
        None if config.optimizer.enabled => apply_rules(raw, &config.optimizer),
        None => raw.to_string(),
    };

    for transform in &config.postprocess {
        svg = apply_transform(svg, transform, hooks)?;
    }

    if !svg.contains("<svg") {
        return Err(failed("result no longer contains an <svg> element".into()));
    }
    Ok(svg)
}

fn apply_transform(
    svg: String,
    transform: &TransformSpec,
    hooks: &HookRegistry,
) -> Result<String, RenderError> {
    match transform {
        TransformSpec::Hook { name } => {
            let hook = hooks
                .postprocess(name)
                .ok_or_else(|| failed(format!("transform hook '{name}' is not registered")))?;
            run_hook(&**hook, svg)
                .map_err(|e| failed(format!("transform hook '{name}': {e}")))
        }
        TransformSpec::Replace {
            pattern,
            replacement,
        } => {
            let re = Regex::new(pattern)
                .map_err(|e| failed(format!("replace pattern '{pattern}': {e}")))?;
            Ok(re.replace_all(&svg, replacement.as_str()).into_owned())
        }
    }
}

/// Call a user hook, reporting a panic as a hook error.
fn run_hook(hook: &dyn SvgPostprocess, svg: String) -> Result<String, HookError> {
    panic::catch_unwind(AssertUnwindSafe(|| hook.apply(svg))).unwrap_or_else(|payload| {
        Err(HookError::new(format!("panicked: {}", panic_text(&*payload))))
    })
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string payload"
    }
}

fn failed(detail: String) -> RenderError {
    RenderError::OptimizationFailed { detail }
}

/// Apply the configured built-in rules in order.
pub fn apply_rules(svg: &str, opts: &OptimizerOptions) -> String {
    let mut s = svg.to_string();
    for rule in &opts.rules {
        s = match rule {
            OptimizerRule::StripXmlDeclaration => strip_xml_declaration(&s),
            OptimizerRule::StripDoctype => strip_doctype(&s),
            OptimizerRule::StripComments => strip_comments(&s),
            OptimizerRule::StripMetadata => strip_metadata(&s),
            OptimizerRule::RemoveEmptyGroups => remove_empty_groups(&s),
            OptimizerRule::CollapseWhitespace => collapse_whitespace(&s),
        };
    }
    if let Some(p) = opts.float_precision {
        s = round_numbers(&s, p);
    }
    s
}

/// Drop the XML declaration and DOCTYPE so the SVG can be inlined in HTML.
pub fn strip_prolog(svg: &str) -> String {
    strip_doctype(&strip_xml_declaration(svg)).trim_start().to_string()
}

// ── Rule: XML declaration ────────────────────────────────────────────────

static RE_XML_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*<\?xml[^>]*\?>\s*").unwrap());

fn strip_xml_declaration(input: &str) -> String {
    RE_XML_DECL.replace(input, "").into_owned()
}

// ── Rule: DOCTYPE ────────────────────────────────────────────────────────

static RE_DOCTYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!DOCTYPE[^>\[]*(\[.*?\])?\s*>\s*").unwrap());

fn strip_doctype(input: &str) -> String {
    RE_DOCTYPE.replace_all(input, "").into_owned()
}

// ── Rule: comments ───────────────────────────────────────────────────────

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->\s*").unwrap());

fn strip_comments(input: &str) -> String {
    RE_COMMENT.replace_all(input, "").into_owned()
}

// ── Rule: metadata ───────────────────────────────────────────────────────

static RE_METADATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<metadata\b[^>]*/>\s*|<metadata\b[^>]*>.*?</metadata>\s*").unwrap());

fn strip_metadata(input: &str) -> String {
    RE_METADATA.replace_all(input, "").into_owned()
}

// ── Rule: empty groups ───────────────────────────────────────────────────

static RE_EMPTY_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<g\b[^>]*/>|<g\b[^>]*>\s*</g>").unwrap());

/// Repeats until stable so nested empty groups disappear too.
fn remove_empty_groups(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = RE_EMPTY_GROUP.replace_all(&current, "").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

// ── Rule: whitespace ─────────────────────────────────────────────────────

static RE_INTER_TAG_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+<").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_INTER_TAG_WS.replace_all(input.trim(), "><").into_owned()
}

// ── Numeric precision ────────────────────────────────────────────────────

static RE_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d*\.\d+").unwrap());

fn round_numbers(input: &str, precision: u8) -> String {
    let digits = usize::from(precision);
    RE_DECIMAL
        .replace_all(input, |caps: &regex::Captures| {
            let text = &caps[0];
            let frac_len = text.split('.').nth(1).map_or(0, str::len);
            if frac_len <= digits {
                return text.to_string();
            }
            match text.parse::<f64>() {
                Ok(v) => format_rounded(v, digits),
                Err(_) => text.to_string(),
            }
        })
        .into_owned()
}

fn format_rounded(v: f64, digits: usize) -> String {
    let mut s = format!("{v:.digits$}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
