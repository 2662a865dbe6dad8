//! Fingerprint engine: the cache key for one build.
//!
//! A fingerprint is the SHA-256 of the line-ending-normalised source plus
//! every [`ResolvedConfig`] field that can change the artifact bytes. Fields
//! that only steer *how* a build runs are left out so toggling them never
//! causes a cache miss:
//!
//! | excluded field  | reason                                  |
//! |-----------------|-----------------------------------------|
//! | `output_dir`    | where the artifact lands, not its bytes |
//! | `caching`       | whether the record is persisted         |
//! | `timeout_secs`  | a slow build either finishes or fails   |
//! | `silent`        | live echo of tool output                |
//!
//! Custom hooks contribute their registered name only.

use crate::config::{
    DocumentTemplate, Engine, IntermediateFiletype, OptimizerOptions, ResolvedConfig, ShellEscape,
    TransformSpec,
};
use crate::error::RenderError;
use crate::geometry::ConverterOptions;
use crate::pipeline::source::normalise_line_endings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Bumped whenever the pipeline changes in a way that alters artifacts for
/// an unchanged config, so stale records are not reused.
pub const FORMAT_VERSION: u32 = 1;

/// Hex-encoded SHA-256 cache key (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `source` built with `config`.
    pub fn compute(source: &str, config: &ResolvedConfig) -> Result<Self, RenderError> {
        let normalised = normalise_line_endings(source);
        let input = HashInput {
            format_version: FORMAT_VERSION,
            source: &normalised,
            engine: config.engine,
            intermediate_filetype: config.intermediate_filetype,
            shell_escape: config.shell_escape,
            document: &config.document,
            converter: &config.converter,
            optimizer: &config.optimizer,
            postprocess: &config.postprocess,
            custom_compile_command: config.custom_compile_command.as_deref(),
            custom_postprocess: config.custom_postprocess.as_deref(),
            env: &config.env,
        };
        let bytes = serde_json::to_vec(&input)
            .map_err(|e| RenderError::Internal(format!("failed to encode hash input: {e}")))?;
        Ok(Self(hex_digest(&bytes)))
    }

    /// Accept an existing 64-character lowercase hex key.
    pub fn parse(s: &str) -> Option<Self> {
        let ok = s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        ok.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines and work-directory prefixes.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of the normalised source alone, stored in cache records.
pub fn source_hash(source: &str) -> String {
    hex_digest(normalise_line_endings(source).as_bytes())
}

/// SHA-256 of arbitrary bytes as lowercase hex.
pub fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Serialised in field order; the order is part of the key.
#[derive(Serialize)]
struct HashInput<'a> {
    format_version: u32,
    source: &'a str,
    engine: Engine,
    intermediate_filetype: IntermediateFiletype,
    shell_escape: ShellEscape,
    document: &'a DocumentTemplate,
    converter: &'a ConverterOptions,
    optimizer: &'a OptimizerOptions,
    postprocess: &'a [TransformSpec],
    custom_compile_command: Option<&'a str>,
    custom_postprocess: Option<&'a str>,
    env: &'a BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn fp(source: &str, config: &ResolvedConfig) -> Fingerprint {
        Fingerprint::compute(source, config).unwrap()
    }

    #[test]
    fn stable_and_hex() {
        let c = ResolvedConfig::default();
        let a = fp("$x^2$", &c);
        let b = fp("$x^2$", &c);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(Fingerprint::parse(a.as_str()).is_some());
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn line_endings_do_not_matter() {
        let c = ResolvedConfig::default();
        assert_eq!(fp("a\r\nb\rc\n", &c), fp("a\nb\nc\n", &c));
    }

    #[test]
    fn whitespace_does_matter() {
        let c = ResolvedConfig::default();
        assert_ne!(fp("$x^2$", &c), fp("$x^2$ ", &c));
    }

    #[test]
    fn output_affecting_fields_change_key() {
        let base = ResolvedConfig::default();
        let reference = fp("$x$", &base);

        let variants = [
            ResolvedConfig::builder().engine(Engine::Xelatex).build().unwrap(),
            ResolvedConfig::builder()
                .intermediate_filetype(IntermediateFiletype::Pdf)
                .build()
                .unwrap(),
            ResolvedConfig::builder()
                .shell_escape(ShellEscape::Restricted)
                .build()
                .unwrap(),
            ResolvedConfig::builder()
                .bbox(BoundingBox::Padding(crate::geometry::Length::pt(2.0)))
                .build()
                .unwrap(),
            ResolvedConfig::builder().optimize(false).build().unwrap(),
            ResolvedConfig::builder().custom_postprocess("minify").build().unwrap(),
            ResolvedConfig::builder().custom_compile_command("tectonic").build().unwrap(),
            ResolvedConfig::builder().env("TEXINPUTS", ".:").build().unwrap(),
        ];
        for v in &variants {
            assert_ne!(fp("$x$", v), reference, "config {v:?} should change the key");
        }
    }

    #[test]
    fn informational_fields_are_excluded() {
        let base = ResolvedConfig::default();
        let other = ResolvedConfig::builder()
            .output_dir("/somewhere/else")
            .caching(false)
            .timeout_secs(5)
            .silent(false)
            .build()
            .unwrap();
        assert_eq!(fp("$x$", &base), fp("$x$", &other));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"G".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"A".repeat(64)).is_none());
    }

    #[test]
    fn short_tolerates_hand_edited_values() {
        let fp: Fingerprint = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(fp.short(), "abc");
    }

    #[test]
    fn source_hash_ignores_line_endings() {
        assert_eq!(source_hash("a\r\n"), source_hash("a\n"));
        assert_ne!(source_hash("a"), source_hash("b"));
    }
}
