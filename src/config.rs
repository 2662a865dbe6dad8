//! Configuration types for TeX-to-SVG builds.
//!
//! [`ResolvedConfig`] is the fully-typed configuration one build runs with.
//! Every field has a concrete value; there is no "unset" state left by the
//! time a config reaches the pipeline. It is produced either directly via
//! [`ResolvedConfigBuilder`] (the base layer) or by
//! [`crate::layers::resolve`], which merges per-component and per-instance
//! override layers over a base.
//!
//! Custom hooks are referenced by their registered *name*
//! (see [`crate::hooks::HookRegistry`]) so the whole config stays
//! serialisable and the fingerprint can hash a stable identifier.

use crate::error::RenderError;
use crate::geometry::{BoundingBox, ConverterOptions, PaperSize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Fully resolved configuration for one build.
///
/// Built via [`ResolvedConfig::builder()`] or using
/// [`ResolvedConfig::default()`].
///
/// # Example
/// ```rust
/// use tex2svg::{Engine, IntermediateFiletype, ResolvedConfig};
///
/// let config = ResolvedConfig::builder()
///     .engine(Engine::Lualatex)
///     .intermediate_filetype(IntermediateFiletype::Pdf)
///     .timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedConfig {
    /// TeX engine. Default: [`Engine::Pdflatex`].
    pub engine: Engine,

    /// What the engine produces for the converter. Default: DVI.
    ///
    /// DVI keeps glyph positions exact and converts faster; PDF is needed
    /// for documents that include PDF/PNG graphics.
    pub intermediate_filetype: IntermediateFiletype,

    /// `\write18` policy passed to the engine. Default: [`ShellEscape::None`].
    pub shell_escape: ShellEscape,

    /// Where final `.svg` artifacts are written. Default: `./svg`.
    pub output_dir: PathBuf,

    /// Persist cache records and reuse artifacts across requests. Default: true.
    pub caching: bool,

    /// How a snippet is wrapped into a compilable document.
    pub document: DocumentTemplate,

    /// Converter geometry and output options.
    pub converter: ConverterOptions,

    /// Built-in SVG optimizer settings.
    pub optimizer: OptimizerOptions,

    /// Transforms applied after the optimizer, in declaration order.
    pub postprocess: Vec<TransformSpec>,

    /// Registered [`crate::hooks::CompileCommand`] replacing the default
    /// engine command line.
    pub custom_compile_command: Option<String>,

    /// Registered [`crate::hooks::SvgPostprocess`] replacing the built-in
    /// optimizer.
    pub custom_postprocess: Option<String>,

    /// Extra environment for every spawned tool (e.g. `TEXINPUTS`).
    pub env: BTreeMap<String, String>,

    /// Per-process timeout in seconds. Default: 60.
    pub timeout_secs: u64,

    /// Suppress live echo of tool output. Default: true.
    pub silent: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            intermediate_filetype: IntermediateFiletype::default(),
            shell_escape: ShellEscape::default(),
            output_dir: PathBuf::from("svg"),
            caching: true,
            document: DocumentTemplate::default(),
            converter: ConverterOptions::default(),
            optimizer: OptimizerOptions::default(),
            postprocess: Vec::new(),
            custom_compile_command: None,
            custom_postprocess: None,
            env: BTreeMap::new(),
            timeout_secs: 60,
            silent: true,
        }
    }
}

impl ResolvedConfig {
    /// Create a new builder for `ResolvedConfig`.
    pub fn builder() -> ResolvedConfigBuilder {
        ResolvedConfigBuilder {
            config: Self::default(),
        }
    }

    /// Structural checks performed before any process is spawned.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.timeout_secs == 0 {
            return Err(RenderError::InvalidConfiguration(
                "timeout_secs must be ≥ 1".into(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(RenderError::InvalidConfiguration(
                "output_dir must not be empty".into(),
            ));
        }
        if self.document.wrap && self.document.class.trim().is_empty() {
            return Err(RenderError::InvalidConfiguration(
                "document.class must not be empty when wrapping snippets".into(),
            ));
        }
        if let Some(p) = self.optimizer.float_precision {
            if p > 8 {
                return Err(RenderError::InvalidConfiguration(format!(
                    "optimizer.float_precision must be 0–8, got {p}"
                )));
            }
        }
        for t in &self.postprocess {
            if let TransformSpec::Replace { pattern, .. } = t {
                regex::Regex::new(pattern).map_err(|e| {
                    RenderError::InvalidConfiguration(format!(
                        "postprocess pattern '{pattern}' is not a valid regex: {e}"
                    ))
                })?;
            }
        }
        self.converter
            .validate()
            .map_err(RenderError::InvalidConfiguration)
    }

    /// Names of the external programs this config will spawn, ignoring
    /// custom compile commands (whose program is only known at build time).
    pub fn required_tools(&self) -> Vec<&'static str> {
        let mut tools = Vec::with_capacity(2);
        if self.custom_compile_command.is_none() {
            tools.push(self.engine.program());
        }
        tools.push(crate::pipeline::convert::CONVERTER_PROGRAM);
        tools
    }
}

/// Builder for [`ResolvedConfig`].
#[derive(Debug)]
pub struct ResolvedConfigBuilder {
    config: ResolvedConfig,
}

impl ResolvedConfigBuilder {
    pub fn engine(mut self, engine: Engine) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn intermediate_filetype(mut self, ft: IntermediateFiletype) -> Self {
        self.config.intermediate_filetype = ft;
        self
    }

    pub fn shell_escape(mut self, mode: ShellEscape) -> Self {
        self.config.shell_escape = mode;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn caching(mut self, v: bool) -> Self {
        self.config.caching = v;
        self
    }

    pub fn document(mut self, template: DocumentTemplate) -> Self {
        self.config.document = template;
        self
    }

    pub fn converter(mut self, opts: ConverterOptions) -> Self {
        self.config.converter = opts;
        self
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.config.converter.bbox = Some(bbox);
        self
    }

    pub fn paper_size(mut self, paper: PaperSize) -> Self {
        self.config.converter.paper_size = Some(paper);
        self
    }

    pub fn optimizer(mut self, opts: OptimizerOptions) -> Self {
        self.config.optimizer = opts;
        self
    }

    pub fn optimize(mut self, enabled: bool) -> Self {
        self.config.optimizer.enabled = enabled;
        self
    }

    pub fn postprocess(mut self, transform: TransformSpec) -> Self {
        self.config.postprocess.push(transform);
        self
    }

    pub fn custom_compile_command(mut self, name: impl Into<String>) -> Self {
        self.config.custom_compile_command = Some(name.into());
        self
    }

    pub fn custom_postprocess(mut self, name: impl Into<String>) -> Self {
        self.config.custom_postprocess = Some(name.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn silent(mut self, v: bool) -> Self {
        self.config.silent = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ResolvedConfig, RenderError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Supported TeX engines.
///
/// The `*mk` variants run `latexmk`, which reruns the engine as often as the
/// document needs (references, TikZ externalisation) and picks the engine
/// from a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Pdflatex,
    Xelatex,
    Lualatex,
    /// `latexmk` driving pdfTeX.
    Pdflatexmk,
    /// `latexmk` driving LuaTeX.
    Lualatexmk,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::Pdflatex,
        Engine::Xelatex,
        Engine::Lualatex,
        Engine::Pdflatexmk,
        Engine::Lualatexmk,
    ];

    /// Program that is actually spawned.
    pub fn program(self) -> &'static str {
        match self {
            Engine::Pdflatex => "pdflatex",
            Engine::Xelatex => "xelatex",
            Engine::Lualatex => "lualatex",
            Engine::Pdflatexmk | Engine::Lualatexmk => "latexmk",
        }
    }

    /// Whether the engine is driven through the `latexmk` wrapper.
    pub fn is_managed(self) -> bool {
        matches!(self, Engine::Pdflatexmk | Engine::Lualatexmk)
    }

    /// File extension of the intermediate this engine writes.
    ///
    /// XeTeX writes extended DVI (`.xdv`) in DVI mode.
    pub fn intermediate_extension(self, ft: IntermediateFiletype) -> &'static str {
        match (self, ft) {
            (_, IntermediateFiletype::Pdf) => "pdf",
            (Engine::Xelatex, IntermediateFiletype::Dvi) => "xdv",
            (_, IntermediateFiletype::Dvi) => "dvi",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Pdflatex => "pdflatex",
            Engine::Xelatex => "xelatex",
            Engine::Lualatex => "lualatex",
            Engine::Pdflatexmk => "pdflatexmk",
            Engine::Lualatexmk => "lualatexmk",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Engine::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown engine '{s}' (expected one of: {})",
                    Engine::ALL.map(Engine::as_str).join(", ")
                )
            })
    }
}

/// Intermediate document handed from the engine to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntermediateFiletype {
    Pdf,
    #[default]
    Dvi,
}

impl FromStr for IntermediateFiletype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(IntermediateFiletype::Pdf),
            "dvi" | "xdv" => Ok(IntermediateFiletype::Dvi),
            other => Err(format!("unknown intermediate filetype '{other}' (pdf, dvi)")),
        }
    }
}

/// Shell-escape (`\write18`) policy.
///
/// Security relevant: the mapping to engine flags is exhaustive and never
/// widens the requested mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellEscape {
    /// No shell commands at all.
    #[default]
    None,
    /// Only the distribution's whitelisted commands.
    Restricted,
    /// Arbitrary shell commands.
    Full,
}

impl ShellEscape {
    /// Engine flag implementing this mode.
    pub fn engine_flag(self) -> &'static str {
        match self {
            ShellEscape::None => "-no-shell-escape",
            ShellEscape::Restricted => "-shell-restricted",
            ShellEscape::Full => "-shell-escape",
        }
    }
}

impl FromStr for ShellEscape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(ShellEscape::None),
            "restricted" => Ok(ShellEscape::Restricted),
            "full" | "on" => Ok(ShellEscape::Full),
            other => Err(format!(
                "unknown shell-escape mode '{other}' (none, restricted, full)"
            )),
        }
    }
}

/// How a snippet becomes a full TeX document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentTemplate {
    /// Wrap the snippet; `false` means the source is already a document.
    pub wrap: bool,
    /// Document class. Default: `standalone`.
    pub class: String,
    /// Class options, e.g. `["preview", "border=1pt"]`.
    pub class_options: Vec<String>,
    /// Lines inserted before `\begin{document}`.
    pub preamble: Vec<String>,
}

impl Default for DocumentTemplate {
    fn default() -> Self {
        Self {
            wrap: true,
            class: "standalone".to_string(),
            class_options: Vec::new(),
            preamble: Vec::new(),
        }
    }
}

/// Built-in SVG optimizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerOptions {
    /// Run the built-in optimizer. Default: true.
    pub enabled: bool,
    /// Rules to apply, in this order. Default: all of [`OptimizerRule::ALL`].
    pub rules: Vec<OptimizerRule>,
    /// Round decimal numbers in attributes to this many digits. Default: 3.
    pub float_precision: Option<u8>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: OptimizerRule::ALL.to_vec(),
            float_precision: Some(3),
        }
    }
}

/// One built-in optimization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerRule {
    StripXmlDeclaration,
    StripDoctype,
    StripComments,
    StripMetadata,
    RemoveEmptyGroups,
    CollapseWhitespace,
}

impl OptimizerRule {
    pub const ALL: [OptimizerRule; 6] = [
        OptimizerRule::StripXmlDeclaration,
        OptimizerRule::StripDoctype,
        OptimizerRule::StripComments,
        OptimizerRule::StripMetadata,
        OptimizerRule::RemoveEmptyGroups,
        OptimizerRule::CollapseWhitespace,
    ];
}

/// A post-optimizer transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformSpec {
    /// A registered [`crate::hooks::SvgPostprocess`].
    Hook { name: String },
    /// Regex replacement over the whole SVG text.
    Replace { pattern: String, replacement: String },
}
