//! Injected strategies for custom compilation and SVG post-processing.
//!
//! Hooks are registered in a [`HookRegistry`] under a stable name. Configs
//! refer to them by that name (`custom_compile_command`,
//! `custom_postprocess`, `TransformSpec::Hook`), which keeps
//! [`ResolvedConfig`] serialisable and gives the fingerprint something
//! stable to hash. Changing what a hook *does* without changing its name is
//! the caller's responsibility: rename it to invalidate old artifacts.

use crate::config::{ResolvedConfig, TransformSpec};
use crate::error::{HookError, RenderError};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What a [`CompileCommand`] gets to build its command line from.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    /// Directory the command runs in; the `.tex` file lives here.
    pub work_dir: &'a Path,
    /// Base name shared by all job files (`snippet`).
    pub job_name: &'a str,
    /// Name of the `.tex` file, relative to `work_dir`.
    pub tex_file: &'a str,
    /// Name of the intermediate file the converter will read.
    pub intermediate_file: &'a str,
    pub config: &'a ResolvedConfig,
}

/// A concrete command line produced by a [`CompileCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Replaces the engine command line for a build.
///
/// The command must leave `ctx.intermediate_file` in `ctx.work_dir`.
pub trait CompileCommand: Send + Sync {
    /// Stable name; hashed into the fingerprint.
    fn id(&self) -> &str;

    fn command(&self, ctx: &CompileContext<'_>) -> Result<CommandLine, HookError>;
}

/// Replaces the built-in optimizer, or runs as a named transform.
pub trait SvgPostprocess: Send + Sync {
    /// Stable name; hashed into the fingerprint.
    fn id(&self) -> &str;

    fn apply(&self, svg: String) -> Result<String, HookError>;
}

/// A [`CompileCommand`] described by a program and an argument template.
///
/// Placeholders `{tex}`, `{job}` and `{out}` in the arguments expand to the
/// `.tex` file, job name and intermediate file name.
///
/// ```rust
/// use tex2svg::hooks::TemplateCommand;
///
/// let tectonic = TemplateCommand::new("tectonic", "tectonic", ["--outfmt", "xdv", "{tex}"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCommand {
    id: String,
    program: String,
    args: Vec<String>,
}

impl TemplateCommand {
    pub fn new<I, S>(id: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl CompileCommand for TemplateCommand {
    fn id(&self) -> &str {
        &self.id
    }

    fn command(&self, ctx: &CompileContext<'_>) -> Result<CommandLine, HookError> {
        if self.program.trim().is_empty() {
            return Err(HookError::new(format!("command '{}' has no program", self.id)));
        }
        let args = self
            .args
            .iter()
            .map(|a| {
                a.replace("{tex}", ctx.tex_file)
                    .replace("{job}", ctx.job_name)
                    .replace("{out}", ctx.intermediate_file)
            })
            .collect();
        Ok(CommandLine {
            program: self.program.clone(),
            args,
            env: Vec::new(),
        })
    }
}

/// Adapter turning a closure into an [`SvgPostprocess`].
pub struct FnPostprocess<F> {
    id: String,
    f: F,
}

impl<F> FnPostprocess<F>
where
    F: Fn(String) -> Result<String, HookError> + Send + Sync,
{
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

impl<F> SvgPostprocess for FnPostprocess<F>
where
    F: Fn(String) -> Result<String, HookError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, svg: String) -> Result<String, HookError> {
        (self.f)(svg)
    }
}

/// Named hooks available to a renderer.
#[derive(Clone, Default)]
pub struct HookRegistry {
    compile: HashMap<String, Arc<dyn CompileCommand>>,
    postprocess: HashMap<String, Arc<dyn SvgPostprocess>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut compile: Vec<_> = self.compile.keys().collect();
        let mut postprocess: Vec<_> = self.postprocess.keys().collect();
        compile.sort();
        postprocess.sort();
        f.debug_struct("HookRegistry")
            .field("compile", &compile)
            .field("postprocess", &postprocess)
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compile command under its [`CompileCommand::id`].
    /// A previous hook with the same name is replaced.
    pub fn register_compile(&mut self, hook: Arc<dyn CompileCommand>) {
        self.compile.insert(hook.id().to_string(), hook);
    }

    /// Register a postprocessor under its [`SvgPostprocess::id`].
    pub fn register_postprocess(&mut self, hook: Arc<dyn SvgPostprocess>) {
        self.postprocess.insert(hook.id().to_string(), hook);
    }

    pub fn compile(&self, name: &str) -> Option<&Arc<dyn CompileCommand>> {
        self.compile.get(name)
    }

    pub fn postprocess(&self, name: &str) -> Option<&Arc<dyn SvgPostprocess>> {
        self.postprocess.get(name)
    }

    /// Fail if `config` names a hook that is not registered.
    pub fn check(&self, config: &ResolvedConfig) -> Result<(), RenderError> {
        if let Some(name) = &config.custom_compile_command {
            if !self.compile.contains_key(name) {
                return Err(RenderError::InvalidConfiguration(format!(
                    "custom_compile_command '{name}' is not registered"
                )));
            }
        }
        let postprocess_names = config
            .custom_postprocess
            .iter()
            .chain(config.postprocess.iter().filter_map(|t| match t {
                TransformSpec::Hook { name } => Some(name),
                TransformSpec::Replace { .. } => None,
            }));
        for name in postprocess_names {
            if !self.postprocess.contains_key(name) {
                return Err(RenderError::InvalidConfiguration(format!(
                    "postprocess hook '{name}' is not registered"
                )));
            }
        }
        Ok(())
    }
}
