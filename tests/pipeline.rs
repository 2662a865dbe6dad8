//! Pipeline integration tests.
//!
//! External tools are replaced by [`ScriptedRunner`], which writes the files
//! a real engine and dvisvgm would write and records every spawn. The
//! optional end-to-end test at the bottom needs a TeX installation:
//!
//!     TEX2SVG_E2E=1 cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use futures::future::join_all;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tex2svg::hooks::FnPostprocess;
use tex2svg::process::SpawnError;
use tex2svg::{
    ConfigLayer, Engine, HookError, HookRegistry, IntermediateFiletype, Outcome, ProcessOutput,
    ProcessRunner, RenderError, Renderer, ResolvedConfig, ResolvedConfigBuilder, SpawnSpec, Stage,
    TexRequest,
};

// ── Scripted toolchain ───────────────────────────────────────────────────

/// Stand-in for the TeX engines and dvisvgm.
///
/// Sources containing `\broken` fail to compile, sources containing `\hang`
/// time out. `\quietexit` makes the engine exit 0 without output; `\nosvg`,
/// `\emptysvg` and `\junksvg` do the same to dvisvgm. Everything else
/// succeeds.
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<SpawnSpec>>,
    delay: Duration,
    missing: Option<&'static str>,
}

impl ScriptedRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn without(tool: &'static str) -> Arc<Self> {
        Arc::new(Self {
            missing: Some(tool),
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<SpawnSpec> {
        self.calls.lock().unwrap().clone()
    }

    fn engine_calls(&self) -> usize {
        self.calls().iter().filter(|s| s.program != "dvisvgm").count()
    }

    async fn compile(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError> {
        let job = spec
            .args
            .iter()
            .find_map(|a| a.strip_prefix("-jobname="))
            .unwrap_or("snippet");
        let tex = spec.args.last().cloned().unwrap_or_default();
        let document = std::fs::read_to_string(spec.cwd.join(&tex)).unwrap_or_default();

        if document.contains(r"\hang") {
            return Err(SpawnError::Timeout {
                program: spec.program.clone(),
                after: spec.timeout.unwrap_or_default(),
            });
        }
        if document.contains(r"\broken") {
            std::fs::write(
                spec.cwd.join(format!("{job}.log")),
                "This is pdfTeX\n! Undefined control sequence.\nl.4 \\broken\n",
            )
            .unwrap();
            return Ok(ProcessOutput {
                exit_code: Some(1),
                stdout: "! Undefined control sequence.\n".into(),
                stderr: String::new(),
            });
        }

        if document.contains(r"\quietexit") {
            return Ok(ProcessOutput {
                exit_code: Some(0),
                ..ProcessOutput::default()
            });
        }

        let has = |flag: &str| spec.args.iter().any(|a| a == flag);
        let ext = if has("-no-pdf") {
            "xdv"
        } else if has("-output-format=dvi") || has("-dvi") || has("-dvilua") {
            "dvi"
        } else {
            "pdf"
        };
        std::fs::write(spec.cwd.join(format!("{job}.{ext}")), &document).unwrap();
        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: format!("Output written on {job}.{ext}\n"),
            stderr: String::new(),
        })
    }

    async fn convert(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError> {
        let output = spec
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--output="))
            .unwrap_or("snippet.svg");
        let input = spec.args.last().cloned().unwrap_or_default();
        let document = std::fs::read_to_string(spec.cwd.join(&input)).unwrap_or_default();

        let done = Ok(ProcessOutput {
            exit_code: Some(0),
            ..ProcessOutput::default()
        });
        if document.contains(r"\nosvg") {
            return done;
        }
        if document.contains(r"\emptysvg") {
            std::fs::write(spec.cwd.join(output), "").unwrap();
            return done;
        }
        if document.contains(r"\junksvg") {
            std::fs::write(spec.cwd.join(output), "dvisvgm: page 1 is empty\n").unwrap();
            return done;
        }

        let svg = format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <!-- This file was generated by dvisvgm 3.2 -->\n\
             <!-- input: {} -->\n\
             <svg xmlns='http://www.w3.org/2000/svg' width='12.3456789pt' height='8.1pt'>\n\
             <metadata>scripted</metadata>\n\
             <g>\n</g>\n\
             <path d='M 0.1234567 1.5 L 3 4'/>\n\
             <desc>{} bytes</desc>\n\
             </svg>\n",
            spec.cwd.join(&input).display(),
            document.len(),
        );
        std::fs::write(spec.cwd.join(output), svg).unwrap();
        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: format!("processing {input}\n"),
        })
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError> {
        self.calls.lock().unwrap().push(spec.clone());
        if self.missing == Some(spec.program.as_str()) {
            return Err(SpawnError::NotFound {
                program: spec.program.clone(),
            });
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if spec.program == "dvisvgm" {
            self.convert(spec).await
        } else {
            self.compile(spec).await
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn config(dir: &TempDir) -> ResolvedConfigBuilder {
    ResolvedConfig::builder().output_dir(dir.path().join("svg"))
}

fn renderer_with(dir: &TempDir, runner: Arc<ScriptedRunner>, base: ResolvedConfig) -> Renderer {
    Renderer::builder()
        .base_config(base)
        .runner(runner)
        .cache_dir(dir.path().join("cache"))
        .build()
        .unwrap()
}

fn renderer(dir: &TempDir, runner: Arc<ScriptedRunner>) -> Renderer {
    renderer_with(dir, runner, config(dir).build().unwrap())
}

/// Files left in the output directory, if it exists at all.
fn written(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path().join("svg"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fingerprints ─────────────────────────────────────────────────────────

#[test]
fn test_fingerprint_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::new());
    let a = r.fingerprint(&TexRequest::new("$x^2$")).unwrap();
    let b = r.fingerprint(&TexRequest::new("$x^2$")).unwrap();
    assert_eq!(a, b);

    // CRLF and LF sources are the same snippet.
    let crlf = r.fingerprint(&TexRequest::new("$x^2$\r\n")).unwrap();
    let lf = r.fingerprint(&TexRequest::new("$x^2$\n")).unwrap();
    assert_eq!(crlf, lf);
}

#[test]
fn test_fingerprint_tracks_source_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::new());
    let base = r.fingerprint(&TexRequest::new("$x^2$")).unwrap();

    assert_ne!(base, r.fingerprint(&TexRequest::new("$x^3$")).unwrap());
    assert_ne!(
        base,
        r.fingerprint(&TexRequest::new("$x^2$").with_kind("tikz")).unwrap()
    );
    assert_ne!(
        base,
        r.fingerprint(
            &TexRequest::new("$x^2$").with_overrides(ConfigLayer::new().set("engine", "xelatex"))
        )
        .unwrap()
    );

    // Where the file lands and how long tools may run do not change the SVG.
    assert_eq!(
        base,
        r.fingerprint(&TexRequest::new("$x^2$").with_overrides(
            ConfigLayer::new()
                .set("output_dir", "elsewhere")
                .set("timeout_secs", 5)
        ))
        .unwrap()
    );
}

// ── Build and cache ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_render_math_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let out = r.render(&TexRequest::new("$x^2$")).await.unwrap();

    assert_eq!(out.outcome, Outcome::Built);
    assert!(out.svg.contains("<svg"));
    assert!(!out.svg.contains(".dvi"), "build path leaked: {}", out.svg);
    assert!(!out.svg.contains("<?xml"));
    assert!(!out.svg.contains("<metadata"));
    assert!(out.svg.contains("12.346pt"), "numbers not rounded: {}", out.svg);
    assert!(out.warnings.is_empty());
    assert_eq!(
        out.artifact_path,
        dir.path().join("svg").join(format!("{}.svg", out.fingerprint))
    );
    assert_eq!(std::fs::read_to_string(&out.artifact_path).unwrap(), out.svg);

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].program, "pdflatex");
    assert!(calls[0].args.contains(&"-output-format=dvi".to_string()));
    assert_eq!(calls[1].program, "dvisvgm");
    assert!(calls[1].args.contains(&"snippet.dvi".to_string()));
}

#[tokio::test]
async fn test_unoptimized_output_is_scrubbed() {
    let dir = tempfile::tempdir().unwrap();
    let base = config(&dir).optimize(false).build().unwrap();
    let r = renderer_with(&dir, ScriptedRunner::new(), base);

    let out = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    assert!(out.svg.contains("generated by dvisvgm"));
    assert!(!out.svg.contains("snippet.dvi"));
    assert!(!out.svg.contains(&dir.path().to_string_lossy().to_string()));
}

#[tokio::test]
async fn test_rebuild_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let base = config(&dir).caching(false).build().unwrap();
    let r = renderer_with(&dir, Arc::clone(&runner), base);

    let first = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    let second = r.render(&TexRequest::new("$x^2$")).await.unwrap();

    assert_eq!(first.outcome, Outcome::Built);
    assert_eq!(second.outcome, Outcome::Built);
    assert_eq!(first.svg, second.svg);
    assert_eq!(runner.engine_calls(), 2);
    assert!(r.cache().lookup(&first.fingerprint).await.is_none());
}

#[tokio::test]
async fn test_cache_hit_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let first = renderer(&dir, ScriptedRunner::new())
        .render(&TexRequest::new("$x^2$"))
        .await
        .unwrap();

    // A fresh renderer over the same cache directory, as after a restart.
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));
    let second = r.render(&TexRequest::new("$x^2$")).await.unwrap();

    assert_eq!(second.outcome, Outcome::Cached);
    assert_eq!(second.svg, first.svg);
    assert_eq!(second.artifact_path, first.artifact_path);
    assert!(runner.calls().is_empty());

    let record = r.cache().lookup(&first.fingerprint).await.unwrap();
    assert_eq!(record.artifact_path, first.artifact_path);
}

#[tokio::test]
async fn test_tampered_artifact_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let first = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    std::fs::write(&first.artifact_path, "<svg>stale</svg>").unwrap();

    let second = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    assert_eq!(second.outcome, Outcome::Built);
    assert_eq!(second.svg, first.svg);
    assert_eq!(runner.engine_calls(), 2);
}

#[tokio::test]
async fn test_deleted_artifact_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let first = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    std::fs::remove_file(&first.artifact_path).unwrap();

    let second = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    assert_eq!(second.outcome, Outcome::Built);
    assert!(second.artifact_path.exists());
}

#[tokio::test]
async fn test_cached_artifact_copied_to_requested_name() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let first = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    let named = r
        .render(&TexRequest::new("$x^2$").with_artifact_name("square"))
        .await
        .unwrap();

    assert_eq!(named.outcome, Outcome::Cached);
    assert_eq!(named.artifact_path, dir.path().join("svg").join("square.svg"));
    assert_eq!(std::fs::read_to_string(&named.artifact_path).unwrap(), first.svg);
    assert_eq!(runner.engine_calls(), 1);
}

#[tokio::test]
async fn test_bad_artifact_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let err = r
        .render(&TexRequest::new("$x$").with_artifact_name("../escape"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::InvalidConfiguration(_)), "{err:?}");
    assert!(runner.calls().is_empty());
}

// ── Concurrency ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_identical_requests_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::slow(Duration::from_millis(50));
    let r = renderer(&dir, Arc::clone(&runner));
    let req = TexRequest::new(r"\int_0^1 x\,dx");

    let results = join_all((0..5).map(|_| r.render(&req))).await;
    let outputs: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(runner.engine_calls(), 1);
    assert_eq!(outputs.iter().filter(|o| o.outcome == Outcome::Built).count(), 1);
    assert_eq!(outputs.iter().filter(|o| o.outcome == Outcome::Joined).count(), 4);
    assert!(outputs.iter().all(|o| o.svg == outputs[0].svg));
    assert_eq!(r.cache().in_flight(), 0);
}

#[tokio::test]
async fn test_timeout_reaches_every_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::slow(Duration::from_millis(30));
    let base = config(&dir).timeout_secs(2).build().unwrap();
    let r = renderer_with(&dir, Arc::clone(&runner), base);
    let req = TexRequest::new(r"\hang");

    let results = join_all((0..3).map(|_| r.render(&req))).await;

    assert_eq!(runner.engine_calls(), 1);
    for result in &results {
        match result {
            Err(RenderError::Timeout { stage, secs, .. }) => {
                assert_eq!(*stage, Stage::Compile);
                assert_eq!(*secs, 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    let fp = r.fingerprint(&req).unwrap();
    assert!(r.cache().lookup(&fp).await.is_none());
    assert_eq!(r.cache().in_flight(), 0);
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));
    let requests = vec![
        TexRequest::new("$a$"),
        TexRequest::new(r"$\broken$"),
        TexRequest::new("$c$"),
    ];

    let batch = r.render_batch(&requests).await;

    assert_eq!(batch.stats.total, 3);
    assert_eq!(batch.stats.built, 2);
    assert_eq!(batch.stats.failed, 1);
    assert_eq!(batch.results.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2]);

    match &batch.results[1].result {
        Err(RenderError::CompilationFailed { detail, log }) => {
            assert!(detail.contains("Undefined control sequence"), "{detail}");
            assert_eq!(log.exit_code, Some(1));
        }
        other => panic!("expected compilation failure, got {other:?}"),
    }

    // Nothing is recorded for the failure; the next attempt rebuilds.
    let fp = r.fingerprint(&requests[1]).unwrap();
    assert!(r.cache().lookup(&fp).await.is_none());
    let again = r.render(&requests[1]).await;
    assert!(again.is_err());
    assert_eq!(runner.engine_calls(), 4);
}

#[tokio::test]
async fn test_engine_exiting_without_intermediate() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let err = r.render(&TexRequest::new(r"$\quietexit$")).await.unwrap_err();
    match err {
        RenderError::CompilationFailed { detail, log } => {
            assert!(detail.contains("did not produce snippet.dvi"), "{detail}");
            assert_eq!(log.exit_code, Some(0));
        }
        other => panic!("expected compilation failure, got {other:?}"),
    }
    assert_eq!(runner.calls().len(), 1, "converter must not run");
    assert!(written(&dir).is_empty(), "left behind: {:?}", written(&dir));
}

#[tokio::test]
async fn test_converter_exiting_without_svg() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::new());

    let err = r.render(&TexRequest::new(r"$\nosvg$")).await.unwrap_err();
    match err {
        RenderError::ConversionFailed { detail, .. } => {
            assert!(detail.contains("wrote no snippet.svg"), "{detail}");
        }
        other => panic!("expected conversion failure, got {other:?}"),
    }
    assert!(written(&dir).is_empty(), "left behind: {:?}", written(&dir));
}

#[tokio::test]
async fn test_converter_writing_unusable_svg() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::new());

    for source in [r"$\emptysvg$", r"$\junksvg$"] {
        let err = r.render(&TexRequest::new(source)).await.unwrap_err();
        match err {
            RenderError::ConversionFailed { detail, .. } => {
                assert!(detail.contains("empty SVG"), "{source}: {detail}");
            }
            other => panic!("{source}: expected conversion failure, got {other:?}"),
        }
        let fp = r.fingerprint(&TexRequest::new(source)).unwrap();
        assert!(r.cache().lookup(&fp).await.is_none());
    }
    assert!(written(&dir).is_empty(), "left behind: {:?}", written(&dir));
}

#[tokio::test]
async fn test_process_logs_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::new());

    let built = r.render(&TexRequest::new("$z$")).await.unwrap();
    assert_eq!(built.logs.len(), 2);
    assert!(built.logs[0].stdout.contains("Output written on snippet.dvi"));
    assert!(built.logs[1].stderr.contains("processing snippet.dvi"));

    let cached = r.render(&TexRequest::new("$z$")).await.unwrap();
    assert_eq!(cached.outcome, Outcome::Cached);
    assert!(cached.logs.is_empty());
}

#[test]
fn test_render_sync_outside_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    let out = r.render_sync(&TexRequest::new("$y$")).unwrap();
    assert_eq!(out.outcome, Outcome::Built);
    assert_eq!(runner.calls().len(), 2);
}

// ── Configuration ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_override_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = Renderer::builder()
        .base_config(config(&dir).engine(Engine::Pdflatex).build().unwrap())
        .component_layer("math", ConfigLayer::new().set("engine", "xelatex"))
        .runner(Arc::clone(&runner) as Arc<dyn ProcessRunner>)
        .cache_dir(dir.path().join("cache"))
        .build()
        .unwrap();

    let from_component = r.render(&TexRequest::new("$a$")).await.unwrap();
    let from_instance = r
        .render(
            &TexRequest::new("$b$").with_overrides(ConfigLayer::new().set("engine", "lualatex")),
        )
        .await
        .unwrap();
    let from_base = r
        .render(&TexRequest::new(r"\draw (0,0) -- (1,1);").with_kind("tikz"))
        .await
        .unwrap();

    assert_eq!(from_component.outcome, Outcome::Built);
    assert_eq!(from_instance.outcome, Outcome::Built);
    assert_eq!(from_base.outcome, Outcome::Built);

    let engines: Vec<String> = runner
        .calls()
        .into_iter()
        .filter(|s| s.program != "dvisvgm")
        .map(|s| s.program)
        .collect();
    assert_eq!(engines, vec!["xelatex", "lualatex", "pdflatex"]);

    // xelatex writes .xdv in DVI mode.
    let converts: Vec<SpawnSpec> = runner
        .calls()
        .into_iter()
        .filter(|s| s.program == "dvisvgm")
        .collect();
    assert!(converts[0].args.contains(&"snippet.xdv".to_string()));
}

#[tokio::test]
async fn test_pdf_intermediate() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let base = config(&dir)
        .intermediate_filetype(IntermediateFiletype::Pdf)
        .build()
        .unwrap();
    let r = renderer_with(&dir, Arc::clone(&runner), base);

    r.render(&TexRequest::new("$x$")).await.unwrap();

    let calls = runner.calls();
    assert!(!calls[0].args.iter().any(|a| a.contains("dvi")));
    assert_eq!(calls[1].args[0], "--pdf");
    assert!(calls[1].args.contains(&"snippet.pdf".to_string()));
}

#[tokio::test]
async fn test_shell_escape_is_never_upgraded() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    let r = renderer(&dir, Arc::clone(&runner));

    // A snippet asking for \write18 still compiles without shell escape.
    r.render(&TexRequest::new(r"\immediate\write18{ls}$x$"))
        .await
        .unwrap();

    let compile = &runner.calls()[0];
    assert!(compile.args.contains(&"-no-shell-escape".to_string()));
    assert!(!compile.args.contains(&"-shell-escape".to_string()));
}

#[tokio::test]
async fn test_missing_converter() {
    let dir = tempfile::tempdir().unwrap();
    let r = renderer(&dir, ScriptedRunner::without("dvisvgm"));

    let err = r.render(&TexRequest::new("$x$")).await.unwrap_err();
    match err {
        RenderError::MissingExternalTool { tool, stage } => {
            assert_eq!(tool, "dvisvgm");
            assert_eq!(stage, Stage::Convert);
        }
        other => panic!("expected missing tool, got {other:?}"),
    }
}

// ── Optimizer ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_postprocess_falls_back_to_raw_svg() {
    let dir = tempfile::tempdir().unwrap();
    let mut hooks = HookRegistry::new();
    hooks.register_postprocess(Arc::new(FnPostprocess::new(
        "explode",
        |_svg: String| -> Result<String, HookError> { Err(HookError::new("boom")) },
    )));
    let r = Renderer::builder()
        .base_config(config(&dir).custom_postprocess("explode").build().unwrap())
        .hooks(hooks)
        .runner(ScriptedRunner::new() as Arc<dyn ProcessRunner>)
        .cache_dir(dir.path().join("cache"))
        .build()
        .unwrap();

    let out = r.render(&TexRequest::new("$x$")).await.unwrap();

    assert_eq!(out.outcome, Outcome::Built);
    assert!(out.svg.contains("<metadata>scripted</metadata>"));
    assert!(!out.svg.contains("snippet.dvi"));
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].contains("boom"), "{:?}", out.warnings);
}

#[tokio::test]
async fn test_postprocess_hook_replaces_optimizer() {
    let dir = tempfile::tempdir().unwrap();
    let mut hooks = HookRegistry::new();
    hooks.register_postprocess(Arc::new(FnPostprocess::new(
        "tag",
        |svg: String| -> Result<String, HookError> {
            Ok(svg.replace("<svg ", "<svg class='tex' "))
        },
    )));
    let r = Renderer::builder()
        .base_config(config(&dir).custom_postprocess("tag").build().unwrap())
        .hooks(hooks)
        .runner(ScriptedRunner::new() as Arc<dyn ProcessRunner>)
        .cache_dir(dir.path().join("cache"))
        .build()
        .unwrap();

    let out = r.render(&TexRequest::new("$x$")).await.unwrap();
    assert!(out.svg.contains("class='tex'"));
    // The built-in rules did not run.
    assert!(out.svg.contains("<metadata>"));
    assert!(out.warnings.is_empty());
}

// ── Real toolchain (opt-in) ──────────────────────────────────────────────

#[tokio::test]
async fn test_real_toolchain_end_to_end() {
    if std::env::var("TEX2SVG_E2E").as_deref() != Ok("1") {
        eprintln!("skipping: set TEX2SVG_E2E=1 to run against installed TeX tools");
        return;
    }
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let r = Renderer::builder()
        .base_config(config(&dir).build().unwrap())
        .cache_dir(dir.path().join("cache"))
        .build()
        .unwrap();

    let report = r.check_dependencies(r.base_config());
    if !report.is_complete() {
        eprintln!("skipping: missing {:?}", report.missing);
        return;
    }

    let first = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    assert!(first.svg.contains("<svg"));
    assert!(!first.svg.contains(".dvi"));
    assert!(Path::new(&first.artifact_path).exists());

    let second = r.render(&TexRequest::new("$x^2$")).await.unwrap();
    assert_eq!(second.outcome, Outcome::Cached);
    assert_eq!(second.svg, first.svg);
}
