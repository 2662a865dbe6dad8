//! Streaming batch API: emit snippet results as they complete.
//!
//! Unlike [`crate::Renderer::render_batch`], which returns once every snippet
//! has settled, [`render_stream`] yields each [`SnippetResult`] as soon as it
//! is ready. Results arrive in completion order; sort by
//! [`SnippetResult::index`] if order matters.

use crate::output::SnippetResult;
use crate::render::{Renderer, TexRequest};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of snippet results.
pub type SnippetStream = Pin<Box<dyn Stream<Item = SnippetResult> + Send>>;

/// Render `requests`, streaming results as they complete.
///
/// Concurrency is bounded by [`Renderer::concurrency`]; external-tool
/// parallelism is still bounded by the renderer's build slots.
pub fn render_stream(renderer: Arc<Renderer>, requests: Vec<TexRequest>) -> SnippetStream {
    let total = requests.len();
    let concurrency = renderer.concurrency();
    info!("Starting streaming render of {} snippet(s)", total);

    if let Some(cb) = renderer.progress() {
        cb.on_batch_start(total);
    }

    let s = stream::iter(requests.into_iter().enumerate())
        .map(move |(index, req)| {
            let renderer = Arc::clone(&renderer);
            async move { renderer.render_indexed(index, total, &req).await }
        })
        .buffer_unordered(concurrency);

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::process::{ProcessOutput, ProcessRunner, SpawnError, SpawnSpec};
    use async_trait::async_trait;

    /// Every spawn fails as if the tool were not installed.
    struct NoTools;

    #[async_trait]
    impl ProcessRunner for NoTools {
        async fn run(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError> {
            Err(SpawnError::NotFound {
                program: spec.program.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_stream_yields_every_request() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(
            Renderer::builder()
                .cache_dir(dir.path().join("cache"))
                .runner(Arc::new(NoTools))
                .build()
                .unwrap(),
        );
        let requests = vec![TexRequest::new("$a$"), TexRequest::new("$b$"), TexRequest::new("$c$")];

        let mut results: Vec<SnippetResult> = render_stream(renderer, requests).collect().await;
        results.sort_by_key(|r| r.index);

        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        for r in &results {
            assert!(matches!(
                r.result,
                Err(RenderError::MissingExternalTool { ref tool, .. }) if tool == "pdflatex"
            ));
        }
    }
}
