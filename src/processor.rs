//! Per-file analysis: chunk, generate with retry, merge in order.
//!
//! A chunk that still fails after its retries is logged and skipped; it
//! never aborts the file. The merged analysis is the newline-join of the
//! successful chunk outputs in sequence order, whatever order they finished
//! in. Status is `success` when at least one chunk produced output.
//!
//! With `[analysis] chunk_concurrency > 1`, up to that many chunks are in
//! flight at once through an ordered buffer, which yields results in
//! submission order.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::chunk::split_content;
use crate::config::Config;
use crate::error::{AnalysisError, Result};
use crate::llm::{GenerationRequest, Generator};
use crate::models::{AnalysisMode, AnalysisStatus, Chunk, FileAnalysisResult, SourceFile};
use crate::prompts::chunk_prompt;
use crate::retry::{with_retry, RetryPolicy};

/// Outcome of one chunk.
#[derive(Debug)]
pub struct ChunkResult {
    pub sequence_index: usize,
    pub outcome: Result<String>,
}

/// Drives the chunker and generation client across one file.
pub struct FileProcessor {
    config: Arc<Config>,
    generator: Arc<dyn Generator>,
}

impl FileProcessor {
    pub fn new(config: Arc<Config>, generator: Arc<dyn Generator>) -> Self {
        Self { config, generator }
    }

    /// Analyze one file.
    ///
    /// # Errors
    ///
    /// Only [`AnalysisError::InvalidInput`] (content is not text) and
    /// [`AnalysisError::Cancelled`]. Chunk-level failures are absorbed.
    pub async fn process_file(
        &self,
        file: &SourceFile,
        mode: AnalysisMode,
        cancel: &CancellationToken,
    ) -> Result<FileAnalysisResult> {
        let chunks = split_content(&file.content, self.config.max_chunk_chars(mode))?;
        let total = chunks.len();
        tracing::info!(file = %file.name, chunks = total, %mode, "starting file analysis");

        let results = self.run_chunks(file, mode, chunks, cancel).await;

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let mut outputs = Vec::with_capacity(total);
        for result in results {
            match result.outcome {
                Ok(text) => outputs.push(text),
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(e) => tracing::warn!(
                    file = %file.name,
                    chunk = result.sequence_index + 1,
                    total,
                    "failed to analyze chunk: {}",
                    e
                ),
            }
        }

        let status = if outputs.is_empty() {
            AnalysisStatus::PartialFailure
        } else {
            AnalysisStatus::Success
        };
        tracing::info!(
            file = %file.name,
            succeeded = outputs.len(),
            total,
            ?status,
            "file analysis finished"
        );

        Ok(FileAnalysisResult {
            file_name: file.name.clone(),
            file_type: file.file_type,
            analysis: outputs.join("\n"),
            status,
            mode,
        })
    }

    async fn run_chunks(
        &self,
        file: &SourceFile,
        mode: AnalysisMode,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> Vec<ChunkResult> {
        let settings = self.config.mode_settings(mode);
        let policy = self.config.retry_policy();
        let concurrency = self.config.analysis.chunk_concurrency.max(1);

        let jobs = chunks.into_iter().map(|chunk| {
            let request = GenerationRequest {
                prompt: chunk_prompt(mode, &chunk.text, file.file_type, &file.name),
                timeout: settings.timeout,
                max_output: settings.max_tokens,
            };
            let generator = self.generator.clone();
            async move {
                let outcome = generate_checked(generator.as_ref(), &policy, request, cancel).await;
                ChunkResult {
                    sequence_index: chunk.sequence_index,
                    outcome,
                }
            }
        });

        let mut results: Vec<ChunkResult> =
            stream::iter(jobs).buffered(concurrency).collect().await;
        // merged output must follow sequence order
        results.sort_by_key(|r| r.sequence_index);
        results
    }
}

/// One retried generation call bound to `cancel`.
///
/// No attempt starts once the token is cancelled. An attempt in flight is
/// abandoned (its request dropped) when cancellation arrives, and so is a
/// backoff sleep.
pub async fn generate_checked(
    generator: &dyn Generator,
    policy: &RetryPolicy,
    request: GenerationRequest,
    cancel: &CancellationToken,
) -> Result<String> {
    with_retry(policy, cancel, || {
        let request = request.clone();
        async move {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            tokio::select! {
                _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
                result = generator.generate(request) => result,
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails any prompt containing `FAIL`, echoes the first code line
    /// otherwise.
    struct ScriptedGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.prompt.contains("FAIL") {
                return Err(AnalysisError::transport("boom"));
            }
            let code = request
                .prompt
                .split("Code to analyze:\n")
                .nth(1)
                .unwrap_or_default();
            Ok(format!("analysis of {}", code.lines().next().unwrap_or_default()))
        }
    }

    fn config(chunk_chars: usize, concurrency: usize) -> Arc<Config> {
        let mut cfg = Config::minimal();
        // budget_fraction 0.5 and one char per token: tokens = 2 * chars
        cfg.llm.max_tokens = chunk_chars * 2;
        cfg.retry.max_attempts = 2;
        cfg.retry.initial_backoff_ms = 10;
        cfg.analysis.chunk_concurrency = concurrency;
        Arc::new(cfg)
    }

    fn processor(cfg: Arc<Config>) -> (FileProcessor, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator {
            calls: AtomicUsize::new(0),
        });
        (FileProcessor::new(cfg, generator.clone()), generator)
    }

    #[tokio::test(start_paused = true)]
    async fn middle_chunk_failure_keeps_order() {
        let (p, _) = processor(config(10, 1));
        // three 10-char lines, one per chunk
        let file = SourceFile::new("B.trigger", "src/B.trigger", b"chunk-one!\nFAIL-two!!\nchunk-3!!!".to_vec());

        let result = p
            .process_file(&file, AnalysisMode::Standard, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.analysis, "analysis of chunk-one!\nanalysis of chunk-3!!!");
        assert_eq!(result.status, AnalysisStatus::Success);
        assert_eq!(result.file_name, "B.trigger");
    }

    #[tokio::test(start_paused = true)]
    async fn all_chunks_failing_is_partial_failure() {
        let (p, generator) = processor(config(10, 1));
        let file = SourceFile::new("A.cls", "A.cls", b"FAIL-aaaaa\nFAIL-bbbbb".to_vec());

        let result = p
            .process_file(&file, AnalysisMode::Standard, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, AnalysisStatus::PartialFailure);
        assert_eq!(result.analysis, "");
        // two chunks, two attempts each
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_chunks_merge_in_sequence_order() {
        let (p, _) = processor(config(5, 4));
        let content = (0..12)
            .map(|i| format!("ln{:03}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let file = SourceFile::new("C.js", "C.js", content.into_bytes());

        let result = p
            .process_file(&file, AnalysisMode::Kt, &CancellationToken::new())
            .await
            .unwrap();

        let expected = (0..12)
            .map(|i| format!("analysis of ln{:03}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(result.analysis, expected);
        assert_eq!(result.mode, AnalysisMode::Kt);
    }

    #[tokio::test]
    async fn binary_content_is_invalid_input() {
        let (p, generator) = processor(config(10, 1));
        let file = SourceFile::new("img.js", "img.js", vec![0xff, 0xd8, 0xff]);
        let err = p
            .process_file(&file, AnalysisMode::Standard, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    struct HangingGenerator;

    #[async_trait]
    impl Generator for HangingGenerator {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_in_flight_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = generate_checked(
            &HangingGenerator,
            &RetryPolicy::default(),
            GenerationRequest {
                prompt: "p".into(),
                timeout: std::time::Duration::from_secs(60),
                max_output: 10,
            },
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AnalysisError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancelled_token_makes_no_calls() {
        let (p, generator) = processor(config(10, 1));
        let file = SourceFile::new("A.cls", "A.cls", b"line".to_vec());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = p
            .process_file(&file, AnalysisMode::Standard, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
