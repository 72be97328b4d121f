//! Batch orchestration of one repository analysis.
//!
//! A run moves through the phases of [`RunPhase`]:
//!
//! ```text
//! PENDING → FETCHING_FILES → FILTERING → ANALYZING_FILE* → SUMMARIZING → COMPLETE
//!               │                │                              │
//!               └────────────────┴──────────────────────────────┴──→ FAILED
//! ```
//!
//! Files are processed one after another in listing order. A file that
//! cannot be fetched or analyzed produces an `error {file, error}` event and
//! is left out; the run carries on. Exactly one terminal event (`complete`
//! or `error {message, type}`) ends every run.
//!
//! # Cache and in-flight runs
//!
//! Finished reports are stored in the injected [`ReportCache`] under
//! `(repository, mode)`. While a run for a key is in progress, further
//! callers for the same key attach to it: they receive the leader's events
//! from that point on, including the terminal one, instead of starting a
//! second run. The report is cached before the in-flight entry is released,
//! so a caller arriving afterwards always finds it.
//!
//! # Cancellation
//!
//! A shared run has its own token, separate from the callers' tokens. A
//! caller whose token fires detaches from the run; the run itself is
//! cancelled only when the last attached caller has detached. Followers
//! that detach end with `cancelled`. The leader keeps driving the run for
//! the callers still attached and returns its outcome.
//!
//! The run token is checked before every external call (file listing, each
//! fetch, each generation attempt), and a listing, fetch or generation in
//! flight is abandoned when it fires. A cancelled run ends with
//! [`AnalysisError::Cancelled`] and caches nothing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheKey, ReportCache};
use crate::config::{AnalysisConfig, Config};
use crate::error::{AnalysisError, ErrorKind, Result};
use crate::kt::{categorize, parse_documentation, quick_start};
use crate::llm::{GenerationRequest, Generator};
use crate::models::{
    AnalysisMode, AnalysisReport, EntryKind, FileAnalysisResult, KtReport, RepoEntry, Report,
    SourceFile,
};
use crate::processor::{generate_checked, FileProcessor};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::{custom_prompt, documentation_prompt, overview_prompt};
use crate::source::FileSource;

/// Buffered events per in-flight run before a slow follower starts lagging.
const FOLLOWER_BUFFER: usize = 1024;

/// Phase of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    FetchingFiles,
    Filtering,
    AnalyzingFile,
    Summarizing,
    Complete,
    Failed,
}

struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: RunPhase::Pending,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }
}

/// Include/exclude glob filter over repository paths (case-insensitive).
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        Ok(Self {
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&config.exclude_globs)?,
        })
    }

    pub fn accepts(&self, path: &str) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// One run in progress and the callers attached to it.
struct InFlightRun {
    id: Uuid,
    events: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    attached: usize,
}

type InFlightRegistry = Mutex<HashMap<CacheKey, InFlightRun>>;

/// Identifies the run a caller is attached to.
struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
}

/// How a caller takes part in a run for its key.
enum Role {
    Cached(Report),
    Leader(RunHandle, broadcast::Sender<ProgressEvent>),
    Follower(RunHandle, broadcast::Receiver<ProgressEvent>),
}

/// Removes the in-flight entry when the leader finishes or is dropped.
struct InFlightEntry<'a> {
    registry: &'a InFlightRegistry,
    key: CacheKey,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        let mut runs = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        runs.remove(&self.key);
    }
}

/// Sends every event to the caller's sink and to attached followers.
struct Fanout {
    sink: Arc<dyn ProgressSink>,
    followers: broadcast::Sender<ProgressEvent>,
}

impl ProgressSink for Fanout {
    fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event.clone());
        // no receivers is the common case
        let _ = self.followers.send(event);
    }
}

/// Drives repository analyses end to end.
pub struct Orchestrator {
    config: Arc<Config>,
    generator: Arc<dyn Generator>,
    cache: Arc<dyn ReportCache>,
    processor: FileProcessor,
    filter: FileFilter,
    in_flight: InFlightRegistry,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        generator: Arc<dyn Generator>,
        cache: Arc<dyn ReportCache>,
    ) -> anyhow::Result<Self> {
        let filter = FileFilter::new(&config.analysis)?;
        let processor = FileProcessor::new(config.clone(), generator.clone());
        Ok(Self {
            config,
            generator,
            cache,
            processor,
            filter,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Analyze `repository` in `mode`, reporting progress to `sink`.
    ///
    /// The terminal event emitted to `sink` always matches the returned
    /// result: `complete` for `Ok`, `error {message, type}` for `Err`.
    pub async fn run(
        &self,
        repository: &str,
        mode: AnalysisMode,
        source: &dyn FileSource,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Report> {
        let key = CacheKey::new(repository, mode);
        let span = tracing::info_span!(
            "analysis",
            run_id = %Uuid::new_v4(),
            repository,
            %mode
        );

        async move {
            match self.join(&key) {
                Role::Cached(report) => {
                    tracing::info!("serving cached report");
                    sink.emit(ProgressEvent::Complete(Arc::new(report.clone())));
                    Ok(report)
                }
                Role::Follower(run, rx) => {
                    self.follow(&key, &run, rx, sink.as_ref(), &cancel).await
                }
                Role::Leader(run, tx) => self.lead(key, &run, tx, source, sink, &cancel).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Single-shot analysis of caller-supplied content. No chunking, no
    /// cache, standard-mode budget.
    pub async fn analyze_custom(&self, file_name: &str, content: &str, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(AnalysisError::InvalidInput("prompt must not be empty".into()));
        }
        let settings = self.config.mode_settings(AnalysisMode::Standard);
        let request = GenerationRequest {
            prompt: custom_prompt(file_name, content, prompt),
            timeout: settings.timeout,
            max_output: settings.max_tokens,
        };
        tracing::info!(file = file_name, "running custom analysis");
        generate_checked(
            self.generator.as_ref(),
            &self.config.retry_policy(),
            request,
            &CancellationToken::new(),
        )
        .await
    }

    fn join(&self, key: &CacheKey) -> Role {
        let mut runs = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // Checked under the registry lock: a leader caches before it
        // deregisters, so a miss here means no finished run was missed.
        if let Some(report) = self.cache.get(key) {
            return Role::Cached(report);
        }
        if let Some(run) = runs.get_mut(key) {
            run.attached += 1;
            let handle = RunHandle {
                id: run.id,
                cancel: run.cancel.clone(),
            };
            return Role::Follower(handle, run.events.subscribe());
        }
        let (tx, _) = broadcast::channel(FOLLOWER_BUFFER);
        let handle = RunHandle {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        runs.insert(
            key.clone(),
            InFlightRun {
                id: handle.id,
                events: tx.clone(),
                cancel: handle.cancel.clone(),
                attached: 1,
            },
        );
        Role::Leader(handle, tx)
    }

    /// Drop one caller from `run`, cancelling it when nobody is left.
    fn detach(&self, key: &CacheKey, run: &RunHandle) {
        let mut runs = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = runs.get_mut(key).filter(|entry| entry.id == run.id) else {
            return;
        };
        entry.attached = entry.attached.saturating_sub(1);
        tracing::debug!(attached = entry.attached, "caller detached from analysis");
        if entry.attached == 0 {
            entry.cancel.cancel();
        }
    }

    async fn lead(
        &self,
        key: CacheKey,
        run: &RunHandle,
        tx: broadcast::Sender<ProgressEvent>,
        source: &dyn FileSource,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let entry = InFlightEntry {
            registry: &self.in_flight,
            key: key.clone(),
        };
        let fanout = Fanout {
            sink,
            followers: tx,
        };
        let mut tracker = PhaseTracker::new();

        let result = {
            let execution = self.execute(&key, source, &fanout, &run.cancel, &mut tracker);
            tokio::pin!(execution);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.detach(&key, run);
                    execution.await
                }
                result = &mut execution => result,
            }
        };

        if let Ok(report) = &result {
            self.cache
                .set(key.clone(), report.clone(), self.config.cache_ttl(key.mode));
        }
        drop(entry);

        match &result {
            Ok(report) => {
                tracker.advance(RunPhase::Complete);
                tracing::info!("analysis complete");
                fanout.emit(ProgressEvent::Complete(Arc::new(report.clone())));
            }
            Err(e) => {
                tracker.advance(RunPhase::Failed);
                match e {
                    AnalysisError::Cancelled => tracing::info!("analysis cancelled"),
                    _ => tracing::error!(kind = e.kind().as_str(), "analysis failed: {}", e),
                }
                fanout.emit(ProgressEvent::failed(e));
            }
        }
        result
    }

    async fn follow(
        &self,
        key: &CacheKey,
        run: &RunHandle,
        mut rx: broadcast::Receiver<ProgressEvent>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        tracing::info!("attaching to in-flight analysis");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    self.detach(key, run);
                    sink.emit(ProgressEvent::failed(&AnalysisError::Cancelled));
                    return Err(AnalysisError::Cancelled);
                }
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    sink.emit(event.clone());
                    match event {
                        ProgressEvent::Complete(report) => return Ok(report.as_ref().clone()),
                        ProgressEvent::Failed { message, kind } => {
                            return Err(error_from_event(kind, message, &key.repository))
                        }
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "follower fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let err =
                        AnalysisError::System("in-flight analysis ended without a result".into());
                    sink.emit(ProgressEvent::failed(&err));
                    return Err(err);
                }
            }
        }
    }

    async fn execute(
        &self,
        key: &CacheKey,
        source: &dyn FileSource,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        tracker: &mut PhaseTracker,
    ) -> Result<Report> {
        let repository = key.repository.as_str();
        let mode = key.mode;
        tracing::info!("starting analysis");
        sink.emit(ProgressEvent::status("Starting analysis..."));

        tracker.advance(RunPhase::FetchingFiles);
        ensure_active(cancel)?;
        let entries = until_cancelled(cancel, source.list_files(repository))
            .await?
            .map_err(|e| {
                AnalysisError::System(format!("Failed to fetch repository contents: {:#}", e))
            })?;

        tracker.advance(RunPhase::Filtering);
        sink.emit(ProgressEvent::status("Processing source files..."));
        let selected = self.select(entries);
        if selected.is_empty() {
            return Err(AnalysisError::NoSupportedFiles {
                repository: repository.to_string(),
            });
        }
        tracing::info!(files = selected.len(), "files selected for analysis");

        tracker.advance(RunPhase::AnalyzingFile);
        let mut results = Vec::with_capacity(selected.len());
        for entry in &selected {
            ensure_active(cancel)?;
            sink.emit(ProgressEvent::status(format!("Analyzing {}...", entry.name)));
            match self.analyze_entry(entry, mode, source, cancel).await {
                Ok(result) => {
                    sink.emit(ProgressEvent::FileCompleted {
                        file: result.file_name.clone(),
                        analysis: result.analysis.clone(),
                    });
                    results.push(result);
                }
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(e) => {
                    tracing::warn!(file = %entry.path, "failed to process file: {}", e);
                    sink.emit(ProgressEvent::FileFailed {
                        file: entry.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if results.is_empty() {
            return Err(AnalysisError::NothingAnalyzed);
        }

        tracker.advance(RunPhase::Summarizing);
        ensure_active(cancel)?;
        let report = match mode {
            AnalysisMode::Standard => {
                sink.emit(ProgressEvent::status("Generating codebase overview..."));
                Report::Standard(self.summarize_standard(repository, results, cancel).await?)
            }
            AnalysisMode::Kt => {
                sink.emit(ProgressEvent::status("Generating KT documentation..."));
                Report::Kt(self.summarize_kt(repository, results, cancel).await?)
            }
        };
        Ok(report)
    }

    /// Regular files accepted by the filter, in listing order.
    fn select(&self, entries: Vec<RepoEntry>) -> Vec<RepoEntry> {
        entries
            .into_iter()
            .filter(|e| e.kind == EntryKind::File)
            .filter(|e| {
                let path = if e.path.is_empty() { &e.name } else { &e.path };
                self.filter.accepts(path)
            })
            .collect()
    }

    async fn analyze_entry(
        &self,
        entry: &RepoEntry,
        mode: AnalysisMode,
        source: &dyn FileSource,
        cancel: &CancellationToken,
    ) -> Result<FileAnalysisResult> {
        let content = until_cancelled(cancel, source.fetch_content(entry))
            .await?
            .map_err(|e| AnalysisError::transport(format!("{:#}", e)))?;
        let file = SourceFile::new(entry.name.clone(), entry.path.clone(), content);
        self.processor.process_file(&file, mode, cancel).await
    }

    async fn summarize_standard(
        &self,
        repository: &str,
        analyses: Vec<FileAnalysisResult>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport> {
        let settings = self.config.mode_settings(AnalysisMode::Standard);
        let request = GenerationRequest {
            prompt: overview_prompt(&analyses),
            timeout: settings.summary_timeout,
            max_output: settings.max_tokens,
        };
        let overview = self
            .summarize(request, cancel)
            .await
            .map_err(|e| summary_error("overview", e))?;

        Ok(AnalysisReport {
            repository: repository.to_string(),
            overview,
            analyses,
            timestamp: timestamp(),
        })
    }

    async fn summarize_kt(
        &self,
        repository: &str,
        analyses: Vec<FileAnalysisResult>,
        cancel: &CancellationToken,
    ) -> Result<KtReport> {
        let settings = self.config.mode_settings(AnalysisMode::Kt);
        let kt_analysis = categorize(&analyses);
        let request = GenerationRequest {
            prompt: documentation_prompt(&kt_analysis),
            timeout: settings.summary_timeout,
            max_output: settings.max_tokens,
        };
        let generated = self
            .summarize(request, cancel)
            .await
            .map_err(|e| summary_error("KT documentation", e))?;

        let documentation = parse_documentation(&generated);
        let quick_start = quick_start(&documentation);
        Ok(KtReport {
            repository: repository.to_string(),
            kt_analysis,
            documentation,
            quick_start,
            timestamp: timestamp(),
        })
    }

    async fn summarize(&self, request: GenerationRequest, cancel: &CancellationToken) -> Result<String> {
        generate_checked(
            self.generator.as_ref(),
            &self.config.retry_policy(),
            request,
            cancel,
        )
        .await
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}

/// Await `operation` unless `cancel` fires first, in which case it is
/// dropped unfinished.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
        out = operation => Ok(out),
    }
}

/// Summarization failures surface as system errors, except cancellation.
fn summary_error(what: &str, err: AnalysisError) -> AnalysisError {
    match err {
        AnalysisError::Cancelled => AnalysisError::Cancelled,
        other => AnalysisError::System(format!("Failed to generate {}: {}", what, other)),
    }
}

/// Rebuild an error from a terminal event received as a follower.
fn error_from_event(kind: ErrorKind, message: String, repository: &str) -> AnalysisError {
    match kind {
        ErrorKind::Cancelled => AnalysisError::Cancelled,
        ErrorKind::NoSupportedFiles => AnalysisError::NoSupportedFiles {
            repository: repository.to_string(),
        },
        _ => AnalysisError::System(message),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
