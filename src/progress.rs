//! Analysis progress events and the sinks that carry them.
//!
//! The orchestrator reports milestones through a [`ProgressSink`] as they
//! happen. The HTTP server forwards them as server-sent events; the CLI
//! prints them on **stderr** so stdout stays parseable for scripts.
//!
//! # Wire format
//!
//! Each event is framed as
//!
//! ```text
//! event: <type>
//! data: {"event":"<type>","data":<payload>}
//!
//! ```
//!
//! | Type | Payload |
//! |------|---------|
//! | `status` | phase description string |
//! | `progress` | `{file, status: "completed", analysis}` |
//! | `error` | `{file, error}` per file, or `{message, type}` when terminal |
//! | `complete` | the full report; always last on success |
//!
//! A heartbeat comment (`:`) is interleaved by the transport to keep idle
//! connections alive.

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{AnalysisError, ErrorKind};
use crate::models::Report;

/// A single progress event of one analysis run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Human-readable description of the current phase.
    Status(String),
    /// One file finished.
    FileCompleted { file: String, analysis: String },
    /// One file could not be fetched or analyzed; the run continues.
    FileFailed { file: String, error: String },
    /// The run failed. Always terminal.
    Failed { message: String, kind: ErrorKind },
    /// The run finished. Always terminal.
    Complete(Arc<Report>),
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ProgressEvent::Status(message.into())
    }

    pub fn failed(err: &AnalysisError) -> Self {
        ProgressEvent::Failed {
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// SSE event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Status(_) => "status",
            ProgressEvent::FileCompleted { .. } => "progress",
            ProgressEvent::FileFailed { .. } | ProgressEvent::Failed { .. } => "error",
            ProgressEvent::Complete(_) => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Failed { .. } | ProgressEvent::Complete(_)
        )
    }

    pub fn payload(&self) -> Value {
        match self {
            ProgressEvent::Status(message) => json!(message),
            ProgressEvent::FileCompleted { file, analysis } => json!({
                "file": file,
                "status": "completed",
                "analysis": analysis,
            }),
            ProgressEvent::FileFailed { file, error } => json!({
                "file": file,
                "error": error,
            }),
            ProgressEvent::Failed { message, kind } => json!({
                "message": message,
                "type": kind.as_str(),
            }),
            ProgressEvent::Complete(report) => {
                serde_json::to_value(report.as_ref()).unwrap_or(Value::Null)
            }
        }
    }

    /// `{event, data}` envelope carried in the SSE `data:` line.
    pub fn envelope(&self) -> Value {
        json!({
            "event": self.event_type(),
            "data": self.payload(),
        })
    }

    /// Full SSE frame including the trailing blank line.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type(), self.envelope())
    }
}

/// Receives progress events. Called from the orchestrator in event order.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events into a channel, e.g. to an SSE response stream.
///
/// Sends to a dropped receiver are ignored; the orchestrator learns about
/// disconnects through its cancellation token, not through the sink.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Human-friendly progress on stderr: "analyze  completed  A.cls".
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn emit(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Status(message) => format!("analyze  {}\n", message),
            ProgressEvent::FileCompleted { file, analysis } => format!(
                "analyze  completed  {} ({} chars)\n",
                file,
                analysis.chars().count()
            ),
            ProgressEvent::FileFailed { file, error } => {
                format!("analyze  failed  {}: {}\n", file, error)
            }
            ProgressEvent::Failed { message, kind } => {
                format!("analyze  error [{}]  {}\n", kind.as_str(), message)
            }
            ProgressEvent::Complete(report) => {
                format!("analyze  complete  {}\n", report.repository())
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one envelope per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event.envelope()) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise JSON lines.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Json
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a sink for this mode.
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
