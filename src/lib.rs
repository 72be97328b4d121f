//! # Repository Analyzer
//!
//! LLM-backed analysis of source repositories: per-file code review and
//! knowledge-transfer (onboarding) documentation, streamed as it is
//! produced.
//!
//! Each supported file is split into line-bounded chunks, every chunk is
//! sent to a text-generation backend under a deadline with bounded
//! exponential-backoff retries, and the per-chunk answers are merged in
//! order. A failing chunk or file degrades the result instead of aborting
//! the run. Finished reports are cached per repository and mode.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  FileSource  │──▶│ Orchestrator │──▶│ FileProcessor │──▶ chunk → retry(generate)
//! │ GitHub API   │   │ cache+dedup  │   └───────────────┘
//! └──────────────┘   └──────┬───────┘
//!                           │ ProgressEvent
//!                 ┌─────────┴─────────┐
//!                 ▼                   ▼
//!            ┌──────────┐       ┌──────────┐
//!            │   CLI    │       │   HTTP   │
//!            │  (rana)  │       │  (SSE)   │
//!            └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and wire kinds |
//! | [`models`] | Core data types |
//! | [`chunk`] | Line-boundary chunking |
//! | [`llm`] | Generation backend abstraction |
//! | [`retry`] | Exponential-backoff retry |
//! | [`prompts`] | Prompt construction |
//! | [`processor`] | Per-file analysis |
//! | [`kt`] | Knowledge-transfer categorization and docs |
//! | [`cache`] | Report cache |
//! | [`source`] | Repository file sources |
//! | [`orchestrator`] | Run state machine, dedup, cancellation |
//! | [`progress`] | Progress events and sinks |
//! | [`server`] | HTTP server |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod kt;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod server;
pub mod source;
