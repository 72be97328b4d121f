//! Core data models used throughout the analysis pipeline.
//!
//! These types represent the files, chunks, per-file results, and final
//! reports that flow from the file source through the orchestrator and out
//! over the progress channel. Wire names are camelCase to match what
//! browser clients already consume.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Language family of a source file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Apex,
    Visualforce,
    Javascript,
    Lwc,
    Aura,
    Unknown,
}

impl FileType {
    /// Classify a file by the extension of its name (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return FileType::Unknown,
        };
        match ext.as_str() {
            "cls" | "trigger" => FileType::Apex,
            "page" | "component" => FileType::Visualforce,
            "js" => FileType::Javascript,
            "html" => FileType::Lwc,
            "cmp" => FileType::Aura,
            _ => FileType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Apex => "apex",
            FileType::Visualforce => "visualforce",
            FileType::Javascript => "javascript",
            FileType::Lwc => "lwc",
            FileType::Aura => "aura",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis flavour: defect review or knowledge-transfer onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Standard,
    Kt,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Standard => "standard",
            AnalysisMode::Kt => "kt",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(AnalysisMode::Standard),
            "kt" => Ok(AnalysisMode::Kt),
            other => Err(format!(
                "unknown analysis mode '{}': expected standard or kt",
                other
            )),
        }
    }
}

/// Kind of a repository listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    #[serde(other)]
    Other,
}

/// One entry of a repository file listing, as returned by the file source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A fetched source file. Identity is `path`; content is the raw bytes as
/// downloaded and is only interpreted as text by the chunker.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub path: String,
    pub content: Vec<u8>,
    pub file_type: FileType,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, path: impl Into<String>, content: Vec<u8>) -> Self {
        let name = name.into();
        let file_type = FileType::from_name(&name);
        Self {
            name,
            path: path.into(),
            content,
            file_type,
        }
    }
}

/// A line-bounded slice of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_index: usize,
    pub text: String,
}

/// Per-file outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    PartialFailure,
}

/// Result of analyzing one file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisResult {
    pub file_name: String,
    pub file_type: FileType,
    pub analysis: String,
    pub status: AnalysisStatus,
    pub mode: AnalysisMode,
}

/// Final report of a standard-mode run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub repository: String,
    pub overview: String,
    pub analyses: Vec<FileAnalysisResult>,
    pub timestamp: String,
}

/// Knowledge-transfer buckets. A file may appear in several buckets, or in
/// none when its analysis mentions no category keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KtAnalysis {
    pub setup: Vec<FileAnalysisResult>,
    pub workflow: Vec<FileAnalysisResult>,
    pub business: Vec<FileAnalysisResult>,
    pub integration: Vec<FileAnalysisResult>,
}

/// Onboarding documentation synthesized from the KT buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Documentation {
    pub setup: Vec<String>,
    pub workflows: Vec<String>,
    pub architecture: Vec<String>,
    pub business_logic: Vec<String>,
    pub generated_docs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickStart {
    pub setup: Vec<String>,
    pub first_steps: Vec<String>,
}

/// Final report of a KT-mode run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KtReport {
    pub repository: String,
    pub kt_analysis: KtAnalysis,
    pub documentation: Documentation,
    pub quick_start: QuickStart,
    pub timestamp: String,
}

/// Either report flavour. Serializes as the inner report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Report {
    Kt(KtReport),
    Standard(AnalysisReport),
}

impl Report {
    pub fn mode(&self) -> AnalysisMode {
        match self {
            Report::Standard(_) => AnalysisMode::Standard,
            Report::Kt(_) => AnalysisMode::Kt,
        }
    }

    pub fn repository(&self) -> &str {
        match self {
            Report::Standard(r) => &r.repository,
            Report::Kt(r) => &r.repository,
        }
    }
}
