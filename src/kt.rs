//! Knowledge-transfer bucketing and documentation assembly.
//!
//! Each KT-mode [`FileAnalysisResult`] is placed into every category whose
//! keywords appear (case-insensitively) in its analysis text:
//!
//! | Category | Keywords |
//! |----------|----------|
//! | setup | configuration, environment, dependency |
//! | workflow | process, flow, pipeline |
//! | business | rule, validation, calculation |
//! | integration | api, service, connection |
//!
//! The generated documentation text is then split into sections by its
//! headings so clients get structured setup and workflow lists alongside
//! the raw text.

use crate::models::{Documentation, FileAnalysisResult, KtAnalysis, QuickStart};

/// Knowledge-transfer category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KtCategory {
    Setup,
    Workflow,
    Business,
    Integration,
}

impl KtCategory {
    pub const ALL: [KtCategory; 4] = [
        KtCategory::Setup,
        KtCategory::Workflow,
        KtCategory::Business,
        KtCategory::Integration,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            KtCategory::Setup => &["configuration", "environment", "dependency"],
            KtCategory::Workflow => &["process", "flow", "pipeline"],
            KtCategory::Business => &["rule", "validation", "calculation"],
            KtCategory::Integration => &["api", "service", "connection"],
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords().iter().any(|k| lowered.contains(k))
    }
}

impl KtAnalysis {
    pub fn bucket_mut(&mut self, category: KtCategory) -> &mut Vec<FileAnalysisResult> {
        match category {
            KtCategory::Setup => &mut self.setup,
            KtCategory::Workflow => &mut self.workflow,
            KtCategory::Business => &mut self.business,
            KtCategory::Integration => &mut self.integration,
        }
    }
}

/// Categories whose keywords occur in `analysis`.
pub fn categories_for(analysis: &str) -> Vec<KtCategory> {
    let lowered = analysis.to_lowercase();
    KtCategory::ALL
        .iter()
        .copied()
        .filter(|c| c.matches(&lowered))
        .collect()
}

/// Bucket results by keyword match, preserving input order within each
/// bucket.
pub fn categorize(results: &[FileAnalysisResult]) -> KtAnalysis {
    let mut buckets = KtAnalysis::default();
    for result in results {
        for category in categories_for(&result.analysis) {
            buckets.bucket_mut(category).push(result.clone());
        }
    }
    buckets
}

#[derive(Clone, Copy)]
enum Section {
    Setup,
    Workflows,
    Architecture,
    BusinessLogic,
}

fn section_for_heading(heading: &str) -> Option<Section> {
    let h = heading.to_lowercase();
    if h.contains("setup") || h.contains("environment") {
        Some(Section::Setup)
    } else if h.contains("workflow") {
        Some(Section::Workflows)
    } else if h.contains("architecture") {
        Some(Section::Architecture)
    } else if h.contains("business") {
        Some(Section::BusinessLogic)
    } else {
        None
    }
}

/// Heading text if `line` is a markdown heading (`# Setup`), or a numbered
/// heading (`1. Setup instructions`) when `numbered` is set.
fn heading_text(line: &str, numbered: bool) -> Option<&str> {
    if let Some(rest) = line.strip_prefix('#') {
        return Some(rest.trim_start_matches('#').trim());
    }
    if !numbered {
        return None;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return Some(rest.trim());
        }
    }
    None
}

/// Split generated documentation text into the four known sections.
///
/// Lines under an unrecognized heading are dropped from the sections but
/// remain in `generated_docs`. Numbered lines only act as headings in text
/// that has no `#` headings; otherwise they are list items.
pub fn parse_documentation(generated: &str) -> Documentation {
    let mut doc = Documentation {
        generated_docs: generated.to_string(),
        ..Default::default()
    };
    let numbered_headings = !generated.lines().any(|l| l.trim_start().starts_with('#'));
    let mut current: Option<Section> = None;

    for raw in generated.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(heading) = heading_text(line, numbered_headings) {
            if let Some(section) = section_for_heading(heading) {
                current = Some(section);
                continue;
            }
            // unknown numbered headings stay under the open section
            if line.starts_with('#') {
                current = None;
                continue;
            }
        }
        let Some(section) = current else { continue };
        let item = line
            .trim_start_matches(['-', '*', '•'])
            .trim()
            .to_string();
        if item.is_empty() {
            continue;
        }
        match section {
            Section::Setup => doc.setup.push(item),
            Section::Workflows => doc.workflows.push(item),
            Section::Architecture => doc.architecture.push(item),
            Section::BusinessLogic => doc.business_logic.push(item),
        }
    }

    doc
}

/// Setup steps plus the first three workflow items.
pub fn quick_start(doc: &Documentation) -> QuickStart {
    QuickStart {
        setup: doc.setup.clone(),
        first_steps: doc.workflows.iter().take(3).cloned().collect(),
    }
}
