//! Prompt builders for every generation call the pipeline makes.

use crate::models::{AnalysisMode, FileAnalysisResult, FileType, KtAnalysis};

/// Prompt for one chunk of one file, flavoured by mode.
pub fn chunk_prompt(mode: AnalysisMode, chunk: &str, file_type: FileType, file_name: &str) -> String {
    match mode {
        AnalysisMode::Standard => review_prompt(chunk, file_type, file_name),
        AnalysisMode::Kt => onboarding_prompt(chunk, file_type, file_name),
    }
}

fn review_prompt(chunk: &str, file_type: FileType, file_name: &str) -> String {
    format!(
        "Analyze this {file_type} code from {file_name} with technical precision.\n\
         \n\
         Cover, prioritizing critical issues:\n\
         1. Code structure and quality (design patterns, complexity)\n\
         2. Defects and error handling gaps\n\
         3. Performance (query usage, bulk operations, CPU and memory)\n\
         4. Security (access checks, injection, sharing)\n\
         5. Concrete fixes, with corrected code where useful\n\
         \n\
         Code to analyze:\n\
         {chunk}"
    )
}

fn onboarding_prompt(chunk: &str, file_type: FileType, file_name: &str) -> String {
    format!(
        "Analyze this {file_type} code from {file_name} for new developer onboarding.\n\
         \n\
         Describe:\n\
         1. File purpose and business context\n\
         2. Important methods, data structures and integration points\n\
         3. Architecture role and dependencies on other components\n\
         4. Setup prerequisites, common modifications and testing needs\n\
         5. Conventions and error handling approach\n\
         \n\
         Code to analyze:\n\
         {chunk}"
    )
}

/// Codebase overview prompt embedding every per-file result.
pub fn overview_prompt(analyses: &[FileAnalysisResult]) -> String {
    let files = analyses
        .iter()
        .map(|a| {
            format!(
                "File: {}\nType: {}\nAnalysis: {}\n",
                a.file_name, a.file_type, a.analysis
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "As a development expert, summarize this codebase from the per-file reviews below.\n\
         \n\
         Files analyzed:\n\
         {files}\n\
         Provide an overview covering:\n\
         1. Overall Architecture\n\
         2. Code Quality\n\
         3. Performance Considerations\n\
         4. Security Analysis\n\
         5. Best Practices\n\
         6. Recommendations for Improvement"
    )
}

/// Documentation synthesis prompt for KT mode.
///
/// Asks for headed sections so [`crate::kt::parse_documentation`] can
/// pick them apart.
pub fn documentation_prompt(buckets: &KtAnalysis) -> String {
    let section = |title: &str, files: &[FileAnalysisResult]| -> String {
        if files.is_empty() {
            return format!("## {}\n(no files)\n", title);
        }
        let body = files
            .iter()
            .map(|f| format!("### {} ({})\n{}", f.file_name, f.file_type, f.analysis))
            .collect::<Vec<_>>()
            .join("\n");
        format!("## {}\n{}\n", title, body)
    };

    format!(
        "Based on the following categorized codebase analysis, write developer onboarding documentation.\n\
         \n\
         {}\n{}\n{}\n{}\n\
         Answer with exactly these markdown headings, each followed by bullet points:\n\
         # Setup\n\
         # Development Workflows\n\
         # Architecture\n\
         # Business Logic",
        section("Setup", &buckets.setup),
        section("Workflow", &buckets.workflow),
        section("Business", &buckets.business),
        section("Integration", &buckets.integration),
    )
}

/// Free-form analysis of caller-supplied content.
pub fn custom_prompt(file_name: &str, content: &str, prompt: &str) -> String {
    format!(
        "Analyze this code from {file_name} based on the following prompt:\n\
         {prompt}\n\
         \n\
         Code to analyze:\n\
         {content}\n\
         \n\
         Give a technical, precise answer focusing on specific code improvements, \
         performance impact and implementation details."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisStatus;

    fn result(name: &str, analysis: &str) -> FileAnalysisResult {
        FileAnalysisResult {
            file_name: name.into(),
            file_type: FileType::from_name(name),
            analysis: analysis.into(),
            status: AnalysisStatus::Success,
            mode: AnalysisMode::Standard,
        }
    }

    #[test]
    fn chunk_prompt_embeds_context() {
        let p = chunk_prompt(AnalysisMode::Standard, "trigger T on Account {}", FileType::Apex, "T.trigger");
        assert!(p.contains("apex"));
        assert!(p.contains("T.trigger"));
        assert!(p.contains("trigger T on Account {}"));

        let kt = chunk_prompt(AnalysisMode::Kt, "x", FileType::Lwc, "c.html");
        assert!(kt.contains("onboarding"));
        assert_ne!(p, kt);
    }

    #[test]
    fn overview_prompt_lists_every_file() {
        let p = overview_prompt(&[result("A.cls", "alpha"), result("B.js", "beta")]);
        assert!(p.contains("File: A.cls\nType: apex\nAnalysis: alpha"));
        assert!(p.contains("File: B.js\nType: javascript\nAnalysis: beta"));
    }

    #[test]
    fn documentation_prompt_marks_empty_buckets() {
        let buckets = KtAnalysis {
            setup: vec![result("Env.cls", "environment config")],
            ..Default::default()
        };
        let p = documentation_prompt(&buckets);
        assert!(p.contains("### Env.cls (apex)"));
        assert!(p.contains("## Workflow\n(no files)"));
    }
}
