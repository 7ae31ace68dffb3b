//! Prompt assembly
//!
//! Pure text assembly from a context struct. Templates use
//! `{{placeholder}}` substitution; sections appear or collapse based on the
//! adaptive strategy chosen by the learning store.

use std::path::PathBuf;

use crate::domain::{Finding, ProcessingStrategy};
use crate::learning::{AdaptiveStrategy, Strategy};

/// Everything the renderer needs for one prompt
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// Repo-relative path of the target file
    pub file_path: PathBuf,

    /// Current content of the file in the sandbox
    pub file_content: String,

    /// Findings selected for this prompt
    pub findings: Vec<Finding>,

    /// Recommendation from the mapper
    pub adaptive: AdaptiveStrategy,

    /// 1-indexed attempt number
    pub attempt: u32,

    /// Attempt bound for the file
    pub max_attempts: u32,
}

const TEMPLATE: &str = "\
You are fixing static-analysis findings in `{{file-path}}`.

Rewrite that file in place so the findings below are resolved. Keep the \
behavior of the code identical; change nothing that the findings do not \
require.

Findings:
{{findings}}
{{advice}}{{examples}}{{history}}{{approach}}{{content}}";

/// One-line guidance per rule code, consulted when the strategy asks for it
pub fn advice_for(code: &str) -> Option<&'static str> {
    match code {
        "E501" => Some("Break the line with parenthesized continuations, not backslashes"),
        "E722" => Some("Catch the narrowest exception type that the code can actually raise"),
        "F401" => Some("Delete the unused import; if it is re-exported on purpose, add it to __all__"),
        "F841" => Some("Remove the unused binding, or prefix it with an underscore if the call matters"),
        "B008" => Some("Move the call out of the argument default and into the function body"),
        "arg-type" => Some("Adjust the argument to the declared parameter type instead of loosening the annotation"),
        "assignment" => Some("Make the annotation on the target match the assigned expression"),
        "return-value" => Some("Return a value matching the declared return type on every path"),
        "name-defined" => Some("Define or import the name before use; check for typos first"),
        _ => None,
    }
}

/// Tiny before/after snippet per rule code for worked-example sections
fn example_for(code: &str) -> Option<&'static str> {
    match code {
        "F401" => Some("before: `import os, sys` (os unused)\nafter:  `import sys`"),
        "E501" => Some("before: one 120-column call\nafter:  the same call split across parenthesized lines"),
        "E722" => Some("before: `except:`\nafter:  `except ValueError:`"),
        _ => None,
    }
}

/// Apply the processing strategy and per-prompt cap to a finding list
///
/// A cap of zero means unbounded.
pub fn select_findings(findings: &[Finding], strategy: ProcessingStrategy, cap: usize) -> Vec<Finding> {
    let mut selected: Vec<Finding> = match strategy {
        ProcessingStrategy::AllErrors => findings.to_vec(),
        ProcessingStrategy::BatchErrors => findings.to_vec(),
        ProcessingStrategy::OneErrorType => {
            let Some(top_code) = most_frequent_code(findings) else {
                return Vec::new();
            };
            findings.iter().filter(|f| f.code == top_code).cloned().collect()
        }
    };

    if strategy != ProcessingStrategy::AllErrors && cap > 0 && selected.len() > cap {
        selected.truncate(cap);
    }
    selected
}

fn most_frequent_code(findings: &[Finding]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.code.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(code, _)| code.to_string())
}

/// Render the prompt for one attempt
pub fn render(ctx: &PromptContext) -> String {
    let findings_block: String = ctx
        .findings
        .iter()
        .map(|f| format!("- line {}: {} [{}] {}\n", f.line, f.code, f.tool, f.message))
        .collect();

    let advice_block = if ctx.adaptive.verbosity >= Strategy::Detailed {
        let lines: String = distinct_codes(&ctx.findings)
            .into_iter()
            .filter_map(|code| advice_for(&code).map(|a| format!("- {}: {}\n", code, a)))
            .collect();
        if lines.is_empty() {
            String::new()
        } else {
            format!("\nGuidance:\n{}", lines)
        }
    } else {
        String::new()
    };

    let examples_block = if ctx.adaptive.include_examples {
        let lines: String = distinct_codes(&ctx.findings)
            .into_iter()
            .filter_map(|code| example_for(&code).map(|e| format!("{}\n", e)))
            .collect();
        if lines.is_empty() {
            String::new()
        } else {
            format!("\nWorked examples:\n{}", lines)
        }
    } else {
        String::new()
    };

    let history_block = if ctx.adaptive.include_history && ctx.attempt > 1 {
        format!(
            "\nThis is attempt {} of {}; earlier rewrites left some findings unresolved. \
             Take a different approach from a straightforward re-edit.\n",
            ctx.attempt, ctx.max_attempts
        )
    } else {
        String::new()
    };

    let approach_block = match &ctx.adaptive.suggested_approach {
        Some(approach) => format!("\nHint: {}.\n", approach),
        None => String::new(),
    };

    // Minimal prompts rely on the assistant reading the file itself
    let content_block = if ctx.adaptive.verbosity >= Strategy::Normal {
        format!("\nCurrent content of `{}`:\n```\n{}```\n", ctx.file_path.display(), ctx.file_content)
    } else {
        String::new()
    };

    TEMPLATE
        .replace("{{file-path}}", &ctx.file_path.display().to_string())
        .replace("{{findings}}", &findings_block)
        .replace("{{advice}}", &advice_block)
        .replace("{{examples}}", &examples_block)
        .replace("{{history}}", &history_block)
        .replace("{{approach}}", &approach_block)
        .replace("{{content}}", &content_block)
}

fn distinct_codes(findings: &[Finding]) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for finding in findings {
        if !codes.contains(&finding.code) {
            codes.push(finding.code.clone());
        }
    }
    codes
}
