//! Scripted tool runner for tests
//!
//! Reports one finding per `LINT:<code>` marker found in a file, so test
//! fixtures control findings purely through file content: an assistant that
//! removes a marker has "fixed" the finding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{Finding, Severity};

use super::{ToolError, ToolRunner, relativize};

/// Content-driven tool double
///
/// Not wired into the standard registry; sessions under test register it
/// explicitly.
pub struct MarkerTool {
    name: &'static str,
}

impl MarkerTool {
    pub fn new() -> Self {
        Self { name: "marker" }
    }

    /// A marker tool reporting under a different name
    pub fn named(name: &'static str) -> Self {
        Self { name }
    }

    fn scan_file(&self, abs: &Path, dir: &Path) -> Result<Vec<Finding>, ToolError> {
        let content = std::fs::read_to_string(abs).map_err(|e| ToolError::InvocationFailed {
            tool: self.name.to_string(),
            message: format!("{}: {}", abs.display(), e),
        })?;

        let marker = Regex::new(r"LINT:([A-Za-z0-9_-]+)").unwrap();
        let rel = relativize(abs, dir);

        let findings = content
            .lines()
            .enumerate()
            .flat_map(|(idx, line)| {
                let rel = rel.clone();
                marker.captures_iter(line).map(move |cap| {
                    Finding::new(
                        self.name,
                        cap[1].to_string(),
                        Severity::Warning,
                        rel.clone(),
                        idx as u32 + 1,
                        format!("marker {} present", &cap[1]),
                    )
                })
            })
            .collect();

        Ok(findings)
    }

    fn scan_dir(&self, dir: &Path) -> Result<Vec<Finding>, ToolError> {
        let mut findings = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| ToolError::InvocationFailed {
            tool: self.name.to_string(),
            message: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
            .collect();
        paths.sort();

        for path in paths {
            findings.extend(self.scan_file(&path, dir)?);
        }
        Ok(findings)
    }
}

impl Default for MarkerTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for MarkerTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn available(&self) -> bool {
        true
    }

    async fn run(&self, dir: &Path, files: Option<&[PathBuf]>) -> Result<Vec<Finding>, ToolError> {
        match files {
            Some(files) => {
                let mut findings = Vec::new();
                for file in files {
                    let abs = if file.is_absolute() { file.clone() } else { dir.join(file) };
                    findings.extend(self.scan_file(&abs, dir)?);
                }
                Ok(findings)
            }
            None => self.scan_dir(dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_marker_tool_reports_markers() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("app.py"),
            "import os  # LINT:F401\nx = 1\ny = 2  # LINT:E501\n",
        )
        .unwrap();

        let tool = MarkerTool::new();
        let findings = tool.run(temp.path(), None).await.unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].code, "F401");
        assert_eq!(findings[0].line, 1);
        assert_eq!(findings[1].code, "E501");
        assert_eq!(findings[1].line, 3);
        assert_eq!(findings[0].path, PathBuf::from("app.py"));
    }

    #[tokio::test]
    async fn test_marker_tool_clean_file() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("app.py"), "x = 1\n").unwrap();

        let tool = MarkerTool::new();
        let findings = tool.run(temp.path(), None).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_marker_tool_file_subset() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.py"), "# LINT:X\n").unwrap();
        std::fs::write(temp.path().join("b.py"), "# LINT:Y\n").unwrap();

        let tool = MarkerTool::new();
        let findings = tool
            .run(temp.path(), Some(&[PathBuf::from("b.py")]))
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "Y");
    }
}
