//! Conflict diagnostics: excerpts of conflicted files, read from the working
//! tree while the failed cherry-pick is still in place.

use std::path::Path;

use tracing::{debug, warn};

const MAX_FILES: usize = 10;
const MAX_LINES: usize = 100;
const MAX_CHARS: usize = 5000;
const TRUNCATED: &str = "\n... (truncated)";

/// Truncate one file's content to the first 100 lines or 5000 characters.
pub fn format_file_excerpt(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() > MAX_LINES {
        format!("{}{TRUNCATED}", lines[..MAX_LINES].join("\n"))
    } else if content.chars().count() > MAX_CHARS {
        let head: String = content.chars().take(MAX_CHARS).collect();
        format!("{head}{TRUNCATED}")
    } else {
        content.to_string()
    }
}

/// Markdown-ish report of the first ten conflicting files under `workdir`.
pub fn capture_diagnostics(workdir: &Path, paths: &[String]) -> String {
    let mut out: Vec<String> = Vec::new();
    for path in paths.iter().take(MAX_FILES) {
        out.push(format!("### {path}"));
        out.push(String::new());
        match std::fs::read(workdir.join(path)) {
            Ok(bytes) => out.push(format_file_excerpt(&String::from_utf8_lossy(&bytes))),
            Err(e) => {
                warn!(path = %path, error = %e, "could not read conflicted file");
                out.push(format!("(Could not read file: {e})"));
            }
        }
        out.push(String::new());
    }
    if paths.len() > MAX_FILES {
        out.push(format!(
            "... and {} more conflicting files",
            paths.len() - MAX_FILES
        ));
    }
    let report = out.join("\n");
    debug!(files = paths.len(), chars = report.len(), "captured conflict diagnostics");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_unchanged() {
        assert_eq!(format_file_excerpt("a\nb\n"), "a\nb\n");
    }

    #[test]
    fn test_truncates_by_lines() {
        let content: String = (0..150).map(|i| format!("line {i}\n")).collect();
        let excerpt = format_file_excerpt(&content);
        assert!(excerpt.starts_with("line 0\n"));
        assert!(excerpt.contains("line 99"));
        assert!(!excerpt.contains("line 100"));
        assert!(excerpt.ends_with("\n... (truncated)"));
    }

    #[test]
    fn test_truncates_by_chars() {
        let content = "x".repeat(6000);
        let excerpt = format_file_excerpt(&content);
        assert_eq!(excerpt.len(), 5000 + TRUNCATED.len());
    }

    #[test]
    fn test_capture_limits_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..12 {
            let name = format!("f{i}.txt");
            std::fs::write(dir.path().join(&name), format!("<<<<<<< HEAD\n{i}\n")).unwrap();
            paths.push(name);
        }
        paths.push("missing.txt".into());

        let report = capture_diagnostics(dir.path(), &paths);
        assert!(report.contains("### f0.txt"));
        assert!(report.contains("### f9.txt"));
        assert!(!report.contains("### f10.txt"));
        assert!(report.ends_with("... and 3 more conflicting files"));
    }

    #[test]
    fn test_unreadable_file_noted() {
        let dir = tempfile::tempdir().unwrap();
        let report = capture_diagnostics(dir.path(), &["gone.rb".to_string()]);
        assert!(report.contains("### gone.rb"));
        assert!(report.contains("(Could not read file:"));
    }
}
