//! Structural checks on file changes.
//!
//! Only well-formedness is checked: path shape and non-empty content. The
//! content's own syntax is never parsed.

use super::{CheckStatus, FileValidation};
use crate::models::request::ConfigurationFileChange;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn control_chars() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1f\x7f]").ok())
        .as_ref()
}

/// Check one change in isolation.
pub fn check_change(change: &ConfigurationFileChange) -> FileValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let path = change.file_path.as_str();

    if !path.starts_with('/') {
        errors.push("file path must be absolute".to_string());
    }
    if path == "/" || path.ends_with('/') {
        errors.push("file path must name a file, not a directory".to_string());
    }
    if path.split('/').any(|segment| segment == "..") {
        errors.push("file path must not contain '..'".to_string());
    }
    if let Some(re) = control_chars() {
        if re.is_match(path) {
            errors.push("file path contains control characters".to_string());
        }
    }

    if change.content.is_empty() {
        errors.push("content must not be empty".to_string());
    } else if !change.content.ends_with('\n') {
        warnings.push("content has no trailing newline".to_string());
    }

    FileValidation {
        file_path: change.file_path.clone(),
        change_id: change.change_id.clone(),
        status: if errors.is_empty() {
            CheckStatus::Valid
        } else {
            CheckStatus::Failed
        },
        errors,
        warnings,
    }
}

/// Check every change, warning when several changes target the same path.
pub fn check_changes(changes: &[ConfigurationFileChange]) -> Vec<FileValidation> {
    let mut per_path: HashMap<&str, usize> = HashMap::new();
    for change in changes {
        *per_path.entry(change.file_path.as_str()).or_default() += 1;
    }

    changes
        .iter()
        .map(|change| {
            let mut validation = check_change(change);
            let count = per_path
                .get(change.file_path.as_str())
                .copied()
                .unwrap_or(0);
            if count > 1 {
                validation.warnings.push(format!(
                    "{} changes target this path; the last one wins",
                    count
                ));
            }
            validation
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, content: &str) -> ConfigurationFileChange {
        ConfigurationFileChange::new("c", path, content)
    }

    #[test]
    fn test_valid_change() {
        let v = check_change(&change("/etc/nginx/nginx.conf", "worker_processes 1;\n"));
        assert!(v.is_valid());
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn test_rejects_bad_paths() {
        for path in [
            "etc/app.conf",
            "/etc/conf.d/",
            "/",
            "/etc/../shadow",
            "/etc/a\nb",
        ] {
            let v = check_change(&change(path, "x\n"));
            assert!(!v.is_valid(), "{:?} should be rejected", path);
        }
    }

    #[test]
    fn test_rejects_empty_content() {
        let v = check_change(&change("/etc/app.conf", ""));
        assert_eq!(v.errors, vec!["content must not be empty".to_string()]);
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let checks = check_changes(&[change("/etc/a", "one"), change("/etc/a", "two\n")]);
        assert!(checks.iter().all(FileValidation::is_valid));
        assert_eq!(checks[0].warnings.len(), 2);
        assert_eq!(checks[1].warnings.len(), 1);
    }
}
