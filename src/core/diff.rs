//! Unified diff previews.

use similar::TextDiff;

/// Unified diff of `old` -> `new`, empty when the contents are identical.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a{}", path), &format!("b{}", path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_empty() {
        assert!(unified_diff("/etc/a", "x\n", "x\n").is_empty());
    }

    #[test]
    fn test_diff_marks_changes() {
        let diff = unified_diff(
            "/etc/a.conf",
            "port = 80\nhost = a\n",
            "port = 8080\nhost = a\n",
        );
        assert!(diff.contains("--- a/etc/a.conf"));
        assert!(diff.contains("+++ b/etc/a.conf"));
        assert!(diff.contains("-port = 80"));
        assert!(diff.contains("+port = 8080"));
    }

    #[test]
    fn test_new_file() {
        let diff = unified_diff("/etc/new", "", "a\n");
        assert!(diff.contains("+a"));
    }
}
