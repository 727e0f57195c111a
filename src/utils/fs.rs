//! Remote path helpers.
//!
//! Remote paths are always POSIX paths regardless of the local platform, so
//! these helpers work on strings rather than `std::path::Path`.

use uuid::Uuid;

/// Parent directory of a remote absolute path.
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/")
    } else {
        Some(&trimmed[..idx])
    }
}

/// File name component of a remote path.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Uniquely named hidden temp file next to `path`.
///
/// Must stay in the same directory so the final rename never crosses a
/// filesystem boundary.
pub fn temp_sibling_path(path: &str) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..12];
    let name = file_name(path);
    match parent_dir(path) {
        Some("/") => format!("/.{}.{}.tmp", name, suffix),
        Some(dir) => format!("{}/.{}.{}.tmp", dir, name, suffix),
        None => format!(".{}.{}.tmp", name, suffix),
    }
}

/// Guess a config type from the file extension (`yaml`, `json`, `conf`...).
pub fn config_type(path: &str) -> String {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            match ext.to_lowercase().as_str() {
                "yml" => "yaml".to_string(),
                "cfg" | "ini" => "conf".to_string(),
                other => other.to_string(),
            }
        }
        _ => "plain".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/etc/app/app.conf"), Some("/etc/app"));
        assert_eq!(parent_dir("/app.conf"), Some("/"));
        assert_eq!(parent_dir("app.conf"), None);
    }

    #[test]
    fn test_temp_sibling_path() {
        let tmp = temp_sibling_path("/etc/nginx/nginx.conf");
        assert!(tmp.starts_with("/etc/nginx/.nginx.conf."));
        assert!(tmp.ends_with(".tmp"));
        assert_ne!(tmp, temp_sibling_path("/etc/nginx/nginx.conf"));

        assert!(temp_sibling_path("/motd").starts_with("/.motd."));
    }

    #[test]
    fn test_config_type() {
        assert_eq!(config_type("/etc/app/config.YML"), "yaml");
        assert_eq!(config_type("/etc/app/settings.json"), "json");
        assert_eq!(config_type("/etc/hosts"), "plain");
        assert_eq!(config_type("/etc/.bashrc"), "plain");
    }
}
