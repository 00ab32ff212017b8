//! Health-check responder: implements the `-health-check-path`/
//! `-healthy-if-file`/`-healthy-unless-file` flag semantics described in
//! [`crate::config::Config`].

use std::path::Path;

/// Whether a request path is the configured health-check path.
pub fn is_health_check(path: &str, health_check_path: &str) -> bool {
    path == health_check_path
}

/// 200 iff `healthy_if_file` (when set) exists and `healthy_unless_file`
/// (when set) does not.
pub fn is_healthy(healthy_if_file: Option<&Path>, healthy_unless_file: Option<&Path>) -> bool {
    if let Some(path) = healthy_if_file {
        if !path.exists() {
            return false;
        }
    }
    if let Some(path) = healthy_unless_file {
        if path.exists() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn healthy_with_no_files_configured() {
        assert!(is_healthy(None, None));
    }

    #[test]
    fn unhealthy_when_healthy_if_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("up");
        assert!(!is_healthy(Some(&marker), None));
    }

    #[test]
    fn healthy_when_healthy_if_file_exists() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("up");
        fs::write(&marker, b"").unwrap();
        assert!(is_healthy(Some(&marker), None));
    }

    #[test]
    fn unhealthy_when_healthy_unless_file_exists() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("down");
        fs::write(&marker, b"").unwrap();
        assert!(!is_healthy(None, Some(&marker)));
    }

    #[test]
    fn path_matching_is_exact() {
        assert!(is_health_check("/health-check", "/health-check"));
        assert!(!is_health_check("/health-check/", "/health-check"));
    }
}
