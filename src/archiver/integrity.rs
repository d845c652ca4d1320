//! Size comparison between the remote and the freshly extracted local copy.

use std::path::Path;

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("no size response from remote server: {reason}")]
    NoResponse { reason: String },

    #[error("remote size '{raw}' is not a number")]
    Unparsable { raw: String },

    #[error("remote size must be positive, got {size}")]
    NonPositive { size: i64 },

    #[error("failed to measure local folder {path}: {reason}")]
    LocalUnreadable { path: String, reason: String },

    #[error("local folder size ({local}) differs from remote size ({remote})")]
    Mismatch { local: u64, remote: u64 },
}

/// Parse the remote server's size response. Anything but a positive integer fails.
pub fn parse_remote_size(raw: &str) -> Result<u64, IntegrityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IntegrityError::NoResponse {
            reason: "empty response".to_string(),
        });
    }
    let size: i64 = trimmed.parse().map_err(|_| IntegrityError::Unparsable {
        raw: trimmed.to_string(),
    })?;
    if size <= 0 {
        return Err(IntegrityError::NonPositive { size });
    }
    Ok(size as u64)
}

/// Total length in bytes of all regular files below `dir`.
pub fn directory_size(dir: &Path) -> Result<u64, IntegrityError> {
    let unreadable = |reason: String| IntegrityError::LocalUnreadable {
        path: dir.display().to_string(),
        reason,
    };

    if !dir.is_dir() {
        return Err(unreadable("not a directory".to_string()));
    }

    let mut total = 0u64;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| unreadable(e.to_string()))?;
        if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|e| unreadable(e.to_string()))?;
            total += meta.len();
        }
    }
    Ok(total)
}

/// Exact byte-count equality between the remote report and `local_dir`.
pub fn verify(remote_response: &str, local_dir: &Path) -> Result<u64, IntegrityError> {
    let remote = parse_remote_size(remote_response)?;
    let local = directory_size(local_dir)?;
    if local != remote {
        return Err(IntegrityError::Mismatch { local, remote });
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), vec![b'a'; 300]).unwrap();
        std::fs::create_dir_all(dir.path().join("tests/1")).unwrap();
        std::fs::write(dir.path().join("tests/1/test.js"), vec![b'b'; 200]).unwrap();
        dir
    }

    #[test]
    fn test_parse_remote_size() {
        assert_eq!(parse_remote_size("500").unwrap(), 500);
        assert_eq!(parse_remote_size(" 500\n").unwrap(), 500);
        assert!(matches!(parse_remote_size(""), Err(IntegrityError::NoResponse { .. })));
        assert!(matches!(parse_remote_size("big"), Err(IntegrityError::Unparsable { .. })));
        assert!(matches!(parse_remote_size("0"), Err(IntegrityError::NonPositive { size: 0 })));
        assert!(matches!(parse_remote_size("-4"), Err(IntegrityError::NonPositive { size: -4 })));
    }

    #[test]
    fn test_directory_size_is_recursive() {
        let dir = fixture();
        assert_eq!(directory_size(dir.path()).unwrap(), 500);
    }

    #[test]
    fn test_missing_directory_is_unreadable() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = directory_size(&dir.path().join("exec_9")).unwrap_err();
        assert!(matches!(err, IntegrityError::LocalUnreadable { .. }));
    }

    #[test]
    fn test_verify_exact_match_only() {
        let dir = fixture();
        assert_eq!(verify("500", dir.path()).unwrap(), 500);
        assert!(matches!(
            verify("480", dir.path()),
            Err(IntegrityError::Mismatch { local: 500, remote: 480 })
        ));
        assert!(matches!(
            verify("501", dir.path()),
            Err(IntegrityError::Mismatch { .. })
        ));
    }
}
