//! Pre-installed redis-server detection.

use async_process::{Command, Stdio};
use std::path::{Path, PathBuf};

/// Returns `path` if something exists there.
pub async fn probe_system_binary(path: &Path) -> Option<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(_) => {
            tracing::debug!(path = %path.display(), "Found system binary");
            Some(path.to_path_buf())
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Can't find system binary");
            None
        }
    }
}

/// Runs `<path> --version` and extracts the version number.
///
/// Returns `None` if the binary cannot be run or prints something unexpected.
pub async fn system_binary_version(path: &Path) -> Option<String> {
    let output = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            parse_version_output(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::debug!(path = %path.display(), status = ?output.status, "System binary --version failed");
            None
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Cannot run system binary");
            None
        }
    }
}

/// Extracts the version from `redis-server --version` output.
///
/// The third field of the first line is used, with a `v=` prefix removed:
/// `Redis server v=7.2.4 sha=00000000:0 malloc=jemalloc-5.3.0 bits=64` gives `7.2.4`.
pub fn parse_version_output(output: &str) -> Option<String> {
    let field = output.lines().next()?.split_whitespace().nth(2)?;
    let version = field.strip_prefix("v=").unwrap_or(field);
    (!version.is_empty()).then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output(
                "Redis server v=7.2.4 sha=00000000:0 malloc=jemalloc-5.3.0 bits=64 build=1\n"
            ),
            Some("7.2.4".to_string())
        );
        assert_eq!(
            parse_version_output("Redis server 6.0.10\nsecond line"),
            Some("6.0.10".to_string())
        );
        assert_eq!(parse_version_output("garbage"), None);
        assert_eq!(parse_version_output(""), None);
    }
}
