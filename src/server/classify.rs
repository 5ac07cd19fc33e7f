//! Classification of redis-server output lines.
//!
//! The supervisor reacts to what the server prints, not to its exit code.
//! All matching rules live here so they can be tested without processes.

/// Something the server reported on stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The server accepts connections.
    Ready,
    /// The configured port is taken.
    PortConflict,
    /// Another redis-server holds a resource this one needs.
    AlreadyRunning,
    /// The server may not bind or open a file.
    PermissionDenied,
    /// The server is exiting. Only a failure before readiness.
    ShuttingDown,
    /// The server aborted after an internal error.
    InternalError,
}

/// Classifies one output line. Returns `None` for ordinary log lines.
///
/// Matching is case-insensitive and the first matching rule wins, in the
/// order of the [`OutputEvent`] variants.
///
/// # Examples
///
/// ```
/// use redis_memory_server::server::{OutputEvent, classify_line};
///
/// assert_eq!(
///     classify_line("1:M 01 Jan 00:00:00.000 * Ready to accept connections tcp"),
///     Some(OutputEvent::Ready)
/// );
/// assert_eq!(classify_line("Server initialized"), None);
/// ```
pub fn classify_line(line: &str) -> Option<OutputEvent> {
    let line = line.to_ascii_lowercase();

    if line.contains("ready to accept connections") {
        Some(OutputEvent::Ready)
    } else if line.contains("address already in use") {
        Some(OutputEvent::PortConflict)
    } else if line.contains("already running") {
        Some(OutputEvent::AlreadyRunning)
    } else if line.contains("permission denied") {
        Some(OutputEvent::PermissionDenied)
    } else if is_shutdown_with_code(&line) {
        Some(OutputEvent::ShuttingDown)
    } else if line.contains("***aborting after") {
        Some(OutputEvent::InternalError)
    } else {
        None
    }
}

// "shutting down with code 1", "shutting down ... with code"
fn is_shutdown_with_code(line: &str) -> bool {
    line.find("shutting down")
        .is_some_and(|at| line[at..].contains("with code"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_banner() {
        assert_eq!(
            classify_line("* READY TO ACCEPT CONNECTIONS"),
            Some(OutputEvent::Ready)
        );
        assert_eq!(
            classify_line("1:M * Ready to accept connections tcp"),
            Some(OutputEvent::Ready)
        );
    }

    #[test]
    fn test_port_conflict() {
        assert_eq!(
            classify_line("# Could not create server TCP listening socket *:6379: bind: Address already in use"),
            Some(OutputEvent::PortConflict)
        );
    }

    #[test]
    fn test_failure_lines() {
        assert_eq!(
            classify_line("redis-server instance already running"),
            Some(OutputEvent::AlreadyRunning)
        );
        assert_eq!(
            classify_line("Can't open the log file: Permission denied"),
            Some(OutputEvent::PermissionDenied)
        );
        assert_eq!(
            classify_line("# Redis is now ready to exit, shutting down with code 1"),
            Some(OutputEvent::ShuttingDown)
        );
        assert_eq!(
            classify_line("***ABORTING AFTER error in module"),
            Some(OutputEvent::InternalError)
        );
    }

    #[test]
    fn test_ordinary_lines() {
        assert_eq!(classify_line("Server initialized"), None);
        assert_eq!(classify_line("User requested shutdown..."), None);
        assert_eq!(classify_line(""), None);
    }
}
