use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;

/// Classified reason of a failed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The port was already bound. The only retried failure.
    PortConflict { port: u16 },
    AlreadyRunning,
    PermissionDenied,
    /// Shutdown announced before the server became ready.
    ShuttingDown,
    InternalError,
    /// The process exited before it became ready.
    Closed { code: Option<i32> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PortConflict { port } => write!(f, "Port {} already in use", port),
            FailureReason::AlreadyRunning => write!(f, "redis-server already running"),
            FailureReason::PermissionDenied => write!(f, "redis-server permission denied"),
            FailureReason::ShuttingDown => write!(f, "redis-server shutting down"),
            FailureReason::InternalError => write!(f, "redis-server internal error"),
            FailureReason::Closed { code: Some(code) } => {
                write!(f, "redis-server exited with code {} before it was ready", code)
            }
            FailureReason::Closed { code: None } => {
                write!(f, "redis-server was terminated by a signal before it was ready")
            }
        }
    }
}

/// State of one supervised instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    /// Spawned, no readiness banner seen yet.
    Starting,
    /// Accepting connections.
    Ready,
    /// Startup failed or the process crashed.
    Failed(FailureReason),
    /// `kill` in progress.
    ShuttingDown,
    /// The process exited after an orderly shutdown.
    Stopped,
}

impl InstanceState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Failed(_) | InstanceState::Stopped)
    }
}

/// A recorded state transition.
#[derive(Debug, Clone)]
pub struct InstanceEvent {
    /// State entered.
    pub state: InstanceState,
    /// When it was entered.
    pub timestamp: Instant,
}

const MAX_EVENTS: usize = 100;

/// Owner of an instance's [`InstanceState`].
///
/// Transitions only go forward: `Starting -> {Ready | Failed}` and
/// `Ready -> {ShuttingDown -> Stopped | Failed}`. Disallowed transitions are
/// ignored and reported as `false`. Observers follow the state through
/// [`InstanceLifecycle::subscribe`].
#[derive(Debug, Clone)]
pub struct InstanceLifecycle {
    state: Arc<watch::Sender<InstanceState>>,
    events: Arc<Mutex<Vec<InstanceEvent>>>,
}

impl InstanceLifecycle {
    /// A lifecycle in the `Starting` state.
    pub fn new() -> Self {
        let lifecycle = Self {
            state: Arc::new(watch::Sender::new(InstanceState::Starting)),
            events: Arc::new(Mutex::new(Vec::new())),
        };
        lifecycle.record(InstanceState::Starting);
        lifecycle
    }

    /// Current state.
    pub fn state(&self) -> InstanceState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    /// `Starting -> Ready`. Returns `true` only for the first transition.
    pub fn mark_ready(&self) -> bool {
        self.transition(|current| matches!(current, InstanceState::Starting), InstanceState::Ready)
    }

    /// `Starting | Ready -> Failed`.
    pub fn mark_failed(&self, reason: FailureReason) -> bool {
        self.transition(
            |current| matches!(current, InstanceState::Starting | InstanceState::Ready),
            InstanceState::Failed(reason),
        )
    }

    /// `Starting | Ready -> ShuttingDown`.
    pub fn begin_shutdown(&self) -> bool {
        self.transition(
            |current| matches!(current, InstanceState::Starting | InstanceState::Ready),
            InstanceState::ShuttingDown,
        )
    }

    /// `ShuttingDown -> Stopped`.
    pub fn mark_stopped(&self) -> bool {
        self.transition(
            |current| matches!(current, InstanceState::ShuttingDown),
            InstanceState::Stopped,
        )
    }

    /// Transition history, oldest first.
    pub fn events(&self) -> Vec<InstanceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn transition(&self, allowed: impl Fn(&InstanceState) -> bool, next: InstanceState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if allowed(current) {
                *current = next.clone();
                true
            } else {
                false
            }
        });
        if changed {
            self.record(next);
        }
        changed
    }

    fn record(&self, state: InstanceState) {
        if let Ok(mut events) = self.events.lock() {
            events.push(InstanceEvent {
                state,
                timestamp: Instant::now(),
            });
            if events.len() > MAX_EVENTS {
                events.remove(0);
            }
        }
    }
}

impl Default for InstanceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_only_once() {
        let lifecycle = InstanceLifecycle::new();
        assert!(lifecycle.mark_ready());
        assert!(!lifecycle.mark_ready());
        assert_eq!(lifecycle.state(), InstanceState::Ready);
        assert_eq!(lifecycle.events().len(), 2);
    }

    #[test]
    fn test_failed_is_terminal() {
        let lifecycle = InstanceLifecycle::new();
        assert!(lifecycle.mark_failed(FailureReason::PortConflict { port: 6379 }));
        assert!(!lifecycle.mark_ready());
        assert!(!lifecycle.begin_shutdown());
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn test_shutdown_sequence() {
        let lifecycle = InstanceLifecycle::new();
        lifecycle.mark_ready();
        assert!(!lifecycle.mark_stopped());
        assert!(lifecycle.begin_shutdown());
        assert!(!lifecycle.mark_failed(FailureReason::ShuttingDown));
        assert!(lifecycle.mark_stopped());
        assert_eq!(lifecycle.state(), InstanceState::Stopped);
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            FailureReason::PortConflict { port: 7000 }.to_string(),
            "Port 7000 already in use"
        );
        assert_eq!(
            FailureReason::InternalError.to_string(),
            "redis-server internal error"
        );
    }
}
