use super::classify::{OutputEvent, classify_line};
use super::handle::ExitInfo;
use super::lifecycle::{FailureReason, InstanceLifecycle, InstanceState};
use async_process::{ChildStderr, ChildStdout};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Calls `on_line` for every line of `stream` until EOF.
///
/// Lines are decoded lossily, so bytes that are not UTF-8 never end the read.
pub(crate) async fn read_lines<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading process output");
                break;
            }
        }
    }
}

/// Feeds the server's output into `lifecycle` and handles its exit.
///
/// The close handling runs once both streams reached EOF and the process
/// exited, so no classified line is lost to the exit event.
pub(crate) fn spawn_output_monitor(
    port: u16,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    lifecycle: InstanceLifecycle,
    mut exit: watch::Receiver<Option<ExitInfo>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let out = async {
            if let Some(stdout) = stdout {
                read_lines(stdout, |line| on_line(port, "STDOUT", line, &lifecycle)).await;
            }
        };
        let err = async {
            if let Some(stderr) = stderr {
                read_lines(stderr, |line| on_line(port, "STDERR", line, &lifecycle)).await;
            }
        };
        futures::join!(out, err);

        let info = exit
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|info| *info);
        on_close(port, info, &lifecycle);
    })
}

fn on_line(port: u16, stream: &str, line: &str, lifecycle: &InstanceLifecycle) {
    tracing::debug!("Redis[{}]: {}: {}", port, stream, line);

    let Some(event) = classify_line(line) else {
        return;
    };
    match event {
        OutputEvent::Ready => {
            if lifecycle.mark_ready() {
                tracing::debug!("Redis[{}]: is ready!", port);
            }
        }
        OutputEvent::PortConflict => fail(port, lifecycle, FailureReason::PortConflict { port }),
        OutputEvent::AlreadyRunning => fail(port, lifecycle, FailureReason::AlreadyRunning),
        OutputEvent::PermissionDenied => fail(port, lifecycle, FailureReason::PermissionDenied),
        OutputEvent::InternalError => fail(port, lifecycle, FailureReason::InternalError),
        // A shutdown announced after readiness is a normal stop.
        OutputEvent::ShuttingDown => {
            if lifecycle.state() == InstanceState::Starting {
                fail(port, lifecycle, FailureReason::ShuttingDown);
            }
        }
    }
}

fn fail(port: u16, lifecycle: &InstanceLifecycle, reason: FailureReason) {
    let message = reason.to_string();
    if lifecycle.mark_failed(reason) {
        tracing::debug!("Redis[{}]: failed: {}", port, message);
    }
}

fn on_close(port: u16, info: Option<ExitInfo>, lifecycle: &InstanceLifecycle) {
    let code = info.and_then(|info| info.code);
    tracing::debug!("Redis[{}]: CLOSE: {:?}", port, code);

    match lifecycle.state() {
        InstanceState::Starting => fail(port, lifecycle, FailureReason::Closed { code }),
        InstanceState::Ready => {
            tracing::warn!("Redis[{}]: exited with code {:?} without being stopped", port, code);
        }
        _ => {}
    }
}
