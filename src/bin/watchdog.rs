//! `redisms-watchdog <parent-pid> <child-pid>`
//!
//! Terminates the child once the parent is gone. Exits when either is gone.

use redis_memory_server::server::watchdog::{POLL_INTERVAL, WatchdogOutcome, run};
use std::io::Write;
use std::process::ExitCode;

fn parse_pid(arg: Option<String>, name: &str) -> Result<u32, String> {
    let arg = arg.ok_or_else(|| format!("missing {} pid", name))?;
    arg.parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| format!("invalid {} pid: {}", name, arg))
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let pids = parse_pid(args.next(), "parent")
        .and_then(|parent| parse_pid(args.next(), "child").map(|child| (parent, child)));

    let (parent, child) = match pids {
        Ok(pids) => pids,
        Err(e) => {
            // stderr may already be closed, never panic on it
            let _ = writeln!(
                std::io::stderr(),
                "{}\nusage: redisms-watchdog <parent-pid> <child-pid>",
                e
            );
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run(parent, child, POLL_INTERVAL));
    if outcome == WatchdogOutcome::ParentGone {
        let _ = writeln!(
            std::io::stdout(),
            "parent {} is gone, terminated {}",
            parent,
            child
        );
    }
    ExitCode::SUCCESS
}
