//! Run the bridge in the background and talk to it.
//!
//! `start` re-executes the current binary with `serve`, detached, writing its
//! PID and address into a [`StateDir`]. `stop` and `status` read them back.

pub mod client;
pub mod process;
pub mod state;

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

pub use crate::error::SupervisorError;
pub use client::{BridgeClient, CallOutcome, ToolSummary};
pub use state::StateDir;

/// How long `start` waits for the bridge to answer.
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_millis(250);

/// How long `stop` waits after SIGTERM. Covers connection drain plus the
/// child's exit grace.
const STOP_GRACE: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Arguments handed to the detached `serve` process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub host: String,
    pub port: u16,
    pub timeout_secs: Option<u64>,
    pub command: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    fn serve_args(&self) -> Vec<String> {
        let mut argv = vec![
            "serve".to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if let Some(secs) = self.timeout_secs {
            argv.push("--timeout".into());
            argv.push(secs.to_string());
        }
        argv.push("--".into());
        argv.push(self.command.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// PID file pointed at a dead process; it was removed.
    StaleCleaned(u32),
    Stopped(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub pid: Option<u32>,
    pub alive: bool,
    pub addr: Option<(String, u16)>,
    pub responding: bool,
}

/// Launch a detached bridge and wait until it answers `tools/list`.
pub async fn start(state: &StateDir, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
    if let Some(pid) = state.read_pid()? {
        if process::is_running(pid) {
            return Err(SupervisorError::AlreadyRunning(pid));
        }
        debug!(pid, "removing stale PID file");
        state.clear()?;
    }
    state.ensure()?;

    let log_path = state.log_file();
    let log = state.open_log()?;
    let log_err = log.try_clone().map_err(|source| SupervisorError::Io {
        path: log_path.clone(),
        source,
    })?;
    let exe = std::env::current_exe().map_err(|source| SupervisorError::Io {
        path: "current executable".into(),
        source,
    })?;

    let mut command = Command::new(&exe);
    command
        .args(spec.serve_args())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    process::detach(&mut command);

    let mut child = command.spawn().map_err(|source| SupervisorError::Io {
        path: exe.clone(),
        source,
    })?;
    let pid = child.id();
    let host = client::reachable_host(&spec.host).to_string();
    state.write_pid(pid)?;
    state.write_addr(&host, spec.port)?;
    info!(pid, "launched bridge on {host}:{}", spec.port);

    let client = BridgeClient::new(&host, spec.port)?;
    let deadline = Instant::now() + READY_TIMEOUT;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            state.clear()?;
            return Err(SupervisorError::ExitedEarly {
                status: status.to_string(),
                log: log_path,
            });
        }
        if client.is_ready().await {
            return Ok(pid);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            state.clear()?;
            return Err(SupervisorError::NotReady {
                waited: READY_TIMEOUT,
                log: log_path,
            });
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

/// SIGTERM the recorded bridge and wait for it to exit.
///
/// With `force` a bridge that outlives the grace period gets SIGKILL.
pub async fn stop(state: &StateDir, force: bool) -> Result<StopOutcome, SupervisorError> {
    let Some(pid) = state.read_pid()? else {
        return Ok(StopOutcome::NotRunning);
    };
    if !process::is_running(pid) {
        state.clear()?;
        return Ok(StopOutcome::StaleCleaned(pid));
    }

    process::terminate(pid, false)?;
    if !wait_for_exit(pid, STOP_GRACE).await {
        if !force {
            return Err(SupervisorError::DidNotStop(pid));
        }
        process::terminate(pid, true)?;
        if !wait_for_exit(pid, STOP_GRACE).await {
            return Err(SupervisorError::DidNotStop(pid));
        }
    }

    state.clear()?;
    Ok(StopOutcome::Stopped(pid))
}

pub async fn status(state: &StateDir) -> Result<StatusReport, SupervisorError> {
    let pid = state.read_pid()?;
    let alive = pid.is_some_and(process::is_running);
    let addr = state.read_addr()?;

    let responding = match (&addr, alive) {
        (Some((host, port)), true) => BridgeClient::new(host, *port)?.is_ready().await,
        _ => false,
    };

    Ok(StatusReport {
        pid,
        alive,
        addr,
        responding,
    })
}

async fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while process::is_running(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL).await;
    }
    true
}
