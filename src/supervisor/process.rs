//! OS process liveness and signalling for the background bridge.

use std::process::Command;

use super::SupervisorError;

#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM: the process exists but belongs to someone else.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
pub fn is_running(_pid: u32) -> bool {
    false
}

/// SIGTERM, or SIGKILL when `force` is set.
#[cfg(unix)]
pub fn terminate(pid: u32, force: bool) -> Result<(), SupervisorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        reason: "PID out of range".into(),
    })?;
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(raw), signal).map_err(|e| SupervisorError::Signal {
        pid,
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn terminate(pid: u32, _force: bool) -> Result<(), SupervisorError> {
    Err(SupervisorError::Signal {
        pid,
        reason: "signals are not supported on this platform".into(),
    })
}

/// Keep the child out of the terminal's process group so Ctrl+C in the
/// launching shell does not reach it.
pub fn detach(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = command;
}
