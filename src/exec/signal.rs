// src/exec/signal.rs

//! Signals sent to supervised processes.
//!
//! On Unix every child is the leader of its own process group, so signals go
//! to the whole group (`kill(-pid, sig)`) and reach anything the shell
//! spawned. Elsewhere all signals degrade to a hard kill of the child.

use std::fmt;
use std::io;

use tokio::process::Child;
use tracing::debug;

/// Signal used for one step of the termination protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM.
    Terminate,
    /// SIGINT. Some programs only print their final summary on interrupt.
    Interrupt,
    /// SIGKILL.
    Kill,
}

impl TerminationSignal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            TerminationSignal::Terminate => libc::SIGTERM,
            TerminationSignal::Interrupt => libc::SIGINT,
            TerminationSignal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Send `signal` to the process group led by `pid`, falling back to the
/// process itself if the group cannot be signalled.
#[cfg(unix)]
pub fn send_signal(child: &mut Child, pid: Option<u32>, signal: TerminationSignal) -> io::Result<()> {
    let Some(pid) = pid else {
        // Already reaped; nothing left to signal.
        return match signal {
            TerminationSignal::Kill => child.start_kill(),
            _ => Ok(()),
        };
    };

    let raw = signal.as_raw();
    let pid = pid as libc::pid_t;

    if unsafe { libc::kill(-pid, raw) } == 0 {
        debug!(pid, %signal, "signalled process group");
        return Ok(());
    }

    if unsafe { libc::kill(pid, raw) } == 0 {
        debug!(pid, %signal, "signalled process");
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if signal == TerminationSignal::Kill {
        let _ = child.start_kill();
    }
    Err(err)
}

#[cfg(not(unix))]
pub fn send_signal(child: &mut Child, _pid: Option<u32>, _signal: TerminationSignal) -> io::Result<()> {
    child.start_kill()
}
