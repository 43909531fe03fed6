// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;

use nix::unistd::setsid;
use tokio::process::Command;
use tracing::debug;

use crate::procs::DaemonProcess;
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

/// Start `program` in a session of its own and forget about it.
///
/// The child is never waited on or killed from here, it outlives this process.
pub fn spawn_detached<I, S>(
    program: &Path,
    args: I,
    working_directory: &Path,
    stdio: StdIoConf,
) -> Result<DaemonProcess, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_directory)
        .kill_on_drop(false)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);

    // setsid is async-signal-safe, and leaves the child without a controlling terminal
    unsafe {
        command.pre_exec(|| setsid().map(|_| ()).map_err(io::Error::from));
    }

    let child = command
        .spawn()
        .map_err(|e| Error::launch(program, e))?;

    // the pid is only gone if the child was already reaped, which can't happen before a wait
    let pid = child
        .id()
        .ok_or_else(|| Error::from("spawned child has no pid"))?;
    debug!("spawned {} as {}", program.display(), pid);

    // dropping without kill_on_drop leaves the child running
    drop(child);
    Ok(DaemonProcess::new(pid as libc::pid_t))
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::{getsid, Pid};

    use super::*;

    #[tokio::test]
    async fn test_child_gets_own_session() {
        let dir = tempfile::tempdir().unwrap();
        let stdio = StdIoConf {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        };

        let daemon =
            spawn_detached(Path::new("sleep"), &["30"], dir.path(), stdio).unwrap();
        let pid = Pid::from_raw(daemon.pid());

        assert_eq!(getsid(Some(pid)).unwrap(), pid);
        assert_ne!(getsid(None).unwrap(), pid);

        kill(pid, Signal::SIGKILL).unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let stdio = StdIoConf {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        };

        let err = spawn_detached(
            &dir.path().join("not-there"),
            Vec::<String>::new(),
            dir.path(),
            stdio,
        )
        .unwrap_err();
        assert!(err.is_launch_failure());
    }
}
