// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tracing::{debug, info};

use crate::config::LaunchSpec;
use crate::fork::spawn_detached;
use crate::procs::{DaemonProcess, Launch, LogSink};
use crate::Error;

/// Launch the replacement instance
///
/// Rules:
/// - raises the open file limit first, the child inherits it
/// - the child gets its own session, so it survives the supervisor
/// - stdout and stderr go to the service log
/// - never waits on the child, and never retries
#[derive(Debug, Default)]
pub struct DaemonLauncher;

impl DaemonLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launch for DaemonLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<DaemonProcess, Error> {
        let cwd = env::current_dir().map_err(|e| Error::launch(&spec.executable_path, e))?;
        let working_directory = cwd.join(&spec.working_directory);
        let executable = resolve_executable(&spec.executable_path, &working_directory);

        raise_fd_limit(spec.fd_limit)
            .map_err(|e| Error::launch(&executable, io::Error::from(e)))?;

        let log_path = cwd.join(spec.resolved_log_path());
        let sink = if spec.append_log {
            LogSink::append(&log_path)?
        } else {
            LogSink::truncate(&log_path)?
        };

        let daemon = spawn_detached(
            &executable,
            &spec.arguments,
            &working_directory,
            sink.into_stdio()?,
        )?;

        info!(
            "launched {} as pid {}, output in {}",
            executable.display(),
            daemon.pid(),
            log_path.display()
        );
        Ok(daemon)
    }
}

/// A relative path with a directory part is taken from the working directory, a bare name is looked up on PATH
///
/// `working_directory` must already be absolute, the child resolves the program after its chdir.
fn resolve_executable(executable: &Path, working_directory: &Path) -> PathBuf {
    if executable.is_relative() && executable.components().count() > 1 {
        working_directory.join(executable)
    } else {
        executable.to_path_buf()
    }
}

/// Set the soft open file limit to `fd_limit`, lifting the hard limit as well if it is lower
pub fn raise_fd_limit(fd_limit: u64) -> nix::Result<()> {
    let fd_limit = fd_limit as libc::rlim_t;
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;

    if soft == fd_limit && hard >= fd_limit {
        debug!("open file limit already {}", fd_limit);
        return Ok(());
    }

    let hard = hard.max(fd_limit);
    setrlimit(Resource::RLIMIT_NOFILE, fd_limit, hard)?;
    debug!("open file limit set to {} (hard {})", fd_limit, hard);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_executable() {
        let dir = Path::new("/srv/proxy");
        assert_eq!(
            resolve_executable(Path::new("./svc-proxy"), dir),
            PathBuf::from("/srv/proxy/./svc-proxy")
        );
        assert_eq!(
            resolve_executable(Path::new("bin/svc-proxy"), dir),
            PathBuf::from("/srv/proxy/bin/svc-proxy")
        );
        assert_eq!(
            resolve_executable(Path::new("/opt/svc-proxy"), dir),
            PathBuf::from("/opt/svc-proxy")
        );
        assert_eq!(
            resolve_executable(Path::new("sleep"), dir),
            PathBuf::from("sleep")
        );
    }

    // one test, the limit is process wide and tests share the process
    #[test]
    fn test_raise_fd_limit() {
        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();

        raise_fd_limit(soft as u64).unwrap();
        assert_eq!(getrlimit(Resource::RLIMIT_NOFILE).unwrap(), (soft, hard));

        let lowered = soft - 1;
        raise_fd_limit(lowered as u64).unwrap();
        assert_eq!(getrlimit(Resource::RLIMIT_NOFILE).unwrap(), (lowered, hard));

        raise_fd_limit(soft as u64).unwrap();
        assert_eq!(getrlimit(Resource::RLIMIT_NOFILE).unwrap(), (soft, hard));
    }
}
