// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod launcher;
mod locator;
mod logger;
mod supervisor;
mod terminator;

pub use launcher::{raise_fd_limit, DaemonLauncher};
pub use locator::{ProcessLocator, SysinfoProvider};
pub use logger::LogSink;
pub use supervisor::{Report, Supervisor};
pub use terminator::{Outcome, TerminationRetryLoop};

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use nix::sys::signal::Signal;

use crate::config::LaunchSpec;
use crate::Error;

pub const RESTART: &str = "restart";
pub const EXEC: &str = "exec";
pub const FIND: &str = "find";

/// The name pattern identifying the service's processes
///
/// Matched as a literal substring of each process's command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceQuery(String);

impl ServiceQuery {
    /// An empty pattern would match every process on the host, so it is refused
    pub fn new<S: Into<String>>(pattern: S) -> Result<Self, Error> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(Error::config("service pattern must not be empty"));
        }

        Ok(Self(pattern))
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, command_line: &str) -> bool {
        command_line.contains(&self.0)
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row of the process table, as listed by a `ProcessProvider`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: libc::pid_t,
    pub parent: Option<libc::pid_t>,
    pub command_line: String,
}

impl ProcessEntry {
    pub fn new<S: Into<String>>(pid: libc::pid_t, command_line: S) -> Self {
        Self {
            pid,
            parent: None,
            command_line: command_line.into(),
        }
    }

    pub fn with_parent(mut self, parent: libc::pid_t) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A process that matched a `ServiceQuery`
///
/// Never cached, each query rebuilds these from the live process table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: libc::pid_t,
    command_line: String,
}

impl ProcessHandle {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }
}

impl From<ProcessEntry> for ProcessHandle {
    fn from(entry: ProcessEntry) -> Self {
        Self {
            pid: entry.pid,
            command_line: entry.command_line,
        }
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pid, self.command_line)
    }
}

/// Access to the operating system's process table
pub trait ProcessProvider {
    /// Every live process, in no particular order
    fn processes(&self) -> Vec<ProcessEntry>;

    /// Deliver `signal` to `pid`
    fn signal(&self, pid: libc::pid_t, signal: Signal) -> Result<(), Error>;

    /// The pid of the process doing the searching
    fn current_pid(&self) -> libc::pid_t {
        std::process::id() as libc::pid_t
    }

    /// The searching process and every ancestor of it in `table`, none of these is ever a match.
    ///
    /// A wrapper (`sh -c`, sudo, ssh) usually carries the pattern in its own command line.
    fn excluded_pids(&self, table: &[ProcessEntry]) -> HashSet<libc::pid_t> {
        let parents = table
            .iter()
            .map(|entry| (entry.pid, entry.parent))
            .collect::<HashMap<_, _>>();

        let mut excluded = HashSet::new();
        let mut next = Some(self.current_pid());
        while let Some(pid) = next {
            // stop at the root, or on a loop in a table read mid-update
            if pid <= 0 || !excluded.insert(pid) {
                break;
            }
            next = parents.get(&pid).copied().flatten();
        }

        excluded
    }
}

/// The replacement instance after it has been started, nothing but its pid is retained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DaemonProcess {
    pid: libc::pid_t,
}

impl DaemonProcess {
    pub fn new(pid: libc::pid_t) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

/// Starts a new instance of a service
#[async_trait]
pub trait Launch: Send + Sync {
    /// Start the process described by `spec` and return without waiting on it
    async fn launch(&self, spec: &LaunchSpec) -> Result<DaemonProcess, Error>;
}
