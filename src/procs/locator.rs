// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::procs::{ProcessEntry, ProcessHandle, ProcessProvider, ServiceQuery};
use crate::Error;

/// Finds the processes belonging to a service.
///
/// Rules:
///  - a query never matches the process doing the searching, nor any of its ancestors
///  - nothing running is a normal answer, not an error
///  - results are ordered by pid
pub struct ProcessLocator<'p, P: ProcessProvider> {
    provider: &'p P,
}

impl<'p, P: ProcessProvider> ProcessLocator<'p, P> {
    pub fn new(provider: &'p P) -> Self {
        Self { provider }
    }

    pub fn find(&self, query: &ServiceQuery) -> Vec<ProcessHandle> {
        let table = self.provider.processes();
        let excluded = self.provider.excluded_pids(&table);

        let mut found = table
            .into_iter()
            .filter(|entry| !excluded.contains(&entry.pid))
            .filter(|entry| query.matches(&entry.command_line))
            .map(ProcessHandle::from)
            .collect::<Vec<_>>();

        found.sort_by_key(ProcessHandle::pid);
        debug!("{} process(es) match {:?}", found.len(), query.pattern());
        found
    }
}

/// The live OS process table
#[derive(Debug, Default)]
pub struct SysinfoProvider;

impl SysinfoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessProvider for SysinfoProvider {
    fn processes(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        system
            .processes()
            .iter()
            // threads share their leader's command line, only the leader is a process
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let command_line = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");

                // kernel threads and zombies have no argv
                let command_line = if command_line.is_empty() {
                    process.name().to_string_lossy().into_owned()
                } else {
                    command_line
                };

                let entry = ProcessEntry::new(pid.as_u32() as libc::pid_t, command_line);
                match process.parent() {
                    Some(parent) => entry.with_parent(parent.as_u32() as libc::pid_t),
                    None => entry,
                }
            })
            .collect()
    }

    fn signal(&self, pid: libc::pid_t, signal: Signal) -> Result<(), Error> {
        kill(Pid::from_raw(pid), signal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procs::fake::FakeProvider;

    fn table() -> Vec<ProcessEntry> {
        vec![
            ProcessEntry::new(1, "/sbin/init"),
            ProcessEntry::new(1234, "./svc-proxy -c resources/proxy.toml"),
            ProcessEntry::new(77, "restartrc exec --pattern svc-proxy --executable ./svc-proxy"),
            ProcessEntry::new(900, "./svc-agent"),
            ProcessEntry::new(55, "tail -f svc-proxy.log"),
        ]
    }

    #[test]
    fn test_find_excludes_self() {
        let provider = FakeProvider::new(77, table());
        let query = ServiceQuery::new("svc-proxy").unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert!(found.iter().all(|handle| handle.pid() != 77));
        assert_eq!(
            found.iter().map(ProcessHandle::pid).collect::<Vec<_>>(),
            [55, 1234]
        );
    }

    #[test]
    fn test_find_excludes_ancestors() {
        // init -> sshd -> sh -c "restartrc exec -p svc-proxy ..." -> restartrc
        let table = vec![
            ProcessEntry::new(1, "/sbin/init"),
            ProcessEntry::new(300, "sshd: deploy").with_parent(1),
            ProcessEntry::new(310, "sh -c restartrc exec -p svc-proxy -e ./svc-proxy")
                .with_parent(300),
            ProcessEntry::new(311, "restartrc exec -p svc-proxy -e ./svc-proxy")
                .with_parent(310),
            ProcessEntry::new(1234, "./svc-proxy").with_parent(1),
        ];
        let provider = FakeProvider::new(311, table);
        let query = ServiceQuery::new("svc-proxy").unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert_eq!(
            found.iter().map(ProcessHandle::pid).collect::<Vec<_>>(),
            [1234]
        );
    }

    #[test]
    fn test_sibling_of_wrapper_still_matches() {
        let table = vec![
            ProcessEntry::new(310, "sh -c restartrc exec -p svc-proxy").with_parent(1),
            ProcessEntry::new(311, "restartrc exec -p svc-proxy").with_parent(310),
            ProcessEntry::new(312, "svc-proxy").with_parent(310),
        ];
        let provider = FakeProvider::new(311, table);
        let query = ServiceQuery::new("svc-proxy").unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert_eq!(
            found.iter().map(ProcessHandle::pid).collect::<Vec<_>>(),
            [312]
        );
    }

    #[test]
    fn test_parent_loop_terminates() {
        let table = vec![
            ProcessEntry::new(10, "svc-proxy a").with_parent(11),
            ProcessEntry::new(11, "svc-proxy b").with_parent(10),
            ProcessEntry::new(12, "svc-proxy c").with_parent(1),
        ];
        let provider = FakeProvider::new(10, table);
        let query = ServiceQuery::new("svc-proxy").unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert_eq!(
            found.iter().map(ProcessHandle::pid).collect::<Vec<_>>(),
            [12]
        );
    }

    #[test]
    fn test_find_nothing_is_empty() {
        let provider = FakeProvider::new(77, table());
        let query = ServiceQuery::new("svc-gateway").unwrap();

        assert!(ProcessLocator::new(&provider).find(&query).is_empty());
    }

    #[test]
    fn test_only_self_matches() {
        let provider = FakeProvider::new(77, table());
        let query = ServiceQuery::new("restartrc").unwrap();

        assert!(ProcessLocator::new(&provider).find(&query).is_empty());
    }

    #[test]
    fn test_empty_table() {
        let provider = FakeProvider::new(77, Vec::new());
        let query = ServiceQuery::new("svc-proxy").unwrap();

        assert!(ProcessLocator::new(&provider).find(&query).is_empty());
    }

    #[test]
    fn test_handle_keeps_command_line() {
        let provider = FakeProvider::new(77, table());
        let query = ServiceQuery::new("svc-agent").unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pid(), 900);
        assert_eq!(found[0].command_line(), "./svc-agent");
    }

    #[test]
    fn test_sysinfo_excludes_own_parent() {
        let provider = SysinfoProvider::new();
        let table = provider.processes();
        let me = std::process::id() as libc::pid_t;

        let parent = table
            .iter()
            .find(|entry| entry.pid == me)
            .and_then(|entry| entry.parent)
            .expect("own process has a parent");
        let excluded = provider.excluded_pids(&table);
        assert!(excluded.contains(&me));
        assert!(excluded.contains(&parent));
    }

    #[test]
    fn test_sysinfo_never_lists_self_as_match() {
        let provider = SysinfoProvider::new();
        let me = std::process::id() as libc::pid_t;

        // our own argv[0] is the surest pattern to hit this process
        let exe = std::env::args().next().unwrap();
        let query = ServiceQuery::new(exe).unwrap();

        let found = ProcessLocator::new(&provider).find(&query);
        assert!(found.iter().all(|handle| handle.pid() != me));
    }
}
