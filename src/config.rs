// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Supervisor configuration, read from a TOML file and overridden from the command line

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::procs::ServiceQuery;
use crate::Error;

pub const DEFAULT_CONFIG_FILE: &str = "./resources/restartrc.toml";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_ATTEMPT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_FD_LIMIT: u64 = 65536;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How many times to look for a stale instance, and how long to wait between looks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempt_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_delay: Duration) -> Result<Self, Error> {
        if max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }

        Ok(Self {
            max_attempts,
            attempt_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_delay(&self) -> Duration {
        self.attempt_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_delay: DEFAULT_ATTEMPT_DELAY,
        }
    }
}

/// Everything needed to start the replacement instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable_path: PathBuf,
    pub arguments: Vec<OsString>,
    pub working_directory: PathBuf,
    pub log_path: PathBuf,
    pub fd_limit: u64,
    /// Keep prior log contents instead of truncating; off unless explicitly configured
    pub append_log: bool,
}

impl LaunchSpec {
    pub fn new<E, W, L>(executable_path: E, working_directory: W, log_path: L) -> Self
    where
        E: Into<PathBuf>,
        W: Into<PathBuf>,
        L: Into<PathBuf>,
    {
        Self {
            executable_path: executable_path.into(),
            arguments: Vec::new(),
            working_directory: working_directory.into(),
            log_path: log_path.into(),
            fd_limit: DEFAULT_FD_LIMIT,
            append_log: false,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn fd_limit(mut self, fd_limit: u64) -> Self {
        self.fd_limit = fd_limit;
        self
    }

    /// The log file location, relative paths are taken from the working directory
    pub fn resolved_log_path(&self) -> PathBuf {
        if self.log_path.is_absolute() {
            self.log_path.clone()
        } else {
            self.working_directory.join(&self.log_path)
        }
    }
}

/// Translate a signal name such as `KILL` or `SIGTERM` into a signal
pub fn signal_from_name(name: &str) -> Option<Signal> {
    let name = name.trim().to_ascii_uppercase();
    let name = name.strip_prefix("SIG").unwrap_or(&name);

    match name {
        "TERM" => Some(Signal::SIGTERM),
        "INT" => Some(Signal::SIGINT),
        "QUIT" => Some(Signal::SIGQUIT),
        "HUP" => Some(Signal::SIGHUP),
        "KILL" => Some(Signal::SIGKILL),
        "USR1" => Some(Signal::SIGUSR1),
        "USR2" => Some(Signal::SIGUSR2),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    max_attempts: Option<u32>,
    attempt_delay_ms: Option<u64>,
}

/// One `[service.<name>]` table
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pattern: String,
    executable: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    working_directory: PathBuf,
    log_path: PathBuf,
    #[serde(default = "default_fd_limit")]
    fd_limit: u64,
    signal: Option<String>,
    #[serde(default)]
    append_log: bool,
}

fn default_fd_limit() -> u64 {
    DEFAULT_FD_LIMIT
}

impl ServiceConfig {
    pub fn query(&self) -> Result<ServiceQuery, Error> {
        ServiceQuery::new(self.pattern.clone())
    }

    pub fn signal(&self) -> Result<Signal, Error> {
        match self.signal.as_deref() {
            None => Ok(Signal::SIGKILL),
            Some(name) => signal_from_name(name)
                .ok_or_else(|| Error::config(format!("unknown signal name: {}", name))),
        }
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec::new(
            &self.executable,
            &self.working_directory,
            &self.log_path,
        )
        .args(self.args.iter())
        .fd_limit(self.fd_limit);
        spec.append_log = self.append_log;
        spec
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    max_log_level: Option<String>,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    service: BTreeMap<String, ServiceConfig>,
}

impl SupervisorConfig {
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str::<Self>(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Read the configuration
    ///
    /// An `explicit` path must exist and parse. Without one, `fallback` is read only if present,
    ///  and with neither the built in defaults apply.
    pub fn load(explicit: Option<&Path>, fallback: Option<&Path>) -> Result<Self, Error> {
        match (explicit, fallback) {
            (Some(path), _) => Self::from_file(path),
            (None, Some(path)) if path.exists() => Self::from_file(path),
            (None, _) => Ok(Self::default()),
        }
    }

    /// Command line values win over the file
    pub fn merge_command_args(
        &mut self,
        max_log_level: Option<String>,
        max_attempts: Option<u32>,
        attempt_delay_ms: Option<u64>,
    ) {
        if let Some(max_log_level) = max_log_level {
            self.max_log_level = Some(max_log_level);
        }
        if let Some(max_attempts) = max_attempts {
            self.retry.max_attempts = Some(max_attempts);
        }
        if let Some(attempt_delay_ms) = attempt_delay_ms {
            self.retry.attempt_delay_ms = Some(attempt_delay_ms);
        }
    }

    pub fn max_log_level(&self) -> &str {
        self.max_log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, Error> {
        RetryPolicy::new(
            self.retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            self.retry
                .attempt_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ATTEMPT_DELAY),
        )
    }

    pub fn service(&self, name: &str) -> Result<&ServiceConfig, Error> {
        self.service
            .get(name)
            .ok_or_else(|| Error::config(format!("no service named {} is configured", name)))
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.service.keys().map(String::as_str)
    }
}
