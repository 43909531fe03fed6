// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::debug;

use crate::fork::StdIoConf;
use crate::Error;

/// The one file receiving everything the daemon writes to stdout and stderr.
///
/// Rules:
///  - truncated each time it is opened, unless append was asked for
///  - stdout and stderr share one open file, so their order is kept
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    /// Open (and truncate) the log at `path`
    pub fn truncate<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::open(path, false)
    }

    /// Open the log at `path` keeping whatever a previous run wrote
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::open(path, true)
    }

    fn open<P: AsRef<Path>>(path: P, append: bool) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let file = options.open(&path).map_err(|e| {
            Error::from(format!("failed to open log {}: {}", path.display(), e))
        })?;

        debug!(
            "opened log {} ({})",
            path.display(),
            if append { "append" } else { "truncate" }
        );
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the log to a child: no stdin, stdout and stderr both into the log
    pub fn into_stdio(self) -> Result<StdIoConf, Error> {
        let stderr = self.file.try_clone()?;

        Ok(StdIoConf {
            stdin: Stdio::null(),
            stdout: Stdio::from(self.file),
            stderr: Stdio::from(stderr),
        })
    }
}
