// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::str::FromStr;

use tracing::Level;

use crate::Error;

/// Parse a level name, `info`, `DEBUG`, etc.
pub fn parse_level(max_log_level: &str) -> Result<Level, Error> {
    Level::from_str(max_log_level.trim())
        .map_err(|_| Error::config(format!("unknown log level: {}", max_log_level)))
}

/// Send the supervisor's own diagnostics to stderr.
///
/// The daemon's output never passes through here, it goes straight to its log file.
pub fn init_log(max_log_level: &str) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(parse_level(max_log_level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::from(format!("failed to initialize logging: {}", e)))
}
