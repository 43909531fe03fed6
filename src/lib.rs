// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Restart supervisor for long running services
//!
//! Finds a stale instance of a service by its command line, kills it (best effort, with a bounded number of
//!  looks), then launches a fresh detached instance whose stdout and stderr land in a log file.

pub mod config;
mod error;
pub mod fork;
pub mod log;
pub mod procs;

pub use error::{Error, ErrorKind};
