// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nix::sys::signal::Signal;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::procs::{ProcessHandle, ProcessLocator, ProcessProvider, ServiceQuery};

/// How the search for a stale instance ended.
///
/// Either way the supervisor goes on to launch, this only feeds logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A stale instance was signalled on the given attempt, whether or not it exited is unknown
    Terminated { handle: ProcessHandle, attempt: u32 },
    /// No instance turned up in any attempt
    NotFound { attempts: u32 },
}

/// Look for a stale instance, kill the first one found, give up after `max_attempts`.
///
/// Rules:
///  - at most one signal per run
///  - no check that the signalled process actually went away
///  - a failed signal is logged and otherwise treated as delivered
///  - sleeps between attempts, never after the last one
pub struct TerminationRetryLoop<'p, P: ProcessProvider> {
    provider: &'p P,
    policy: RetryPolicy,
    signal: Signal,
}

impl<'p, P: ProcessProvider> TerminationRetryLoop<'p, P> {
    pub fn new(provider: &'p P, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            signal: Signal::SIGKILL,
        }
    }

    /// Use something other than SIGKILL, there is still no escalation
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    pub async fn run(&self, query: &ServiceQuery) -> Outcome {
        let locator = ProcessLocator::new(self.provider);
        let max_attempts = self.policy.max_attempts();

        for attempt in 1..=max_attempts {
            let mut found = locator.find(query).into_iter();

            if let Some(stale) = found.next() {
                let remaining = found.count();
                if remaining > 0 {
                    warn!(
                        "{} more process(es) match {}, only {} will be signalled",
                        remaining,
                        query,
                        stale.pid()
                    );
                }

                info!("killing stale instance {} with {}", stale, self.signal);
                if let Err(err) = self.provider.signal(stale.pid(), self.signal) {
                    warn!("failed to signal {}: {}", stale.pid(), err);
                }

                return Outcome::Terminated {
                    handle: stale,
                    attempt,
                };
            }

            info!(
                "no running instance of {} found, attempt {}/{}",
                query, attempt, max_attempts
            );

            if attempt < max_attempts {
                sleep(self.policy.attempt_delay()).await;
            }
        }

        Outcome::NotFound {
            attempts: max_attempts,
        }
    }
}
