// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nix::sys::signal::Signal;
use tracing::{error, info};

use crate::config::{LaunchSpec, RetryPolicy};
use crate::procs::{
    DaemonProcess, Launch, Outcome, ProcessProvider, ServiceQuery, TerminationRetryLoop,
};
use crate::Error;

/// What one restart did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub outcome: Outcome,
    pub daemon: DaemonProcess,
}

/// Replace a running service with a fresh instance
///
/// Rules:
///   - clear out a stale instance first, best effort
///   - always launch exactly once, whatever the search found
///   - never watches the new instance after launch
pub struct Supervisor<P: ProcessProvider, L: Launch> {
    provider: P,
    launcher: L,
    policy: RetryPolicy,
    signal: Signal,
}

impl<P: ProcessProvider, L: Launch> Supervisor<P, L> {
    pub fn new(provider: P, launcher: L, policy: RetryPolicy) -> Self {
        Self {
            provider,
            launcher,
            policy,
            signal: Signal::SIGKILL,
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Only a failed launch is an error, nothing found or a failed kill is not
    pub async fn restart(
        &self,
        query: &ServiceQuery,
        spec: &LaunchSpec,
    ) -> Result<Report, Error> {
        info!("restarting {}", query);

        let outcome = TerminationRetryLoop::new(&self.provider, self.policy)
            .with_signal(self.signal)
            .run(query)
            .await;

        match &outcome {
            Outcome::Terminated { handle, .. } => {
                info!("stale instance {} signalled", handle.pid())
            }
            Outcome::NotFound { attempts } => {
                info!("no stale instance after {} attempt(s)", attempts)
            }
        }

        let daemon = self.launcher.launch(spec).await.map_err(|e| {
            error!("launch of {} failed: {}", query, e);
            e
        })?;

        Ok(Report { outcome, daemon })
    }
}
