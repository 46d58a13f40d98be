//! Run scheduler
//!
//! Owns the session automaton for the whole run, repeats cycles with a delay
//! between them and guarantees the same shutdown on every exit path: tunnel
//! closed, report sink closed.

use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::alert::{AlertSink, Sounder};
use crate::core::cycle::run_cycle;
use crate::core::prober::Prober;
use crate::core::report::ReportSink;
use crate::core::session::SessionAutomaton;
use crate::types::{ErrorKind, FatalError, RunConfig, RunSummary, SessionState};

/// Drives a complete monitoring run
pub struct RunScheduler {
    config: RunConfig,
    automaton: SessionAutomaton,
    prober: Arc<dyn Prober>,
    sink: Box<dyn ReportSink>,
    alerts: Arc<dyn AlertSink>,
    cancel: CancellationToken,
    handle_interrupts: bool,
}

impl RunScheduler {
    pub fn new(
        config: RunConfig,
        automaton: SessionAutomaton,
        prober: Arc<dyn Prober>,
        sink: Box<dyn ReportSink>,
    ) -> Self {
        let alerts = Arc::new(Sounder::new(config.quiet));
        Self {
            config,
            automaton,
            prober,
            sink,
            alerts,
            cancel: CancellationToken::new(),
            handle_interrupts: true,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Use an externally owned stop signal
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Listen for Ctrl-C (on by default)
    pub fn handle_interrupts(mut self, enabled: bool) -> Self {
        self.handle_interrupts = enabled;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every configured cycle, or until stopped.
    ///
    /// A fatal error ends the run early; shutdown still happens first.
    pub async fn run(mut self) -> Result<RunSummary, FatalError> {
        let interrupts = if self.handle_interrupts {
            let handle = spawn_interrupt_handler(self.cancel.clone());
            // Let the handler register before the first cycle
            tokio::task::yield_now().await;
            Some(handle)
        } else {
            None
        };

        let result = self.cycles().await;

        if self.automaton.state() != SessionState::Closed {
            info!("closing VPN connection");
        }
        if let Err(kind) = self.automaton.close().await {
            warn!("shutdown close: {}", kind);
        }

        let result = result.map(|cycles_run| RunSummary {
            cycles_run,
            cancelled: self.cancel.is_cancelled(),
            final_state: self.automaton.state(),
        });
        if let Ok(summary) = &result {
            self.sink.finished(summary);
        }
        self.sink.close().await;

        if let Some(handle) = interrupts {
            handle.abort();
        }
        result
    }

    /// The cycle loop; returns the number of cycles reported
    async fn cycles(&mut self) -> Result<u64, FatalError> {
        if !self.prober.resolves(&self.config.vpn_address).await {
            return Err(FatalError::new(
                ErrorKind::VpnAddressUnresolvable,
                self.config.vpn_address.clone(),
            ));
        }

        let delay = self.config.delay();
        let mut remaining = self.config.cycle_count;
        let mut index = 0;

        while remaining != 0 {
            if self.cancel.is_cancelled() {
                break;
            }
            index += 1;

            let record = run_cycle(
                index,
                &self.config,
                &mut self.automaton,
                self.prober.as_ref(),
                self.alerts.as_ref(),
                &self.cancel,
            )
            .await?;
            self.sink.report(&record).await?;

            if self.automaton.state() != SessionState::Closed {
                // open() failed; release the client before the next cycle
                let _ = self.automaton.close().await;
            }

            if remaining > 0 {
                remaining -= 1;
            }
            if remaining == 0 || self.cancel.is_cancelled() {
                break;
            }

            self.sink.waiting(index + 1, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!("stop requested during the delay before cycle {}", index + 1);
                    break;
                }
            }
        }
        Ok(index)
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("unable to listen for Ctrl-C: {}", e);
                return;
            }
            if cancel.is_cancelled() {
                warn!("already stopping; waiting for the current step to finish");
            } else {
                warn!("stop requested; finishing the current step");
                cancel.cancel();
            }
        }
    })
}
