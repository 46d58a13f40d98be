//! Cycle orchestrator
//!
//! One strict pass of Internet probe -> tunnel open -> inner probes -> tunnel
//! close. Nothing is retried here; the scheduler repeats whole cycles.

use chrono::Local;
use futures_util::stream::{self, StreamExt};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::core::alert::{AlertSink, Severity};
use crate::core::prober::Prober;
use crate::core::session::SessionAutomaton;
use crate::types::{CycleRecord, FatalError, RunConfig, TargetResult};
use crate::PROBE_CONCURRENCY;

/// Run test cycle `index`.
///
/// Returns the record of everything attempted. A fatal open failure ends the
/// cycle with `Err` and no record. Once the tunnel is open it is always
/// closed before returning, even if `cancel` fires during the inner probes.
pub async fn run_cycle(
    index: u64,
    config: &RunConfig,
    automaton: &mut SessionAutomaton,
    prober: &dyn Prober,
    alerts: &dyn AlertSink,
    cancel: &CancellationToken,
) -> Result<CycleRecord, FatalError> {
    let timestamp = Local::now();
    let site = config.site();
    let attempts = config.probe_attempts;

    let internet_result = prober.probe(&site.address, attempts).await;
    debug!("cycle {}: internet probe {}", index, internet_result);
    if !internet_result.is_good() {
        alerts.alert(Severity::Major).await;
    }

    let mut record = CycleRecord {
        cycle_index: index,
        timestamp,
        completed_at: timestamp,
        site,
        internet_result,
        tunnel_opened: false,
        tunnel_open_error: None,
        inner_results: Vec::new(),
        tunnel_closed: false,
        tunnel_close_error: None,
        cancelled: false,
    };

    if internet_result.is_fail() {
        record.completed_at = Local::now();
        return Ok(record);
    }
    if cancel.is_cancelled() {
        info!("cycle {}: stop requested, tunnel open skipped", index);
        record.cancelled = true;
        record.completed_at = Local::now();
        return Ok(record);
    }

    match automaton.open().await {
        Ok(()) => record.tunnel_opened = true,
        Err(kind) if kind.is_fatal() => {
            return Err(FatalError::new(kind, automaton.diagnostic().trim().to_string()));
        }
        Err(kind) => {
            record.tunnel_open_error = Some(kind);
            alerts.alert(Severity::Major).await;
            record.completed_at = Local::now();
            return Ok(record);
        }
    }

    // Order of results follows the target list regardless of completion order
    record.inner_results = stream::iter(config.targets.iter())
        .map(|target| async move {
            TargetResult {
                target: target.clone(),
                result: prober.probe(&target.address, attempts).await,
            }
        })
        .buffered(PROBE_CONCURRENCY)
        .take_until(cancel.cancelled())
        .collect()
        .await;

    for entry in &record.inner_results {
        if !entry.result.is_good() {
            alerts.alert(Severity::Minor).await;
        }
    }
    if cancel.is_cancelled() {
        info!(
            "cycle {}: stop requested after {} of {} targets",
            index,
            record.inner_results.len(),
            config.targets.len()
        );
        record.cancelled = true;
    }

    match automaton.close().await {
        Ok(()) => record.tunnel_closed = true,
        Err(kind) => {
            record.tunnel_close_error = Some(kind);
            alerts.alert(Severity::Major).await;
        }
    }

    record.completed_at = Local::now();
    Ok(record)
}
