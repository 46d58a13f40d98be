//! Reporting sink: console summary plus datalog persistence

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use colored::Colorize;
use log::{info, warn};

use crate::core::datalog::{AppendOutcome, Datalog};
use crate::types::{CycleRecord, FatalError, ProbeOutcome, RunSummary};

/// Receives one record per cycle plus run lifecycle notices.
///
/// `close()` is called exactly once by the scheduler on every exit path.
#[async_trait]
pub trait ReportSink: Send {
    /// Consume one finished cycle; errors here end the run
    async fn report(&mut self, record: &CycleRecord) -> Result<(), FatalError>;

    /// The scheduler is about to sleep before `next_cycle`
    fn waiting(&mut self, _next_cycle: u64, _delay: Duration) {}

    /// The run ended without a fatal error
    fn finished(&mut self, _summary: &RunSummary) {}

    /// Release underlying resources
    async fn close(&mut self);
}

/// Renders cycle blocks for the operator's terminal
#[derive(Debug, Clone)]
pub struct ConsoleReport {
    /// Configured cycle count; negative = until stopped
    cycle_count: i64,
    json: bool,
    color: bool,
}

impl ConsoleReport {
    pub fn new(cycle_count: i64) -> Self {
        Self {
            cycle_count,
            json: false,
            color: true,
        }
    }

    /// Print one JSON object per cycle instead of text blocks
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn of_total(&self) -> String {
        if self.cycle_count < 0 {
            "of Infinite".to_string()
        } else {
            format!("of {}", self.cycle_count)
        }
    }

    fn paint(&self, label: &str, outcome: Option<ProbeOutcome>) -> String {
        match outcome {
            Some(outcome) if self.color => outcome.painted().to_string(),
            _ if self.color && label == "Skip" => label.dimmed().to_string(),
            _ => label.to_string(),
        }
    }

    /// Text lines for one cycle
    pub fn render(&self, record: &CycleRecord) -> Vec<String> {
        let n = record.cycle_index;
        let start = stamp(n, &record.timestamp);
        let end = stamp(n, &record.completed_at);
        let site = &record.site.label;

        let mut lines = vec![format!("{} Start vpnmon test cycle {} {}", start, n, self.of_total())];

        let internet = record.internet_result.outcome();
        lines.push(format!(
            "{} -- VPN ping ----------- {} {}",
            start,
            self.paint(internet.label(), Some(internet)),
            site
        ));

        let open = if record.tunnel_opened {
            self.paint("Good", Some(ProbeOutcome::Good))
        } else if let Some(kind) = record.tunnel_open_error {
            format!("{} [{}]", self.paint("Fail", Some(ProbeOutcome::Fail)), kind.code())
        } else {
            self.paint("Skip", None)
        };
        lines.push(format!("{} -- VPN open() --------- {} {}", start, open, site));

        for entry in &record.inner_results {
            let outcome = entry.result.outcome();
            lines.push(format!(
                "{} -- ping {:<15} {} {}",
                start,
                entry.target.address,
                self.paint(outcome.label(), Some(outcome)),
                entry.target.label
            ));
        }

        if record.close_attempted() {
            let close = match record.tunnel_close_error {
                None => self.paint("Good", Some(ProbeOutcome::Good)),
                Some(kind) => format!("{} [{}]", self.paint("Fail", Some(ProbeOutcome::Fail)), kind.code()),
            };
            lines.push(format!("{} -- VPN close() -------- {} {}", end, close, site));
        }

        if record.cancelled {
            lines.push(format!("{} Test cycle stopped early", end));
        }

        let tally = record.tally();
        lines.push(format!("{} End vpnmon test cycle {} {}", end, n, self.of_total()));
        lines.push(format!(
            "{} vpnmon test cycle ping results:  Good: {},  Warn: {},  Fail: {}",
            end, tally.good, tally.warn, tally.fail
        ));
        lines
    }

    /// Print one cycle to stdout
    pub fn print(&self, record: &CycleRecord) {
        if self.json {
            match serde_json::to_string(record) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("cycle {} not serializable: {}", record.cycle_index, e),
            }
        } else {
            for line in self.render(record) {
                println!("{}", line);
            }
        }
    }
}

/// `"  3 2024/03/09 07:05:01"`
fn stamp(cycle: u64, at: &DateTime<Local>) -> String {
    format!("{:>3} {}", cycle, at.format("%Y/%m/%d %H:%M:%S"))
}

/// Console plus datalog
#[derive(Debug)]
pub struct Reporter {
    console: ConsoleReport,
    datalog: Datalog,
}

impl Reporter {
    pub fn new(console: ConsoleReport, datalog: Datalog) -> Self {
        Self { console, datalog }
    }
}

#[async_trait]
impl ReportSink for Reporter {
    async fn report(&mut self, record: &CycleRecord) -> Result<(), FatalError> {
        self.console.print(record);
        if self.datalog.append(record).await? == AppendOutcome::Skipped && !self.console.json {
            println!("Unable to record test results");
        }
        Ok(())
    }

    fn waiting(&mut self, next_cycle: u64, delay: Duration) {
        if !self.console.json {
            println!(
                "{} Waiting {}s to run next test cycle.\n",
                stamp(next_cycle.saturating_sub(1), &Local::now()),
                delay.as_secs()
            );
        }
    }

    fn finished(&mut self, summary: &RunSummary) {
        if self.console.json {
            match serde_json::to_string(summary) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("run summary not serializable: {}", e),
            }
            return;
        }
        if summary.cancelled {
            println!("\n---- vpnmon stopped with Control-C ----");
        }
        let state = if self.console.color {
            summary.final_state.painted().to_string()
        } else {
            summary.final_state.to_string()
        };
        println!("VPN session {}", state);
        println!(
            "{} {} vpnmon test cycles completed.",
            stamp(summary.cycles_run, &Local::now()),
            summary.cycles_run
        );
    }

    async fn close(&mut self) {
        info!(
            "datalog {}: {} cycles written",
            self.datalog.path().display(),
            self.datalog.appends()
        );
    }
}
