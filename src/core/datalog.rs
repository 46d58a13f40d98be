//! Append-only CSV datalog
//!
//! The file is opened for each cycle and closed again. One row per step:
//! `cycle,YYYY/MM/DD,HH:MM:SS,step,result,address,name`

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::types::{CycleRecord, ErrorKind, FatalError};
use crate::{DATALOG_RETRY_DELAY_SECS, DATALOG_WRITE_RETRIES};

/// What happened to one cycle's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// The file stayed locked by another program; rows dropped
    Skipped,
}

/// Opens the datalog file for one append
pub type Opener = Arc<dyn Fn(&Path) -> std::io::Result<File> + Send + Sync>;

/// Datalog file, opened for each append so other programs can read it
/// between cycles
pub struct Datalog {
    path: PathBuf,
    opener: Opener,
    retries: u32,
    retry_delay: Duration,
    appends: u64,
}

impl std::fmt::Debug for Datalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datalog")
            .field("path", &self.path)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("appends", &self.appends)
            .finish()
    }
}

impl Datalog {
    /// Check that `path` can be created and appended to.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FatalError> {
        let path = path.into();
        open_append(&path)
            .map_err(|e| FatalError::new(ErrorKind::DatalogUnwritable, format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            opener: Arc::new(open_append),
            retries: DATALOG_WRITE_RETRIES,
            retry_delay: Duration::from_secs(DATALOG_RETRY_DELAY_SECS),
            appends: 0,
        })
    }

    /// Override the lock retry policy
    pub fn with_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    /// Replace how the file is opened for each append
    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = opener;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cycles written so far
    pub fn appends(&self) -> u64 {
        self.appends
    }

    /// Append all rows of `record`; the file is closed again before returning.
    ///
    /// Permission errors (another program holding the file) are retried and
    /// finally skipped; any other error is fatal.
    pub async fn append(&mut self, record: &CycleRecord) -> Result<AppendOutcome, FatalError> {
        let rows = rows_for(record);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_rows(&rows) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("datalog {} updated after retry", self.path.display());
                    }
                    self.appends += 1;
                    return Ok(AppendOutcome::Written);
                }
                Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
                    if attempt >= self.retries {
                        warn!(
                            "unable to open datalog {}; skipping this cycle's results",
                            self.path.display()
                        );
                        return Ok(AppendOutcome::Skipped);
                    }
                    warn!("cannot open datalog {}; retrying", self.path.display());
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    return Err(FatalError::new(
                        ErrorKind::DatalogUnwritable,
                        format!("{}: {}", self.path.display(), e),
                    ));
                }
            }
        }
    }

    fn write_rows(&self, rows: &[String]) -> std::io::Result<()> {
        let mut writer = BufWriter::new((self.opener)(&self.path)?);
        for row in rows {
            writeln!(writer, "{}", row)?;
        }
        writer.flush()
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// CSV rows for one cycle, in step order
pub fn rows_for(record: &CycleRecord) -> Vec<String> {
    let date = record.timestamp.format("%Y/%m/%d").to_string();
    let tod = record.timestamp.format("%H:%M:%S").to_string();
    let row = |step: &str, result: &str, address: &str, name: &str| {
        [
            record.cycle_index.to_string(),
            date.clone(),
            tod.clone(),
            step.to_string(),
            result.to_string(),
            csv_field(address),
            csv_field(name),
        ]
        .join(",")
    };

    let mut rows = vec![row(
        "VPN ping",
        record.internet_result.outcome().label(),
        &record.site.address,
        &record.site.label,
    )];
    rows.push(row(
        "VPN open",
        step_label(record.tunnel_opened, record.open_attempted()),
        &record.site.address,
        &record.site.label,
    ));
    for entry in &record.inner_results {
        rows.push(row(
            "Target ping",
            entry.result.outcome().label(),
            &entry.target.address,
            &entry.target.label,
        ));
    }
    if record.close_attempted() {
        rows.push(row(
            "VPN close",
            step_label(record.tunnel_closed, true),
            &record.site.address,
            &record.site.label,
        ));
    }
    rows
}

fn step_label(succeeded: bool, attempted: bool) -> &'static str {
    match (attempted, succeeded) {
        (false, _) => "Skip",
        (true, true) => "Good",
        (true, false) => "Fail",
    }
}

/// Quote a field when it holds a separator, quote or line break
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
