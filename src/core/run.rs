use super::CancelToken;
use crate::config::Config;
use crate::error::{EXIT_CLEAN, EXIT_INFECTED, EXIT_SCAN_ERROR};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Command-line choices for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub targets: Vec<String>,
    pub verbose: bool,
    pub quiet: bool,
    pub quick: bool,
    pub count: bool,
    pub no_quarantine: bool,
    pub summary_only: bool,
    pub exclude: Vec<String>,
    pub max_size_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn new(started_at: DateTime<Local>, pid: u32) -> Self {
        Self(format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), pid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a component needs to know about the current run. Passed by
/// reference through the pipeline instead of living in globals.
pub struct RunContext {
    pub id: RunId,
    pub started_at: DateTime<Local>,
    pub config: Config,
    pub options: RunOptions,
    pub cancel: CancelToken,
    status: watch::Sender<String>,
}

impl RunContext {
    pub fn new(config: Config, options: RunOptions, cancel: CancelToken) -> Self {
        let started_at = Local::now();
        let (status, _) = watch::channel(String::new());
        Self {
            id: RunId::new(started_at, std::process::id()),
            started_at,
            config,
            options,
            cancel,
            status,
        }
    }

    pub fn quarantine_enabled(&self) -> bool {
        self.config.quarantine.enabled && !self.options.no_quarantine
    }

    /// Publishes a status line for the progress display. Only the pipeline
    /// writes; the display only reads.
    pub fn set_status(&self, message: impl Into<String>) {
        self.status.send_replace(message.into());
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Clean,
    Infected,
    Error(i32),
}

impl ScanStatus {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ScanStatus::Clean,
            1 => ScanStatus::Infected,
            other => ScanStatus::Error(other),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ScanStatus::Clean => EXIT_CLEAN,
            ScanStatus::Infected => EXIT_INFECTED,
            ScanStatus::Error(_) => EXIT_SCAN_ERROR,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ScanStatus::Clean => "✔",
            ScanStatus::Infected => "✖",
            ScanStatus::Error(_) => "⚠",
        }
    }

    pub fn label(&self) -> String {
        match self {
            ScanStatus::Clean => "CLEAN".to_string(),
            ScanStatus::Infected => "INFECTED".to_string(),
            ScanStatus::Error(code) => format!("ERROR (scanner exit code {})", code),
        }
    }
}

/// A finished engine execution. Built once after the engine exits and its
/// output is parsed; there are no mutators.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub id: RunId,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub targets: Vec<PathBuf>,
    pub exit_code: i32,
    pub status: ScanStatus,
    pub scanned: u64,
    pub infected: u64,
    pub elapsed: Duration,
}

impl ScanRun {
    pub fn finalize(
        ctx: &RunContext,
        targets: Vec<PathBuf>,
        exit_code: i32,
        ended_at: DateTime<Local>,
        elapsed: Duration,
        scanned: u64,
        infected: u64,
    ) -> Self {
        Self {
            id: ctx.id.clone(),
            started_at: ctx.started_at,
            ended_at,
            targets,
            exit_code,
            status: ScanStatus::from_exit_code(exit_code),
            scanned,
            infected,
            elapsed,
        }
    }

    /// Files per second over whole elapsed seconds; `None` for sub-second runs.
    pub fn scan_rate(&self) -> Option<f64> {
        match self.elapsed.as_secs() {
            0 => None,
            secs => Some(self.scanned as f64 / secs as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run(elapsed: Duration, scanned: u64) -> ScanRun {
        let ctx = RunContext::new(Config::default(), RunOptions::default(), CancelToken::new());
        ScanRun::finalize(&ctx, Vec::new(), 0, Local::now(), elapsed, scanned, 0)
    }

    #[test]
    fn test_run_id_has_timestamp_and_pid() {
        let at = Local.with_ymd_and_hms(2026, 10, 16, 9, 5, 7).unwrap();
        assert_eq!(RunId::new(at, 4242).as_str(), "20261016_090507_4242");
    }

    #[test]
    fn test_status_from_exit_code() {
        assert_eq!(ScanStatus::from_exit_code(0), ScanStatus::Clean);
        assert_eq!(ScanStatus::from_exit_code(1), ScanStatus::Infected);
        assert_eq!(ScanStatus::from_exit_code(2), ScanStatus::Error(2));
        assert_eq!(ScanStatus::from_exit_code(-1).exit_code(), 2);
    }

    #[test]
    fn test_scan_rate_skipped_for_zero_duration() {
        assert_eq!(run(Duration::from_millis(900), 50).scan_rate(), None);
        assert_eq!(run(Duration::from_secs(4), 100).scan_rate(), Some(25.0));
    }

    #[test]
    fn test_quarantine_flag_respects_cli() {
        let ctx = RunContext::new(
            Config::default(),
            RunOptions {
                no_quarantine: true,
                ..RunOptions::default()
            },
            CancelToken::new(),
        );
        assert!(!ctx.quarantine_enabled());
    }

    #[test]
    fn test_status_channel_delivers_latest() {
        let ctx = RunContext::new(Config::default(), RunOptions::default(), CancelToken::new());
        let rx = ctx.subscribe_status();
        ctx.set_status("one");
        ctx.set_status("two");
        assert_eq!(rx.borrow().as_str(), "two");
    }
}
