//! Spinner shown while the engine runs.
//!
//! A background task reads the most recent status line from the run's watch
//! channel and redraws on a fixed tick. Any failure to set up the terminal
//! output leaves the reporter silent; the scan itself never depends on it.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {prefix}{wide_msg}";
const MAX_STATUS_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Finished,
    Interrupted,
}

impl StopReason {
    fn message(&self) -> &'static str {
        match self {
            StopReason::Finished => "scan finished",
            StopReason::Interrupted => "scan interrupted, cleaning up",
        }
    }
}

pub struct ProgressReporter {
    stop_tx: Option<oneshot::Sender<StopReason>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Starts the display task. `visible` is the caller's wish; the bar still
    /// stays hidden when stderr is not a terminal.
    pub fn spawn(status: watch::Receiver<String>, visible: bool, queued_files: Option<u64>) -> Self {
        let bar = build_bar(visible && std::io::stderr().is_terminal());
        if let Some(count) = queued_files {
            bar.set_prefix(format!("{} files queued | ", count));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(display_loop(bar, status, stop_rx));

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub async fn stop(mut self, reason: StopReason) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(reason);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("progress display task failed: {}", e);
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn build_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    match ProgressStyle::with_template(SPINNER_TEMPLATE) {
        Ok(style) => {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(style);
            bar
        }
        Err(e) => {
            log::debug!("progress display disabled: {}", e);
            ProgressBar::hidden()
        }
    }
}

async fn display_loop(
    bar: ProgressBar,
    mut status: watch::Receiver<String>,
    mut stop_rx: oneshot::Receiver<StopReason>,
) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            reason = &mut stop_rx => {
                let reason = reason.unwrap_or(StopReason::Interrupted);
                match reason {
                    StopReason::Finished => bar.finish_with_message(reason.message()),
                    StopReason::Interrupted => bar.abandon_with_message(reason.message()),
                }
                return;
            }
            _ = ticker.tick() => {
                let line = truncate(&status.borrow_and_update(), MAX_STATUS_CHARS);
                bar.set_message(line);
                bar.tick();
            }
        }
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let tail: String = line
        .chars()
        .rev()
        .take(max_chars.saturating_sub(1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{}", tail)
}
