use crate::core::RunContext;
use crate::error::AppError;
use crate::exclusions::ExclusionSet;
use chrono::{DateTime, Local};
use nix::sys::signal::Signal;
use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Interval between status updates while the engine runs.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(500);

const STATUS_TAIL_BYTES: u64 = 4096;

/// Result of a single engine execution. Owns the captured output file, which
/// is deleted when this value is dropped.
#[derive(Debug)]
pub struct ScanInvocation {
    pub exit_code: i32,
    pub elapsed: Duration,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    output: NamedTempFile,
}

impl ScanInvocation {
    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    pub fn read_output(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(self.output.path())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Assembled argument list for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ScanCommand {
    pub fn build(
        ctx: &RunContext,
        targets: &[PathBuf],
        exclusions: &ExclusionSet,
        holding: Option<&Path>,
    ) -> Self {
        let scanner = &ctx.config.scanner;
        let max_file = ctx.options.max_size_mb.unwrap_or(scanner.max_file_size_mb);
        let max_scan = scanner.max_scan_size_mb.max(max_file);

        let mut args: Vec<OsString> = vec![
            "-r".into(),
            "-i".into(),
            format!("--max-filesize={}M", max_file).into(),
            format!("--max-scansize={}M", max_scan).into(),
        ];

        let mut excluded_dirs: Vec<&Path> = scanner
            .pseudo_filesystems
            .iter()
            .map(PathBuf::as_path)
            .collect();
        excluded_dirs.push(ctx.config.quarantine.dir.as_path());
        for dir in excluded_dirs {
            args.push(format!("--exclude-dir={}", exclude_dir_regex(dir)).into());
        }

        for pattern in exclusions.patterns() {
            args.push(format!("--exclude={}", pattern).into());
        }

        if let Some(holding) = holding {
            let mut flag = OsString::from("--move=");
            flag.push(holding.as_os_str());
            args.push(flag);
        }

        args.extend(targets.iter().map(|t| t.as_os_str().to_os_string()));

        Self {
            program: scanner.binary.clone(),
            args,
        }
    }
}

/// Anchored regex covering `dir` and everything below it, but not siblings
/// that merely share its prefix (`/dev` must not hide `/devel`).
fn exclude_dir_regex(dir: &Path) -> String {
    let raw = dir.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    format!("^{}(/|$)", regex::escape(trimmed))
}

/// Runs the engine once and waits for it, publishing the latest output line on
/// the run's status channel and honoring cancellation.
pub async fn run_scan(ctx: &RunContext, command: &ScanCommand) -> Result<ScanInvocation, AppError> {
    let output = tempfile::Builder::new()
        .prefix("avscan-output-")
        .suffix(".log")
        .tempfile()
        .map_err(|e| AppError::Scan(format!("cannot create output capture file: {}", e)))?;
    let stdout = output
        .reopen()
        .map_err(|e| AppError::Scan(format!("cannot open output capture file: {}", e)))?;
    let stderr = stdout
        .try_clone()
        .map_err(|e| AppError::Scan(format!("cannot open output capture file: {}", e)))?;

    log::info!(
        "launching {:?} with {} argument(s)",
        command.program,
        command.args.len()
    );
    log::debug!("scanner arguments: {:?}", command.args);

    let started_at = Local::now();
    let start = Instant::now();
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Scan(format!("failed to launch {:?}: {}", command.program, e)))?;

    ctx.set_status("scanning");

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| AppError::Scan(format!("failed to wait for scanner: {}", e)))?;
            }
            _ = ctx.cancel.cancelled() => {
                log::warn!("interrupt received, terminating scanner (pid {:?})", child.id());
                if let Err(e) = child.kill().await {
                    log::warn!("failed to terminate scanner: {}", e);
                }
                return Err(AppError::Interrupted);
            }
            _ = ticker.tick() => {
                if let Some(line) = last_line(output.path()) {
                    ctx.set_status(line);
                }
            }
        }
    };

    // A terminal Ctrl-C reaches the engine too, and it may exit before our
    // own handler has flipped the token.
    if let Some(signal) = interrupt_signal(&status) {
        log::warn!("scanner stopped by {:?}", signal);
        ctx.cancel.cancel();
        return Err(AppError::Interrupted);
    }
    if ctx.cancel.is_cancelled() {
        return Err(AppError::Interrupted);
    }

    let elapsed = start.elapsed();
    let exit_code = status.code().unwrap_or(-1);
    log::info!(
        "scanner exited with code {} after {:.1}s",
        exit_code,
        elapsed.as_secs_f64()
    );

    Ok(ScanInvocation {
        exit_code,
        elapsed,
        started_at,
        ended_at: Local::now(),
        output,
    })
}

fn interrupt_signal(status: &std::process::ExitStatus) -> Option<Signal> {
    let signal = Signal::try_from(status.signal()?).ok()?;
    matches!(signal, Signal::SIGINT | Signal::SIGTERM).then_some(signal)
}

/// Last non-empty line of the captured output, read from its tail only.
fn last_line(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(STATUS_TAIL_BYTES))).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    String::from_utf8_lossy(&buf)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// First line of `<binary> --version`, if the engine answers.
pub async fn scanner_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}
