use crate::core::{RunId, ScanRun, ScanStatus};
use crate::quarantine::{RetentionPolicy, RiskLevel, SweepOutcome};
use crate::scanner::Detection;
use crate::utils::{format_bytes, get_current_user, get_host_name, get_os_fingerprint};
use anyhow::Context;
use colored::Colorize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Environment {
    pub user: String,
    pub host: String,
    pub os: String,
    pub scanner_version: Option<String>,
    pub engine_version: Option<String>,
}

impl Environment {
    pub fn detect(scanner_version: Option<String>, engine_version: Option<String>) -> Self {
        Self {
            user: get_current_user(),
            host: get_host_name(),
            os: get_os_fingerprint(),
            scanner_version,
            engine_version,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuarantineSummary {
    pub location: PathBuf,
    pub archived: usize,
    pub failed: usize,
    pub risk_level: RiskLevel,
    pub policy: RetentionPolicy,
    pub sweep: SweepOutcome,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub run: ScanRun,
    pub environment: Environment,
    pub detections: Vec<Detection>,
    /// `None` when quarantine was disabled for this run.
    pub quarantine: Option<QuarantineSummary>,
    pub warnings: Vec<String>,
}

pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// `scan_report_<YYYYmmdd_HHMMSS>_<pid>.txt`; the pid keeps runs started
    /// in the same second apart.
    pub fn report_path(&self, id: &RunId) -> PathBuf {
        self.output_dir.join(format!("scan_report_{}.txt", id))
    }

    pub fn save(&self, report: &ScanReport) -> Result<PathBuf, anyhow::Error> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("cannot create report directory {:?}", self.output_dir))?;
        let path = self.report_path(&report.run.id);
        std::fs::write(&path, self.render_text(report))
            .with_context(|| format!("cannot write report {:?}", path))?;
        log::info!("report saved: {:?}", path);
        Ok(path)
    }

    pub fn render_text(&self, report: &ScanReport) -> String {
        let run = &report.run;
        let env = &report.environment;
        let mut text = String::new();

        let _ = writeln!(text, "avscan scan report");
        let _ = writeln!(text, "==================");
        let _ = writeln!(text, "Run ID:         {}", run.id);
        let _ = writeln!(text, "Status:         {} {}", run.status.symbol(), run.status.label());
        let _ = writeln!(text, "Started:        {}", run.started_at.format("%Y-%m-%d %H:%M:%S %z"));
        let _ = writeln!(text, "Finished:       {}", run.ended_at.format("%Y-%m-%d %H:%M:%S %z"));
        let _ = writeln!(text, "Duration:       {}", format_duration(run.elapsed));
        let _ = writeln!(text, "User:           {}@{}", env.user, env.host);
        let _ = writeln!(text, "Targets:");
        for target in &run.targets {
            let _ = writeln!(text, "  - {}", target.display());
        }

        let _ = writeln!(text, "\nResults\n-------");
        let _ = writeln!(text, "Scanned files:  {}", run.scanned);
        let _ = writeln!(text, "Infected files: {}", run.infected);
        match run.scan_rate() {
            Some(rate) => {
                let _ = writeln!(text, "Scan rate:      {:.2} files/s", rate);
            }
            None => {
                let _ = writeln!(text, "Scan rate:      n/a");
            }
        }

        let _ = writeln!(text, "\nEnvironment\n-----------");
        let _ = writeln!(text, "OS:             {}", env.os);
        let _ = writeln!(
            text,
            "Scanner:        {}",
            env.scanner_version.as_deref().unwrap_or("unknown")
        );
        let _ = writeln!(
            text,
            "Engine:         {}",
            env.engine_version.as_deref().unwrap_or("unknown")
        );

        if run.status == ScanStatus::Infected || !report.detections.is_empty() {
            let _ = writeln!(text, "\nDetections\n----------");
            for detection in &report.detections {
                let _ = writeln!(text, "  {}  =>  {}", detection.path.display(), detection.label);
            }

            let _ = writeln!(text, "\nQuarantine\n----------");
            match &report.quarantine {
                Some(q) => {
                    let _ = writeln!(text, "Location:       {}", q.location.display());
                    let _ = writeln!(text, "Archived:       {} ({} failed)", q.archived, q.failed);
                    let _ = writeln!(text, "Risk level:     {}", q.risk_level);
                    let _ = writeln!(text, "Retention:      {}", q.policy);
                    let _ = writeln!(
                        text,
                        "Sweep:          {} expired, {} evicted, {} retained",
                        q.sweep.expired,
                        q.sweep.evicted,
                        format_bytes(q.sweep.remaining_bytes)
                    );
                }
                None => {
                    let _ = writeln!(text, "Disabled; infected files were left in place.");
                }
            }
        }

        if !report.warnings.is_empty() {
            let _ = writeln!(text, "\nWarnings\n--------");
            for warning in &report.warnings {
                let _ = writeln!(text, "  - {}", warning);
            }
        }

        text
    }
}

fn format_duration(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}

pub fn recommendation(status: ScanStatus, quarantined: bool) -> &'static str {
    match status {
        ScanStatus::Clean => "No threats found. Keep signatures current with freshclam.",
        ScanStatus::Infected if quarantined => {
            "Review the quarantined files and rescan the affected locations."
        }
        ScanStatus::Infected => {
            "Infected files were left in place; remove them or rerun with quarantine enabled."
        }
        ScanStatus::Error(_) => {
            "The scan did not complete; check the log file and the scanner installation."
        }
    }
}

/// Short colorized summary for the terminal.
pub fn render_terminal_summary(
    report: &ScanReport,
    report_path: Option<&Path>,
    summary_only: bool,
) -> String {
    let run = &report.run;
    let headline = format!("{} Scan {}", run.status.symbol(), run.status.label());
    let headline = match run.status {
        ScanStatus::Clean => headline.green().bold(),
        ScanStatus::Infected => headline.red().bold(),
        ScanStatus::Error(_) => headline.yellow().bold(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", headline);
    let _ = writeln!(
        out,
        "  Scanned: {}  Infected: {}  Duration: {}",
        run.scanned,
        run.infected.to_string().bold(),
        format_duration(run.elapsed)
    );

    if !summary_only {
        for detection in &report.detections {
            let _ = writeln!(
                out,
                "  {} {}",
                detection.label.red(),
                detection.path.display().to_string().dimmed()
            );
        }
    }

    if let Some(q) = &report.quarantine {
        if q.archived > 0 || q.failed > 0 {
            let _ = writeln!(
                out,
                "  Quarantined {} file(s) in {}{}",
                q.archived,
                q.location.display(),
                if q.failed > 0 {
                    format!(" ({} failed)", q.failed).yellow().to_string()
                } else {
                    String::new()
                }
            );
        }
    }

    if let Some(path) = report_path {
        let _ = writeln!(out, "  Report: {}", path.display());
    }

    let _ = writeln!(
        out,
        "  {} {}",
        "→".cyan(),
        recommendation(run.status, report.quarantine.is_some())
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{CancelToken, RunContext, RunOptions};
    use chrono::Local;
    use tempfile::TempDir;

    fn environment() -> Environment {
        Environment {
            user: "alice".into(),
            host: "box".into(),
            os: "Linux".into(),
            scanner_version: Some("ClamAV 1.0.3/27000".into()),
            engine_version: Some("1.0.3".into()),
        }
    }

    fn report(exit_code: i32, elapsed: Duration, detections: Vec<Detection>) -> ScanReport {
        let ctx = RunContext::new(Config::default(), RunOptions::default(), CancelToken::new());
        let infected = detections.len() as u64;
        ScanReport {
            run: ScanRun::finalize(
                &ctx,
                vec![PathBuf::from("/home/alice")],
                exit_code,
                Local::now(),
                elapsed,
                40,
                infected,
            ),
            environment: environment(),
            detections,
            quarantine: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_clean_report_has_no_detection_section() {
        let generator = ReportGenerator::new(PathBuf::from("/tmp"));
        let text = generator.render_text(&report(0, Duration::from_secs(8), Vec::new()));
        assert!(text.contains("Status:         ✔ CLEAN"));
        assert!(text.contains("Scan rate:      5.00 files/s"));
        assert!(text.contains("  - /home/alice"));
        assert!(text.contains("User:           alice@box"));
        assert!(!text.contains("Detections"));
    }

    #[test]
    fn test_zero_duration_skips_rate() {
        let generator = ReportGenerator::new(PathBuf::from("/tmp"));
        let text = generator.render_text(&report(0, Duration::ZERO, Vec::new()));
        assert!(text.contains("Scan rate:      n/a"));
    }

    #[test]
    fn test_infected_report_lists_detections_and_quarantine() {
        let generator = ReportGenerator::new(PathBuf::from("/tmp"));
        let mut report = report(
            1,
            Duration::from_secs(3),
            vec![Detection {
                path: PathBuf::from("/home/alice/eicar.com"),
                label: "Eicar-Test-Signature".into(),
            }],
        );
        report.quarantine = Some(QuarantineSummary {
            location: PathBuf::from("/q"),
            archived: 1,
            failed: 0,
            risk_level: RiskLevel::Medium,
            policy: RetentionPolicy::default(),
            sweep: SweepOutcome::default(),
        });

        let text = generator.render_text(&report);
        assert!(text.contains("✖ INFECTED"));
        assert!(text.contains("/home/alice/eicar.com  =>  Eicar-Test-Signature"));
        assert!(text.contains("Location:       /q"));
        assert!(text.contains("Retention:      low=30d, medium=90d, high=180d, critical=never"));
    }

    #[test]
    fn test_save_names_file_after_run_id() {
        let dir = TempDir::new().unwrap();
        let generator = ReportGenerator::new(dir.path().join("logs"));
        let report = report(0, Duration::from_secs(1), Vec::new());
        let path = generator.save(&report).unwrap();

        let expected = format!(
            "scan_report_{}_{}.txt",
            report.run.started_at.format("%Y%m%d_%H%M%S"),
            std::process::id()
        );
        assert_eq!(path.file_name().unwrap().to_string_lossy(), expected);
        assert!(std::fs::read_to_string(&path).unwrap().contains(report.run.id.as_str()));
    }

    #[test]
    fn test_runs_in_the_same_second_get_distinct_reports() {
        let generator = ReportGenerator::new(PathBuf::from("/logs"));
        let at = Local::now();
        let first = generator.report_path(&RunId::new(at, 100));
        let second = generator.report_path(&RunId::new(at, 101));
        assert_ne!(first, second);
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let generator = ReportGenerator::new(file.join("logs"));
        assert!(generator.save(&report(0, Duration::ZERO, Vec::new())).is_err());
    }

    #[test]
    fn test_terminal_summary_respects_summary_only() {
        let report = report(
            1,
            Duration::from_secs(2),
            vec![Detection {
                path: PathBuf::from("/x/bad.exe"),
                label: "Win.Test".into(),
            }],
        );
        let full = render_terminal_summary(&report, None, false);
        let short = render_terminal_summary(&report, None, true);
        assert!(full.contains("/x/bad.exe"));
        assert!(!short.contains("/x/bad.exe"));
        assert!(short.contains("INFECTED"));
        assert!(short.contains("rerun with quarantine enabled"));
    }

    #[test]
    fn test_recommendations_by_status() {
        assert!(recommendation(ScanStatus::Clean, true).contains("No threats"));
        assert!(recommendation(ScanStatus::Infected, true).contains("quarantined"));
        assert!(recommendation(ScanStatus::Error(2), false).contains("did not complete"));
    }
}
