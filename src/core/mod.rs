pub mod cancel;
pub mod run;

pub use cancel::{install_signal_handlers, CancelToken};
pub use run::{RunContext, RunId, RunOptions, ScanRun, ScanStatus};

use crate::error::AppError;
use crate::exclusions::ExclusionSet;
use crate::notify;
use crate::preflight;
use crate::progress::{ProgressReporter, StopReason};
use crate::quarantine::{HoldingArea, QuarantineManager};
use crate::report::{render_terminal_summary, Environment, QuarantineSummary, ReportGenerator, ScanReport};
use crate::scanner::{parse_detections, parse_summary, run_scan, scanner_version, ScanCommand};
use crate::targets::{count_files, TargetResolver};
use chrono::{Local, Utc};
use std::path::PathBuf;
use std::sync::Arc;

const ROOT_MODE: u32 = 0o700;

/// One complete run: pre-flight, target and exclusion setup, the engine,
/// parsing, quarantine, report and notification.
pub struct ScanPipeline {
    ctx: RunContext,
    resolver: Option<TargetResolver>,
}

impl ScanPipeline {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx, resolver: None }
    }

    /// Replaces the resolver built from the process cwd and home.
    pub fn with_resolver(mut self, resolver: TargetResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn run(&self) -> Result<ScanStatus, AppError> {
        let ctx = &self.ctx;
        let config = &ctx.config;
        log::info!("scan run {} started", ctx.id);

        let binary = preflight::locate_binary(&config.scanner.binary)?;
        log::debug!("using scanner {:?}", binary);

        preflight::ensure_writable_dir(&config.logging.log_dir, None)?;
        let quarantine = if ctx.quarantine_enabled() {
            let manager = QuarantineManager::new(&config.quarantine);
            preflight::ensure_writable_dir(manager.root(), Some(ROOT_MODE))?;
            Some(manager)
        } else {
            log::info!("quarantine disabled for this run");
            None
        };

        let required_mb = config.preflight.min_free_space_mb;
        preflight::check_free_space(&config.logging.log_dir, required_mb)?;
        if let Some(manager) = &quarantine {
            preflight::check_free_space(manager.root(), required_mb)?;
        }
        self.checkpoint()?;

        let mut warnings = Vec::new();

        let from_env;
        let resolver = match &self.resolver {
            Some(resolver) => resolver,
            None => {
                from_env = TargetResolver::from_env()?;
                &from_env
            }
        };
        let defaults = if ctx.options.quick {
            &config.scan.quick_targets
        } else {
            &config.scan.default_targets
        };
        let resolution = resolver.resolve(&ctx.options.targets, defaults)?;
        for skipped in &resolution.skipped {
            warnings.push(format!("skipped unusable target {:?}", skipped));
        }
        if resolution.used_fallback && !ctx.options.targets.is_empty() {
            warnings.push("none of the given targets exist, scanned the defaults instead".to_string());
        }
        log::info!("scan targets: {:?}", resolution.targets);

        let exclusions = Arc::new(ExclusionSet::build(
            &config.scan.exclude_patterns,
            &ctx.options.exclude,
        )?);
        if exclusions.invalid_count() > 0 {
            warnings.push(format!(
                "ignored {} empty exclusion pattern(s)",
                exclusions.invalid_count()
            ));
        }

        let holding = match &quarantine {
            Some(manager) => Some(manager.prepare_holding()?),
            None => None,
        };

        let queued = if ctx.options.count {
            ctx.set_status("counting files");
            Some(self.count(&resolution.targets, &exclusions).await?)
        } else {
            None
        };
        self.checkpoint()?;

        let progress = ProgressReporter::spawn(ctx.subscribe_status(), !ctx.options.quiet, queued);

        let mut command = ScanCommand::build(
            ctx,
            &resolution.targets,
            &exclusions,
            holding.as_ref().map(HoldingArea::path),
        );
        command.program = binary.clone();

        let scanned = match run_scan(ctx, &command).await {
            Ok(_) if ctx.cancel.is_cancelled() => Err(AppError::Interrupted),
            other => other,
        };
        let invocation = match scanned {
            Ok(invocation) => {
                progress.stop(StopReason::Finished).await;
                invocation
            }
            Err(e) => {
                progress.stop(StopReason::Interrupted).await;
                if let (AppError::Interrupted, Some(manager), Some(holding)) =
                    (&e, &quarantine, &holding)
                {
                    salvage(manager, holding);
                }
                return Err(e);
            }
        };

        let output = invocation
            .read_output()
            .map_err(|e| AppError::Scan(format!("cannot read scanner output: {}", e)))?;
        let summary = parse_summary(&output);
        let detections = parse_detections(&output);
        warnings.extend(summary.warnings.iter().cloned());

        let run = ScanRun::finalize(
            ctx,
            resolution.targets.clone(),
            invocation.exit_code,
            invocation.ended_at,
            invocation.elapsed,
            summary.scanned,
            summary.infected,
        );
        log::info!(
            "scan {}: {} scanned, {} infected",
            run.status.label(),
            run.scanned,
            run.infected
        );

        let quarantine_summary = match (&quarantine, &holding) {
            (Some(manager), Some(holding)) => Some(archive_and_sweep(manager, holding)?),
            _ => None,
        };
        if let Some(q) = &quarantine_summary {
            if q.failed > 0 {
                warnings.push(format!("{} file(s) could not be quarantined", q.failed));
            }
        }
        drop(holding);

        let report = ScanReport {
            environment: Environment::detect(
                scanner_version(&binary).await,
                summary.engine_version.clone(),
            ),
            run,
            detections,
            quarantine: quarantine_summary,
            warnings,
        };

        let report_path = if config.report.enabled {
            match ReportGenerator::new(config.logging.log_dir.clone()).save(&report) {
                Ok(path) => Some(path),
                Err(e) => {
                    log::error!("failed to write scan report: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        if !ctx.options.quiet {
            print!(
                "{}",
                render_terminal_summary(&report, report_path.as_deref(), ctx.options.summary_only)
            );
        }

        notify::send(
            &config.notifications,
            &format!("avscan: {}", report.run.status.label()),
            &format!(
                "{} scanned, {} infected",
                report.run.scanned, report.run.infected
            ),
        )
        .await;

        Ok(report.run.status)
    }

    fn checkpoint(&self) -> Result<(), AppError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(AppError::Interrupted);
        }
        Ok(())
    }

    async fn count(&self, targets: &[PathBuf], exclusions: &Arc<ExclusionSet>) -> Result<u64, AppError> {
        let targets = targets.to_vec();
        let exclusions = Arc::clone(exclusions);
        let cancel = self.ctx.cancel.clone();
        let total = tokio::task::spawn_blocking(move || count_files(&targets, &exclusions, &cancel))
            .await
            .map_err(|e| AppError::Scan(format!("file count failed: {}", e)))?;
        log::info!("{} file(s) queued for scanning", total);
        Ok(total)
    }
}

fn archive_and_sweep(
    manager: &QuarantineManager,
    holding: &HoldingArea,
) -> Result<QuarantineSummary, AppError> {
    let outcome = manager.archive(holding.path(), Local::now())?;
    let sweep = manager.sweep(Utc::now());
    Ok(QuarantineSummary {
        location: manager.root().to_path_buf(),
        archived: outcome.archived.len(),
        failed: outcome.failed,
        risk_level: manager.risk_level(),
        policy: manager.policy().clone(),
        sweep,
    })
}

/// Archives whatever the engine moved before it was stopped.
fn salvage(manager: &QuarantineManager, holding: &HoldingArea) {
    match manager.archive(holding.path(), Local::now()) {
        Ok(outcome) if !outcome.archived.is_empty() => log::warn!(
            "archived {} file(s) moved before the interrupt",
            outcome.archived.len()
        ),
        Ok(_) => {}
        Err(e) => log::error!("could not archive files after interrupt: {}", e),
    }
}
