//! Quarantine archive and retention.
//!
//! Flagged files reach a per-run holding directory through the engine's own
//! move facility. From there they are archived under
//! `<root>/<YYYY>-<MM>/<original_name>_<unix_ts>` with owner-only permissions,
//! and a retention sweep later expires them by age and by aggregate size.

pub mod policy;

pub use policy::{RetentionPolicy, RiskLevel};

use crate::config::QuarantineConfig;
use crate::error::AppError;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const HOLDING_PREFIX: &str = ".holding-";
const ARCHIVE_MODE: u32 = 0o600;
const ROOT_MODE: u32 = 0o700;

/// A file relocated into the archive.
#[derive(Debug, Clone)]
pub struct QuarantineEntry {
    pub path: PathBuf,
    pub original_name: String,
    pub risk_level: RiskLevel,
    pub quarantined_at: DateTime<Utc>,
    pub size: u64,
    /// `None` when the policy keeps this risk level forever.
    pub retention_deadline: Option<DateTime<Utc>>,
}

impl QuarantineEntry {
    fn load(path: PathBuf, risk_level: RiskLevel, policy: &RetentionPolicy) -> io::Result<Self> {
        let metadata = fs::metadata(&path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (original_name, quarantined_at) = match split_archive_name(&file_name) {
            Some((name, ts)) => match Utc.timestamp_opt(ts, 0).single() {
                Some(at) => (name.to_string(), at),
                None => (file_name.clone(), DateTime::<Utc>::from(metadata.modified()?)),
            },
            None => (file_name.clone(), DateTime::<Utc>::from(metadata.modified()?)),
        };

        // A deadline past chrono's range is as good as never.
        let retention_deadline = match policy.days_for(risk_level) {
            Some(0) | None => None,
            Some(days) => ChronoDuration::try_days(i64::from(days))
                .and_then(|span| quarantined_at.checked_add_signed(span)),
        };

        Ok(Self {
            path,
            original_name,
            risk_level,
            quarantined_at,
            size: metadata.len(),
            retention_deadline,
        })
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.quarantined_at).num_days()
    }
}

pub fn archive_name(original_name: &str, timestamp: i64) -> String {
    format!("{}_{}", original_name, timestamp)
}

fn split_archive_name(file_name: &str) -> Option<(&str, i64)> {
    let (name, ts) = file_name.rsplit_once('_')?;
    if name.is_empty() {
        return None;
    }
    ts.parse().ok().map(|ts| (name, ts))
}

fn is_month_dir(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// Per-run directory handed to the engine as its move destination. Removed
/// with everything left inside it when dropped.
#[derive(Debug)]
pub struct HoldingArea {
    dir: TempDir,
}

impl HoldingArea {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<QuarantineEntry>,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: usize,
    pub evicted: usize,
    pub failed: usize,
    pub remaining_bytes: u64,
}

pub struct QuarantineManager {
    root: PathBuf,
    risk_level: RiskLevel,
    policy: RetentionPolicy,
    max_size_bytes: u64,
}

impl QuarantineManager {
    pub fn new(config: &QuarantineConfig) -> Self {
        Self {
            root: config.dir.clone(),
            risk_level: config.risk_level,
            policy: config.retention.clone(),
            max_size_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Creates a fresh holding directory inside the quarantine root so that
    /// archiving is a same-filesystem rename.
    pub fn prepare_holding(&self) -> Result<HoldingArea, AppError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            AppError::Quarantine(format!("cannot create quarantine root {:?}: {}", self.root, e))
        })?;
        let _ = fs::set_permissions(&self.root, fs::Permissions::from_mode(ROOT_MODE));

        let dir = tempfile::Builder::new()
            .prefix(HOLDING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| {
                AppError::Quarantine(format!(
                    "cannot create holding directory in {:?}: {}",
                    self.root, e
                ))
            })?;

        log::debug!("holding directory ready: {:?}", dir.path());
        Ok(HoldingArea { dir })
    }

    /// Moves every file in `holding` into this month's archive directory.
    ///
    /// Failing to create the month directory aborts; a file that cannot be
    /// moved is logged and counted while the rest continue.
    pub fn archive(&self, holding: &Path, now: DateTime<Local>) -> Result<ArchiveOutcome, AppError> {
        let mut outcome = ArchiveOutcome::default();

        let pending: Vec<PathBuf> = walkdir::WalkDir::new(holding)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("cannot read holding entry: {}", e);
                    outcome.failed += 1;
                    None
                }
            })
            .collect();

        if pending.is_empty() {
            return Ok(outcome);
        }

        let month_dir = self.root.join(now.format("%Y-%m").to_string());
        fs::create_dir_all(&month_dir).map_err(|e| {
            AppError::Quarantine(format!("cannot create archive directory {:?}: {}", month_dir, e))
        })?;

        let timestamp = now.timestamp();
        for src in pending {
            match self.archive_one(&src, &month_dir, timestamp) {
                Ok(entry) => {
                    log::info!("quarantined {:?} as {:?}", entry.original_name, entry.path);
                    outcome.archived.push(entry);
                }
                Err(e) => {
                    log::warn!("failed to quarantine {:?}: {}", src, e);
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn archive_one(&self, src: &Path, month_dir: &Path, timestamp: i64) -> io::Result<QuarantineEntry> {
        let original_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no name"))?;

        let dest = unique_destination(month_dir, &original_name, timestamp);
        move_file(src, &dest)?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(ARCHIVE_MODE))?;

        QuarantineEntry::load(dest, self.risk_level, &self.policy)
    }

    /// Archived entries, oldest first.
    pub fn entries(&self) -> Vec<QuarantineEntry> {
        let mut entries = Vec::new();

        let months = match fs::read_dir(&self.root) {
            Ok(months) => months,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return entries,
            Err(e) => {
                log::warn!("cannot list quarantine root {:?}: {}", self.root, e);
                return entries;
            }
        };

        for month in months.filter_map(|m| m.ok()) {
            let name = month.file_name();
            if !is_month_dir(&name.to_string_lossy()) || !month.path().is_dir() {
                continue;
            }
            let files = match fs::read_dir(month.path()) {
                Ok(files) => files,
                Err(e) => {
                    log::warn!("cannot list {:?}: {}", month.path(), e);
                    continue;
                }
            };
            for file in files.filter_map(|f| f.ok()) {
                if !file.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                match QuarantineEntry::load(file.path(), self.risk_level, &self.policy) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => log::warn!("skipping unreadable entry {:?}: {}", file.path(), e),
                }
            }
        }

        entries.sort_by(|a, b| {
            a.quarantined_at
                .cmp(&b.quarantined_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        entries
    }

    /// Deletes entries past their retention, then evicts the oldest entries
    /// until the archive fits under the size cap.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let days = self.policy.days_for(self.risk_level).unwrap_or(0);

        let mut kept = Vec::new();
        for entry in self.entries() {
            if !RetentionPolicy::is_expired(days, entry.age_days(now)) {
                kept.push(entry);
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    log::info!(
                        "expired {:?} after {} days (retention {}d)",
                        entry.path,
                        entry.age_days(now),
                        days
                    );
                    outcome.expired += 1;
                }
                Err(e) => {
                    log::warn!("cannot expire {:?}: {}", entry.path, e);
                    outcome.failed += 1;
                    kept.push(entry);
                }
            }
        }

        let mut total: u64 = kept.iter().map(|e| e.size).sum();
        if self.max_size_bytes > 0 {
            for entry in &kept {
                if total <= self.max_size_bytes {
                    break;
                }
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        log::info!("evicted {:?} to honor the quarantine size cap", entry.path);
                        total -= entry.size;
                        outcome.evicted += 1;
                    }
                    Err(e) => {
                        log::warn!("cannot evict {:?}: {}", entry.path, e);
                        outcome.failed += 1;
                    }
                }
            }
        }
        outcome.remaining_bytes = total;

        self.prune_empty_months();
        outcome
    }

    fn prune_empty_months(&self) {
        let Ok(months) = fs::read_dir(&self.root) else { return };
        for month in months.filter_map(|m| m.ok()) {
            if !is_month_dir(&month.file_name().to_string_lossy()) {
                continue;
            }
            // remove_dir only succeeds on empty directories
            let _ = fs::remove_dir(month.path());
        }
    }
}

fn unique_destination(dir: &Path, original_name: &str, timestamp: i64) -> PathBuf {
    let mut ts = timestamp;
    loop {
        let candidate = dir.join(archive_name(original_name, ts));
        if !candidate.exists() {
            return candidate;
        }
        ts += 1;
    }
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => copy_then_remove(src, dst),
    }
}

/// Cross-device fallback. The copy is locked down before the source goes, and
/// a source that cannot be removed still leaves a valid archive entry.
fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    if let Err(e) = fs::set_permissions(dst, fs::Permissions::from_mode(ARCHIVE_MODE)) {
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(src) {
        log::warn!("archived a copy of {:?} but could not remove the original: {}", src, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(root: &Path, risk_level: RiskLevel, max_size_mb: u64) -> QuarantineManager {
        QuarantineManager::new(&QuarantineConfig {
            enabled: true,
            dir: root.to_path_buf(),
            max_size_mb,
            risk_level,
            retention: RetentionPolicy::default(),
        })
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn place_entry(root: &Path, month: &str, name: &str, ts: i64, size: usize) -> PathBuf {
        let dir = root.join(month);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(archive_name(name, ts));
        fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    #[test]
    fn test_archive_moves_into_month_dir_with_owner_only_mode() {
        let root = TempDir::new().unwrap();
        let qm = manager(root.path(), RiskLevel::Medium, 0);
        let holding = qm.prepare_holding().unwrap();
        fs::write(holding.path().join("eicar.com"), b"X5O!").unwrap();

        let now = fixed_now();
        let outcome = qm.archive(holding.path(), now).unwrap();

        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.archived.len(), 1);
        let entry = &outcome.archived[0];
        assert_eq!(entry.original_name, "eicar.com");
        assert_eq!(
            entry.path,
            root.path()
                .join("2026-03")
                .join(format!("eicar.com_{}", now.timestamp()))
        );
        let mode = fs::metadata(&entry.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!holding.path().join("eicar.com").exists());
    }

    #[test]
    fn test_copy_fallback_locks_down_archive_before_removing_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("eicar.com");
        let dst = dir.path().join("eicar.com_1");
        fs::write(&src, b"X5O!").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o644)).unwrap();

        copy_then_remove(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"X5O!");
        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_copy_fallback_failure_leaves_source_alone() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("eicar.com");
        fs::write(&src, b"X5O!").unwrap();

        let dst = dir.path().join("missing").join("eicar.com_1");
        assert!(copy_then_remove(&src, &dst).is_err());
        assert!(src.exists());
    }

    #[test]
    fn test_same_basename_twice_never_collides() {
        let root = TempDir::new().unwrap();
        let qm = manager(root.path(), RiskLevel::Medium, 0);
        let now = fixed_now();

        for _ in 0..2 {
            let holding = qm.prepare_holding().unwrap();
            fs::write(holding.path().join("a.txt"), b"bad").unwrap();
            qm.archive(holding.path(), now).unwrap();
        }

        let names: Vec<String> = fs::read_dir(root.path().join("2026-03"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.starts_with("a.txt_")));
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn test_archive_dir_failure_is_fatal() {
        let scratch = TempDir::new().unwrap();
        let holding = TempDir::new().unwrap();
        fs::write(holding.path().join("bad.bin"), b"bad").unwrap();
        let not_a_dir = scratch.path().join("root");
        fs::write(&not_a_dir, b"").unwrap();

        let qm = manager(&not_a_dir, RiskLevel::Medium, 0);
        let err = qm.archive(holding.path(), fixed_now()).unwrap_err();
        assert!(matches!(err, AppError::Quarantine(_)));
        assert_eq!(err.exit_code(), 40);
    }

    #[test]
    fn test_empty_holding_creates_nothing() {
        let root = TempDir::new().unwrap();
        let qm = manager(root.path(), RiskLevel::Medium, 0);
        let holding = qm.prepare_holding().unwrap();
        let outcome = qm.archive(holding.path(), fixed_now()).unwrap();
        assert!(outcome.archived.is_empty());
        assert!(!root.path().join("2026-03").exists());
    }

    #[test]
    fn test_prepare_holding_fails_under_a_file() {
        let scratch = TempDir::new().unwrap();
        let file = scratch.path().join("plain");
        fs::write(&file, b"").unwrap();
        let qm = manager(&file.join("q"), RiskLevel::Medium, 0);
        assert!(matches!(qm.prepare_holding(), Err(AppError::Quarantine(_))));
    }

    #[test]
    fn test_critical_entries_never_expire() {
        let root = TempDir::new().unwrap();
        let ancient = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap().timestamp();
        let path = place_entry(root.path(), "2001-01", "old.exe", ancient, 4);

        let qm = manager(root.path(), RiskLevel::Critical, 0);
        let outcome = qm.sweep(Utc::now());

        assert_eq!(outcome.expired, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_entries_expire_once_older_than_retention() {
        let root = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        // low retention is 30 days
        let at_limit = place_entry(
            root.path(),
            "2026-02",
            "edge.doc",
            (now - ChronoDuration::days(30)).timestamp(),
            4,
        );
        let past_limit = place_entry(
            root.path(),
            "2026-02",
            "stale.doc",
            (now - ChronoDuration::days(31)).timestamp(),
            4,
        );

        let qm = manager(root.path(), RiskLevel::Low, 0);
        let outcome = qm.sweep(now);

        assert_eq!(outcome.expired, 1);
        assert!(at_limit.exists());
        assert!(!past_limit.exists());
    }

    #[test]
    fn test_size_cap_evicts_oldest_first() {
        let root = TempDir::new().unwrap();
        let now = Utc::now();
        let mb = 1024 * 1024;
        let oldest = place_entry(root.path(), "2026-01", "one", now.timestamp() - 300, mb);
        let middle = place_entry(root.path(), "2026-01", "two", now.timestamp() - 200, mb);
        let newest = place_entry(root.path(), "2026-01", "three", now.timestamp() - 100, mb);

        let qm = manager(root.path(), RiskLevel::Critical, 2);
        let outcome = qm.sweep(now);

        assert_eq!(outcome.evicted, 1);
        assert_eq!(outcome.remaining_bytes, 2 * mb as u64);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_zero_size_cap_is_disabled() {
        let root = TempDir::new().unwrap();
        let now = Utc::now();
        place_entry(root.path(), "2026-01", "big", now.timestamp(), 2 * 1024 * 1024);

        let qm = manager(root.path(), RiskLevel::Critical, 0);
        assert_eq!(qm.sweep(now).evicted, 0);
    }

    #[test]
    fn test_sweep_ignores_holding_dirs_and_prunes_empty_months() {
        let root = TempDir::new().unwrap();
        let qm = manager(root.path(), RiskLevel::Low, 0);
        let holding = qm.prepare_holding().unwrap();
        fs::write(holding.path().join("pending.bin"), b"x").unwrap();

        let now = Utc::now();
        let old = (now - ChronoDuration::days(400)).timestamp();
        place_entry(root.path(), "2025-01", "gone.bin", old, 1);

        let outcome = qm.sweep(now);
        assert_eq!(outcome.expired, 1);
        assert!(!root.path().join("2025-01").exists());
        assert!(holding.path().join("pending.bin").exists());
    }

    #[test]
    fn test_entry_metadata_from_archive_name() {
        let root = TempDir::new().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        place_entry(root.path(), "2026-01", "my_file.txt", at.timestamp(), 3);

        let qm = manager(root.path(), RiskLevel::High, 0);
        let entries = qm.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].original_name, "my_file.txt");
        assert_eq!(entries[0].quarantined_at, at);
        assert_eq!(entries[0].size, 3);
        assert_eq!(
            entries[0].retention_deadline,
            Some(at + ChronoDuration::days(180))
        );
    }

    #[test]
    fn test_huge_retention_means_no_deadline() {
        let root = TempDir::new().unwrap();
        let qm = QuarantineManager::new(&QuarantineConfig {
            enabled: true,
            dir: root.path().to_path_buf(),
            max_size_mb: 0,
            risk_level: RiskLevel::High,
            retention: RetentionPolicy::new([(RiskLevel::High, 100_000_000)]),
        });
        let holding = qm.prepare_holding().unwrap();
        fs::write(holding.path().join("one.bin"), b"1").unwrap();
        fs::write(holding.path().join("two.bin"), b"2").unwrap();

        let outcome = qm.archive(holding.path(), fixed_now()).unwrap();
        assert_eq!(outcome.archived.len(), 2);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.archived.iter().all(|e| e.retention_deadline.is_none()));
        assert_eq!(qm.sweep(Utc::now()).expired, 0);
    }

    #[test]
    fn test_month_dir_names() {
        assert!(is_month_dir("2026-03"));
        assert!(!is_month_dir(".holding-abc"));
        assert!(!is_month_dir("2026-3"));
    }
}
