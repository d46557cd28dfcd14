use crate::core::CancelToken;
use crate::error::AppError;
use crate::exclusions::ExclusionSet;
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct Resolution {
    pub targets: Vec<PathBuf>,
    pub skipped: Vec<String>,
    pub used_fallback: bool,
}

/// Turns user or configured path strings into absolute, existing scan targets.
pub struct TargetResolver {
    cwd: PathBuf,
    home: Option<PathBuf>,
}

impl TargetResolver {
    pub fn new(cwd: PathBuf, home: Option<PathBuf>) -> Self {
        Self { cwd, home }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let cwd = std::env::current_dir()
            .map_err(|e| AppError::Config(format!("cannot determine current directory: {}", e)))?;
        Ok(Self::new(cwd, dirs::home_dir()))
    }

    /// Resolves `inputs`, falling back to `defaults`, then to the home
    /// directory. Unresolvable entries are skipped with a warning.
    pub fn resolve(&self, inputs: &[String], defaults: &[String]) -> Result<Resolution, AppError> {
        let mut resolution = Resolution::default();
        self.resolve_into(inputs, &mut resolution);

        if resolution.targets.is_empty() {
            if !inputs.is_empty() {
                log::warn!("no usable scan targets given, using configured defaults");
            }
            resolution.used_fallback = true;
            self.resolve_into(defaults, &mut resolution);
        }

        if resolution.targets.is_empty() {
            match self.home.as_ref().filter(|h| h.is_dir()) {
                Some(home) => {
                    log::info!("no default targets resolved, scanning home directory {:?}", home);
                    resolution.targets.push(home.clone());
                }
                None => {
                    return Err(AppError::Config(
                        "no usable scan targets and no home directory to fall back to".to_string(),
                    ))
                }
            }
        }

        Ok(resolution)
    }

    fn resolve_into(&self, inputs: &[String], resolution: &mut Resolution) {
        for raw in inputs {
            if raw.is_empty() {
                continue;
            }
            match self.resolve_one(raw) {
                Some(path) => resolution.targets.push(path),
                None => {
                    log::warn!("skipping scan target {:?}: no such file or directory", raw);
                    resolution.skipped.push(raw.clone());
                }
            }
        }
    }

    pub fn resolve_one(&self, raw: &str) -> Option<PathBuf> {
        let trimmed = strip_trailing_separators(raw);
        let candidate = Path::new(trimmed);

        let mut attempts = vec![candidate.to_path_buf()];
        if candidate.is_relative() {
            attempts.push(self.cwd.join(candidate));
            if let Some(home) = &self.home {
                attempts.push(home.join(candidate));
            }
        }

        attempts
            .into_iter()
            .map(|path| self.absolute(&path))
            .find(|path| path.is_file() || path.is_dir())
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        path.absolutize_from(&self.cwd)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn strip_trailing_separators(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Counts regular files under `targets` that the exclusion set does not
/// cover. Stops early, returning what it has, once `cancel` fires.
pub fn count_files(targets: &[PathBuf], exclusions: &ExclusionSet, cancel: &CancelToken) -> u64 {
    let mut count = 0;
    for target in targets {
        let walker = walkdir::WalkDir::new(target)
            .follow_links(false)
            .same_file_system(true)
            .into_iter()
            .filter_entry(|entry| !exclusions.matches(entry.path()));

        for entry in walker {
            if cancel.is_cancelled() {
                return count;
            }
            match entry {
                Ok(entry) if entry.file_type().is_file() => count += 1,
                Ok(_) => {}
                Err(e) => log::debug!("count: {}", e),
            }
        }
    }
    count
}
