use crate::error::AppError;
use regex::Regex;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

enum Matcher {
    Regex(Regex),
    Glob(glob::Pattern),
    Literal(String),
}

impl Matcher {
    fn compile(pattern: &str) -> Self {
        if let Ok(re) = Regex::new(pattern) {
            return Matcher::Regex(re);
        }
        match glob::Pattern::new(pattern) {
            Ok(glob) => Matcher::Glob(glob),
            Err(_) => Matcher::Literal(pattern.to_string()),
        }
    }

    fn is_match(&self, path: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(path),
            Matcher::Glob(glob) => glob.matches(path),
            Matcher::Literal(text) => path.contains(text.as_str()),
        }
    }
}

/// Default plus user exclusion patterns, in concatenation order, backed by a
/// transient one-per-line list file that is removed on drop.
pub struct ExclusionSet {
    patterns: Vec<String>,
    invalid: usize,
    matchers: Vec<Matcher>,
    file: NamedTempFile,
}

impl ExclusionSet {
    pub fn build(defaults: &[String], user: &[String]) -> Result<Self, AppError> {
        let mut patterns = Vec::with_capacity(defaults.len() + user.len());
        let mut invalid = 0;

        // Blank patterns are dropped; the rest are kept byte for byte, since
        // leading or trailing spaces can be part of what the user means. A line
        // break cannot be expressed in a one-per-line list.
        for raw in defaults.iter().chain(user.iter()) {
            if raw.trim().is_empty() || raw.contains(['\n', '\r']) {
                invalid += 1;
                continue;
            }
            patterns.push(raw.clone());
        }

        if invalid > 0 {
            log::warn!("dropped {} empty or multi-line exclusion pattern(s)", invalid);
        }

        let mut file = tempfile::Builder::new()
            .prefix("avscan-exclude-")
            .suffix(".lst")
            .tempfile()
            .map_err(|e| AppError::Config(format!("cannot create exclusion list: {}", e)))?;
        for pattern in &patterns {
            writeln!(file, "{}", pattern)
                .map_err(|e| AppError::Config(format!("cannot write exclusion list: {}", e)))?;
        }
        file.flush()
            .map_err(|e| AppError::Config(format!("cannot write exclusion list: {}", e)))?;

        log::debug!(
            "exclusion list {:?} holds {} pattern(s)",
            file.path(),
            patterns.len()
        );

        let matchers = patterns.iter().map(|p| Matcher::compile(p)).collect();
        Ok(Self {
            patterns,
            invalid,
            matchers,
            file,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Local approximation of the engine's exclusion check, used for counting.
    pub fn matches(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.matchers.iter().any(|m| m.is_match(&text))
    }
}
