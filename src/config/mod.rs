use crate::quarantine::policy::MAX_RETENTION_DAYS;
use crate::quarantine::{RetentionPolicy, RiskLevel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/avscan/config.yaml";
pub const ENV_PREFIX: &str = "AVSCAN_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub scan: ScanConfig,
    pub quarantine: QuarantineConfig,
    pub logging: LoggingConfig,
    pub report: ReportConfig,
    pub notifications: NotificationConfig,
    pub preflight: PreflightConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub binary: PathBuf,
    pub max_file_size_mb: u64,
    pub max_scan_size_mb: u64,
    /// Directories never handed to the engine (kernel and device pseudo-filesystems).
    pub pseudo_filesystems: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub default_targets: Vec<String>,
    pub quick_targets: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Aggregate size cap for archived entries; 0 disables the cap.
    pub max_size_mb: u64,
    /// Classification applied to every archived entry.
    pub risk_level: RiskLevel,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Minimum free space on the quarantine and log volumes; 0 disables the check.
    pub min_free_space_mb: u64,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("avscan")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            scan: ScanConfig::default(),
            quarantine: QuarantineConfig::default(),
            logging: LoggingConfig::default(),
            report: ReportConfig::default(),
            notifications: NotificationConfig::default(),
            preflight: PreflightConfig::default(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("clamscan"),
            max_file_size_mb: 100,
            max_scan_size_mb: 400,
            pseudo_filesystems: vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/dev"),
                PathBuf::from("/run"),
            ],
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_targets: Vec::new(),
            quick_targets: vec![
                "~/Downloads".to_string(),
                "~/Desktop".to_string(),
                "/tmp".to_string(),
            ],
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: data_dir().join("quarantine"),
            max_size_mb: 1024,
            risk_level: RiskLevel::Medium,
            retention: RetentionPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: data_dir().join("logs"),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "notify-send".to_string(),
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_free_space_mb: 100,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        ConfigLoader::empty().with_layer(path, true).load()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config {:?}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.binary.as_os_str().is_empty() {
            anyhow::bail!("scanner.binary must not be empty");
        }
        if self.scanner.max_file_size_mb == 0 {
            anyhow::bail!("scanner.max_file_size_mb must be a positive number of MB");
        }
        if self.scanner.max_scan_size_mb == 0 {
            anyhow::bail!("scanner.max_scan_size_mb must be a positive number of MB");
        }
        for (level, days) in self.quarantine.retention.iter() {
            if days > MAX_RETENTION_DAYS {
                anyhow::bail!(
                    "quarantine.retention.{} is {} days; use 0 to keep entries forever (max {})",
                    level,
                    days,
                    MAX_RETENTION_DAYS
                );
            }
        }
        if self.quarantine.retention.days_for(self.quarantine.risk_level).is_none() {
            anyhow::bail!(
                "quarantine.retention has no entry for risk level '{}'",
                self.quarantine.risk_level
            );
        }
        Ok(())
    }

    fn expand_home(&mut self, home: Option<&Path>) {
        let Some(home) = home else { return };

        for path in [
            &mut self.scanner.binary,
            &mut self.quarantine.dir,
            &mut self.logging.log_dir,
        ] {
            if let Some(expanded) = expand_tilde(&path.to_string_lossy(), home) {
                *path = PathBuf::from(expanded);
            }
        }

        for target in self
            .scan
            .default_targets
            .iter_mut()
            .chain(self.scan.quick_targets.iter_mut())
        {
            if let Some(expanded) = expand_tilde(target, home) {
                *target = expanded;
            }
        }
    }
}

fn expand_tilde(raw: &str, home: &Path) -> Option<String> {
    if raw == "~" {
        return Some(home.to_string_lossy().into_owned());
    }
    raw.strip_prefix("~/")
        .map(|rest| home.join(rest).to_string_lossy().into_owned())
}

/// Merges configuration layers: built-in defaults, then each YAML file in
/// order, then `AVSCAN_<SECTION>__<KEY>` environment overrides.
pub struct ConfigLoader {
    layers: Vec<(PathBuf, bool)>,
    env: Vec<(String, String)>,
    home: Option<PathBuf>,
}

impl ConfigLoader {
    /// System-wide file, the user's file, and the process environment.
    pub fn new() -> Self {
        let mut loader = Self::empty().with_layer(SYSTEM_CONFIG_PATH, false);
        if let Some(config_dir) = dirs::config_dir() {
            loader = loader.with_layer(config_dir.join("avscan").join("config.yaml"), false);
        }
        loader.with_env(env_overrides(std::env::vars_os()))
    }

    pub fn empty() -> Self {
        Self {
            layers: Vec::new(),
            env: Vec::new(),
            home: dirs::home_dir(),
        }
    }

    /// Adds a file layer. Missing optional layers are skipped; a missing
    /// required layer fails the load.
    pub fn with_layer(mut self, path: impl Into<PathBuf>, required: bool) -> Self {
        self.layers.push((path.into(), required));
        self
    }

    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(
            vars.into_iter()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX)),
        );
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn load(&self) -> Result<Config> {
        let mut merged = serde_yaml::to_value(Config::default())?;

        for (path, required) in &self.layers {
            if !path.exists() {
                if *required {
                    anyhow::bail!("config file {:?} does not exist", path);
                }
                continue;
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {:?}", path))?;
            let layer: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config {:?}", path))?;
            // An empty file parses as null and contributes nothing.
            if !layer.is_null() {
                merge_values(&mut merged, layer);
            }
        }

        for (key, raw) in &self.env {
            apply_env_override(&mut merged, key, raw);
        }

        let mut config: Config =
            serde_yaml::from_value(merged).context("invalid configuration values")?;
        config.expand_home(self.home.as_deref());
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `AVSCAN_*` variables from a raw environment. Other variables are never
/// decoded; an override whose value is not UTF-8 is skipped with a warning.
fn env_overrides<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let key = key.into_string().ok()?;
            if !key.starts_with(ENV_PREFIX) {
                return None;
            }
            match value.into_string() {
                Ok(value) => Some((key, value)),
                Err(_) => {
                    log::warn!("ignoring {}: value is not valid UTF-8", key);
                    None
                }
            }
        })
        .collect()
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_override(root: &mut Value, key: &str, raw: &str) {
    let Some(path) = key.strip_prefix(ENV_PREFIX) else { return };
    let segments: Vec<String> = path.split("__").map(|s| s.to_lowercase()).collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return;
    }

    let value = if raw.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    };

    let mut cursor = root;
    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_mapping() {
            *cursor = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = cursor else { return };
        cursor = map
            .entry(Value::String(segment.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    if !cursor.is_mapping() {
        *cursor = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = cursor {
        if let Some(last) = segments.last() {
            map.insert(Value::String(last.clone()), value);
        }
    }
}
