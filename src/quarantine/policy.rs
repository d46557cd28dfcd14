use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest retention accepted from configuration (about 10,000 years).
pub const MAX_RETENTION_DAYS: u32 = 3_650_000;

/// Retention days per risk level. A value of 0 keeps entries forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionPolicy(BTreeMap<RiskLevel, u32>);

impl RetentionPolicy {
    pub fn new(days: impl IntoIterator<Item = (RiskLevel, u32)>) -> Self {
        Self(days.into_iter().collect())
    }

    pub fn days_for(&self, level: RiskLevel) -> Option<u32> {
        self.0.get(&level).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskLevel, u32)> + '_ {
        self.0.iter().map(|(level, days)| (*level, *days))
    }

    /// `true` once an entry of `age_days` has outlived a retention of `days`.
    pub fn is_expired(days: u32, age_days: i64) -> bool {
        days > 0 && age_days > i64::from(days)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new([
            (RiskLevel::Low, 30),
            (RiskLevel::Medium, 90),
            (RiskLevel::High, 180),
            (RiskLevel::Critical, 0),
        ])
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(level, days)| match days {
                0 => format!("{}=never", level),
                d => format!("{}={}d", level, d),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_retention_never_expires() {
        assert!(!RetentionPolicy::is_expired(0, 0));
        assert!(!RetentionPolicy::is_expired(0, 100_000));
    }

    #[test]
    fn test_expiry_is_strictly_after_retention_days() {
        assert!(!RetentionPolicy::is_expired(30, 29));
        assert!(!RetentionPolicy::is_expired(30, 30));
        assert!(RetentionPolicy::is_expired(30, 31));
    }

    #[test]
    fn test_default_policy_covers_every_level() {
        let policy = RetentionPolicy::default();
        for level in RiskLevel::ALL {
            assert!(policy.days_for(level).is_some(), "missing {}", level);
        }
    }

    #[test]
    fn test_display_marks_never() {
        let rendered = RetentionPolicy::default().to_string();
        assert_eq!(rendered, "low=30d, medium=90d, high=180d, critical=never");
    }

    #[test]
    fn test_yaml_map_form() {
        let policy: RetentionPolicy = serde_yaml::from_str("low: 1\ncritical: 0\n").unwrap();
        assert_eq!(policy.days_for(RiskLevel::Low), Some(1));
        assert_eq!(policy.days_for(RiskLevel::Medium), None);
    }
}
