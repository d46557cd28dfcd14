use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

const SCANNED_LABEL: &str = "Scanned files:";
const INFECTED_LABEL: &str = "Infected files:";
const ENGINE_LABEL: &str = "Engine version:";

static DETECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<path>.+): (?P<label>\S.*) FOUND$").expect("valid detection regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: u64,
    pub infected: u64,
    pub engine_version: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub path: PathBuf,
    pub label: String,
}

/// Pulls the summary counts out of captured engine output. Counts that are
/// missing or not non-negative integers become 0 with a warning.
pub fn parse_summary(output: &str) -> ScanSummary {
    let mut scanned = None;
    let mut infected = None;
    let mut engine_version = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(SCANNED_LABEL) {
            scanned = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(INFECTED_LABEL) {
            infected = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(ENGINE_LABEL) {
            engine_version = Some(rest.trim().to_string());
        }
    }

    let mut warnings = Vec::new();
    let scanned = parse_count(SCANNED_LABEL, scanned, &mut warnings);
    let infected = parse_count(INFECTED_LABEL, infected, &mut warnings);

    for warning in &warnings {
        log::warn!("{}", warning);
    }

    ScanSummary {
        scanned,
        infected,
        engine_version,
        warnings,
    }
}

fn parse_count(label: &str, raw: Option<String>, warnings: &mut Vec<String>) -> u64 {
    match raw {
        Some(raw) => match raw.parse::<u64>() {
            Ok(count) => count,
            Err(_) => {
                warnings.push(format!("unparseable '{}' value {:?}, using 0", label, raw));
                0
            }
        },
        None => {
            warnings.push(format!("no '{}' line in scanner output, using 0", label));
            0
        }
    }
}

/// Every `<path>: <label> FOUND` line, in output order.
pub fn parse_detections(output: &str) -> Vec<Detection> {
    output
        .lines()
        .filter_map(|line| DETECTION_LINE.captures(line.trim_end()))
        .map(|caps| Detection {
            path: PathBuf::from(&caps["path"]),
            label: caps["label"].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "\
/home/u/Downloads/eicar.com: Eicar-Test-Signature FOUND
/home/u/Downloads/eicar.com: moved to '/q/.holding-x/eicar.com'
/home/u/odd: name.zip: Win.Trojan.Agent-1 FOUND

----------- SCAN SUMMARY -----------
Known viruses: 8698654
Engine version: 1.0.3
Scanned directories: 12
Scanned files: 345
Infected files: 2
Data scanned: 10.40 MB
Time: 12.003 sec (0 m 12 s)
";

    #[test]
    fn test_summary_counts() {
        let summary = parse_summary(SAMPLE);
        assert_eq!(summary.scanned, 345);
        assert_eq!(summary.infected, 2);
        assert_eq!(summary.engine_version.as_deref(), Some("1.0.3"));
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn test_bad_count_defaults_to_zero_with_warning() {
        let summary = parse_summary("Scanned files: many\nInfected files: -1\n");
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.infected, 0);
        assert_eq!(summary.warnings.len(), 2);
    }

    #[test]
    fn test_missing_summary_warns() {
        let summary = parse_summary("LibClamAV Error: cl_load(): No such file\n");
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.warnings.len(), 2);
    }

    #[test]
    fn test_detections_use_trailing_found_suffix() {
        let detections = parse_detections(SAMPLE);
        assert_eq!(
            detections,
            vec![
                Detection {
                    path: PathBuf::from("/home/u/Downloads/eicar.com"),
                    label: "Eicar-Test-Signature".to_string(),
                },
                Detection {
                    path: PathBuf::from("/home/u/odd: name.zip"),
                    label: "Win.Trojan.Agent-1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_no_detections_in_clean_output() {
        assert!(parse_detections("Scanned files: 3\nInfected files: 0\n").is_empty());
    }

    proptest! {
        #[test]
        fn prop_parse_summary_never_panics(input in ".{0,200}") {
            let summary = parse_summary(&input);
            prop_assert!(summary.warnings.len() <= 2);
        }

        #[test]
        fn prop_counts_round_trip(scanned in 0u64..u64::MAX, infected in 0u64..1_000_000) {
            let text = format!("Scanned files: {}\nInfected files: {}\n", scanned, infected);
            let summary = parse_summary(&text);
            prop_assert_eq!(summary.scanned, scanned);
            prop_assert_eq!(summary.infected, infected);
        }
    }
}
