use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::path::{Path, PathBuf};

pub const LOG_FILE_NAME: &str = "avscan.log";

pub struct Logger;

impl Logger {
    /// Appends to `<log_dir>/avscan.log` at `file_level` and echoes to stderr
    /// at `console_level`.
    pub fn init(
        log_dir: &Path,
        file_level: LevelFilter,
        console_level: LevelFilter,
    ) -> Result<PathBuf, anyhow::Error> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("cannot create log directory {:?}", log_dir))?;

        let log_file = log_dir.join(LOG_FILE_NAME);

        Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}][{}][{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(file_level.max(console_level))
            .chain(
                Dispatch::new().level(file_level).chain(
                    fern::log_file(&log_file)
                        .with_context(|| format!("cannot open log file {:?}", log_file))?,
                ),
            )
            .chain(Dispatch::new().level(console_level).chain(std::io::stderr()))
            .apply()?;

        log::debug!("logging to {:?}", log_file);

        Ok(log_file)
    }

    pub fn get_level_filter(level: &str) -> LevelFilter {
        match level.to_uppercase().as_str() {
            "TRACE" => LevelFilter::Trace,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" | "WARNING" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            "OFF" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    pub fn console_level(verbose: bool, quiet: bool) -> LevelFilter {
        if quiet {
            LevelFilter::Off
        } else if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(Logger::get_level_filter("debug"), LevelFilter::Debug);
        assert_eq!(Logger::get_level_filter("Warning"), LevelFilter::Warn);
        assert_eq!(Logger::get_level_filter("bogus"), LevelFilter::Info);
    }

    #[test]
    fn test_console_level_quiet_wins() {
        assert_eq!(Logger::console_level(true, true), LevelFilter::Off);
        assert_eq!(Logger::console_level(true, false), LevelFilter::Debug);
        assert_eq!(Logger::console_level(false, false), LevelFilter::Warn);
    }
}
