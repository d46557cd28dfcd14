use crate::config::NotificationConfig;
use std::process::Stdio;
use tokio::process::Command;

/// Desktop notification through `notify-send` (or the configured command).
/// Failures never affect the run.
pub async fn send(config: &NotificationConfig, title: &str, body: &str) -> bool {
    if !config.enabled {
        return false;
    }

    let result = Command::new(&config.command)
        .arg("--app-name=avscan")
        .arg(title)
        .arg(body)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            log::debug!("notification command exited with {}", status);
            false
        }
        Err(e) => {
            log::debug!("notification unavailable ({}): {}", config.command, e);
            false
        }
    }
}
