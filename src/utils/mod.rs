pub mod logging;

use std::path::Path;
use sysinfo::System;

pub fn get_current_user() -> String {
    users::get_current_username()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("uid {}", users::get_current_uid()))
}

pub fn get_host_name() -> String {
    System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

/// e.g. "Linux 22.04 Ubuntu (kernel 6.5.0-14-generic)"
pub fn get_os_fingerprint() -> String {
    let os = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    match System::kernel_version() {
        Some(kernel) => format!("{} (kernel {})", os, kernel),
        None => os,
    }
}

pub fn format_bytes(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, units[unit_index])
}

pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
