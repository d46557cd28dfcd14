use crate::error::AppError;
use crate::utils::is_executable;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolves the engine binary, either as given or through `PATH`.
pub fn locate_binary(binary: &Path) -> Result<PathBuf, AppError> {
    locate_binary_in(binary, std::env::var_os("PATH").as_deref())
}

fn locate_binary_in(binary: &Path, path_var: Option<&std::ffi::OsStr>) -> Result<PathBuf, AppError> {
    let missing = || AppError::MissingDependency(format!("{} (install ClamAV)", binary.display()));

    if binary.components().count() > 1 || binary.is_absolute() {
        return if is_executable(binary) {
            Ok(binary.to_path_buf())
        } else {
            Err(missing())
        };
    }

    let path_var = path_var.ok_or_else(missing)?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(missing)
}

/// Creates `dir` (applying `mode` when given) and proves it is writable.
pub fn ensure_writable_dir(dir: &Path, mode: Option<u32>) -> Result<(), AppError> {
    let denied = |e: io::Error| AppError::Permission(format!("{:?} is not writable: {}", dir, e));

    fs::create_dir_all(dir).map_err(denied)?;
    if let Some(mode) = mode {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode)).map_err(denied)?;
    }
    tempfile::tempfile_in(dir).map_err(denied)?;
    Ok(())
}

/// Fails when the volume holding `path` has less than `required_mb` free.
/// A requirement of 0 disables the check; an unreadable volume is only logged.
pub fn check_free_space(path: &Path, required_mb: u64) -> Result<(), AppError> {
    if required_mb == 0 {
        return Ok(());
    }

    let stats = match nix::sys::statvfs::statvfs(path) {
        Ok(stats) => stats,
        Err(e) => {
            log::warn!("cannot check free space on {:?}: {}", path, e);
            return Ok(());
        }
    };

    let available_mb =
        (stats.blocks_available() as u64).saturating_mul(stats.fragment_size() as u64) / (1024 * 1024);
    log::debug!("{:?}: {} MB free", path, available_mb);

    if available_mb < required_mb {
        return Err(AppError::LowDiskSpace {
            path: path.to_path_buf(),
            available_mb,
            required_mb,
        });
    }
    Ok(())
}
