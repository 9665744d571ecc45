//! Agent binary resolution.

use std::env;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Resolve `program` to an absolute path of an executable file.
///
/// A value containing a path separator is taken as a path (relative paths
/// are resolved against the current directory); a bare name is searched on
/// `PATH`.
///
/// # Errors
///
/// - `AppError::Spawn("agent binary not found: …")` if nothing matches.
/// - `AppError::Spawn("agent binary not executable: …")` if the file exists
///   but cannot be executed.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let trimmed = program.trim();
    if trimmed.is_empty() {
        return Err(AppError::Spawn("agent binary not found: empty program".into()));
    }

    let candidate = Path::new(trimmed);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            env::current_dir()
                .map_err(|e| AppError::Spawn(format!("cannot resolve relative path {trimmed}: {e}")))?
                .join(candidate)
        };
        return check_executable(&absolute);
    }

    let mut not_executable = None;
    for dir in env::split_paths(&env::var_os("PATH").unwrap_or_default()) {
        for name in candidate_names(trimmed) {
            let path = dir.join(&name);
            if !path.is_file() {
                continue;
            }
            match check_executable(&path) {
                Ok(found) => return Ok(found),
                Err(e) => {
                    not_executable.get_or_insert(e);
                }
            }
        }
    }

    Err(not_executable
        .unwrap_or_else(|| AppError::Spawn(format!("agent binary not found: {trimmed}"))))
}

fn check_executable(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(AppError::Spawn(format!(
            "agent binary not found: {}",
            path.display()
        )));
    }
    if !path.is_file() || !is_executable(path) {
        return Err(AppError::Spawn(format!(
            "agent binary not executable: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(windows)]
fn candidate_names(name: &str) -> Vec<String> {
    if Path::new(name).extension().is_some() {
        return vec![name.to_owned()];
    }
    ["", ".exe", ".cmd", ".bat"]
        .iter()
        .map(|ext| format!("{name}{ext}"))
        .collect()
}

#[cfg(not(windows))]
fn candidate_names(name: &str) -> Vec<String> {
    vec![name.to_owned()]
}
