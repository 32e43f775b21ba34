//! Interpreter discovery.

use crate::config::InterpreterConfig;
use crate::error::{ScriptError, ScriptResult};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve the interpreter executable for `config`.
///
/// An explicit executable wins as is. Otherwise each candidate is looked up
/// on `PATH`; candidates containing a `/` are taken as paths.
pub fn resolve(config: &InterpreterConfig) -> ScriptResult<PathBuf> {
    if let Some(executable) = &config.executable {
        return Ok(executable.clone());
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    resolve_in(&config.candidates, &path_var)
}

/// Resolve `candidates` against an explicit `PATH` value.
pub fn resolve_in(candidates: &[String], path_var: &OsStr) -> ScriptResult<PathBuf> {
    for candidate in candidates {
        if candidate.contains('/') {
            let path = PathBuf::from(candidate);
            if is_executable(&path) {
                return Ok(path);
            }
            continue;
        }
        if let Some(found) = std::env::split_paths(path_var)
            .map(|dir| dir.join(candidate))
            .find(|path| is_executable(path))
        {
            debug!(interpreter = %found.display(), "interpreter resolved");
            return Ok(found);
        }
    }
    Err(ScriptError::InterpreterNotFound {
        candidates: candidates.join(", "),
    })
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
