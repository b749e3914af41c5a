//! Discovery of a usable symbolizer tool on `PATH`.

use crate::config::ToolSpec;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Tools this crate knows how to drive, in preference order.
const KNOWN_TOOLS: [&str; 3] = ["llvm-symbolizer", "addr2line", "atos"];

/// Build a [`ToolSpec`] for the first known symbolizer tool found on `PATH`.
///
/// # Errors
///
/// Fails when none of the known tools is installed; the message names what
/// was tried and how to fix it.
pub fn default_tool() -> Result<ToolSpec> {
    for name in KNOWN_TOOLS {
        if let Ok(path) = find_in_path(name) {
            return Ok(spec_for(name, path));
        }
    }
    bail!(
        "No symbolizer tool found on PATH (tried: {}).\n\
         Install llvm-symbolizer or binutils addr2line, or point\n\
         ToolSpec::path at a tool directly.",
        KNOWN_TOOLS.join(", ")
    )
}

/// Find an executable called `name` on `PATH`.
///
/// # Errors
///
/// Fails when `PATH` is unset or no directory on it holds an executable
/// file with that name.
pub fn find_in_path(name: &str) -> Result<PathBuf> {
    let path_var = env::var_os("PATH").context("PATH is not set")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    bail!("No executable '{name}' on PATH")
}

fn spec_for(name: &str, path: PathBuf) -> ToolSpec {
    match name {
        "atos" => ToolSpec::atos(path),
        "addr2line" => ToolSpec::addr2line(path),
        _ => ToolSpec::llvm_symbolizer(path),
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
