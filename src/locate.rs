//! Editor executable resolution.
//!
//! The GUI binary comes from a config override, the Windows registry
//! (`HKLM\SOFTWARE\Vim\Gvim`, value `path`) or, off Windows, the first `gvim`
//! on `PATH`. The console binary used for the `--remote-*` channel is the
//! sibling `vim` in the same directory unless overridden.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::config::EditorConfig;
use crate::error::HarnessError;

#[cfg(windows)]
const GVIM_REGISTRY_KEY: &str = r"SOFTWARE\Vim\Gvim";
#[cfg(windows)]
const GVIM_REGISTRY_VALUE: &str = "path";

#[cfg(windows)]
const GVIM_FILE_NAME: &str = "gvim.exe";
#[cfg(not(windows))]
const GVIM_FILE_NAME: &str = "gvim";

#[cfg(windows)]
const VIM_FILE_NAME: &str = "vim.exe";
#[cfg(not(windows))]
const VIM_FILE_NAME: &str = "vim";

/// Resolved locations of the two editor binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorPaths {
    /// Windowed editor, launched once per run.
    pub gvim: PathBuf,
    /// Console editor, invoked for every channel round trip.
    pub vim: PathBuf,
}

/// Resolve both binaries using the platform lookup for the GUI editor.
pub fn resolve_editor_paths(config: &EditorConfig) -> Result<EditorPaths> {
    resolve_with(config, platform_gvim_lookup)
}

/// Resolve both binaries with an injectable GUI-editor lookup.
///
/// `lookup` is only consulted when the config does not name `gvim`. It returns
/// `Ok(None)` when the platform source has no entry at all.
pub fn resolve_with<F>(config: &EditorConfig, lookup: F) -> Result<EditorPaths>
where
    F: FnOnce() -> Result<Option<PathBuf>>,
{
    let gvim = match &config.gvim {
        Some(path) => path.clone(),
        None => lookup()?.ok_or_else(|| {
            HarnessError::resolution("gvim executable", lookup_source_description())
        })?,
    };
    if !gvim.is_file() {
        return Err(HarnessError::missing_file("gvim executable", &gvim).into());
    }

    let vim = match &config.vim {
        Some(path) => path.clone(),
        None => console_binary_for(&gvim),
    };
    if !vim.is_file() {
        return Err(HarnessError::missing_file("vim console executable", &vim).into());
    }

    debug!(gvim = %gvim.display(), vim = %vim.display(), "editor binaries resolved");
    Ok(EditorPaths { gvim, vim })
}

/// The console binary lives next to the GUI binary.
pub fn console_binary_for(gvim: &Path) -> PathBuf {
    gvim.with_file_name(VIM_FILE_NAME)
}

/// First `name` found in the directories of a `PATH`-style value.
pub fn find_in_search_path(name: &str, search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn lookup_source_description() -> String {
    format!("registry key HKLM\\{GVIM_REGISTRY_KEY} has no '{GVIM_REGISTRY_VALUE}' value")
}

#[cfg(not(windows))]
fn lookup_source_description() -> String {
    format!("no '{GVIM_FILE_NAME}' found on PATH")
}

#[cfg(windows)]
fn platform_gvim_lookup() -> Result<Option<PathBuf>> {
    use winreg::RegKey;
    use winreg::enums::HKEY_LOCAL_MACHINE;

    let key = match RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(GVIM_REGISTRY_KEY) {
        Ok(key) => key,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(HarnessError::resolution(
                "gvim executable",
                format!("failed to open HKLM\\{GVIM_REGISTRY_KEY}: {e}"),
            )
            .into());
        }
    };

    match key.get_value::<String, _>(GVIM_REGISTRY_VALUE) {
        Ok(path) => Ok(Some(PathBuf::from(path))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HarnessError::resolution(
            "gvim executable",
            format!("failed to read HKLM\\{GVIM_REGISTRY_KEY}\\{GVIM_REGISTRY_VALUE}: {e}"),
        )
        .into()),
    }
}

#[cfg(not(windows))]
fn platform_gvim_lookup() -> Result<Option<PathBuf>> {
    Ok(std::env::var_os("PATH").and_then(|path| find_in_search_path(GVIM_FILE_NAME, &path)))
}
