//! Path helpers for data directories written in configuration files.
//!
//! Configuration files tend to carry paths like `~/work/other/n_trade`; these
//! helpers expand the home directory and let an environment variable point a
//! run at a different data directory without editing the file.

use std::path::{Path, PathBuf};

use crate::env::non_empty_env_var;

/// Environment variable that overrides the configured data directory.
pub const DATA_DIR_ENV: &str = "TRADE_PANEL_DATA_DIR";

/// Expands a leading `~` using `HOME`.
///
/// Paths without a leading `~` are returned unchanged, as are all paths when
/// `HOME` is not set.
pub fn expand_home(path: &str) -> PathBuf {
    let home = non_empty_env_var("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

/// Resolves the directory that relative input paths are read from.
///
/// Precedence: [`DATA_DIR_ENV`], then `configured`, then the current directory.
pub fn resolve_data_dir(configured: Option<&str>) -> PathBuf {
    if let Some(dir) = non_empty_env_var(DATA_DIR_ENV) {
        return expand_home(&dir);
    }
    configured
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(expand_home)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Joins `path` onto `base` unless it is absolute once `~` is expanded.
pub fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
