//! Default download directory discovery.

use std::path::{Component, Path, PathBuf};

/// Name scoping the cache directory.
pub const CACHE_NAME: &str = "redis-memory-server";

/// Sub-directory of the cache holding the versions.
pub const BINARIES_DIR: &str = "redis-binaries";

/// Directories, relative to a project root, that may hold a `.cache` directory.
const CACHE_PARENTS: [&str; 2] = ["target", "node_modules"];

/// Files marking a project root.
const PROJECT_MARKERS: [&str; 2] = ["Cargo.toml", "package.json"];

/// `~/.cache/redis-binaries`, used when it already exists.
pub fn legacy_download_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cache").join(BINARIES_DIR))
}

/// Picks the download directory.
///
/// `configured` wins, then `legacy` when it exists, then a cache directory
/// found by [`find_cache_dir`] from `cwd`. Relative configured paths are
/// resolved against `cwd`. The result only depends on the arguments and the
/// filesystem, so repeated calls agree.
pub fn resolve_download_dir(
    configured: Option<&str>,
    legacy: Option<&Path>,
    cwd: &Path,
) -> PathBuf {
    if let Some(dir) = configured.filter(|d| !d.is_empty()) {
        return cwd.join(dir);
    }

    if let Some(legacy) = legacy.filter(|dir| dir.exists()) {
        return legacy.to_path_buf();
    }

    let start = strip_package_nesting(cwd);
    find_cache_dir(CACHE_NAME, &start)
        .unwrap_or_else(|| start.join(".cache").join(CACHE_NAME))
        .join(BINARIES_DIR)
}

/// Finds the name-scoped cache directory for a project.
///
/// Walking up from `start`, the nearest existing `target/.cache/<name>` or
/// `node_modules/.cache/<name>` is reused, so nested projects share a cache
/// that already exists higher in the tree. Otherwise the cache goes under
/// `target/.cache/<name>` of the nearest directory holding a project manifest.
/// Returns `None` when no project is found.
pub fn find_cache_dir(name: &str, start: &Path) -> Option<PathBuf> {
    let mut nearest_project = None;

    for dir in start.ancestors() {
        for parent in CACHE_PARENTS {
            let candidate = dir.join(parent).join(".cache").join(name);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        if nearest_project.is_none() && is_project_root(dir) {
            nearest_project = Some(dir.to_path_buf());
        }
    }

    nearest_project.map(|root| root.join("target").join(".cache").join(name))
}

fn is_project_root(dir: &Path) -> bool {
    PROJECT_MARKERS.iter().any(|marker| dir.join(marker).is_file())
}

/// Steps out of `node_modules/redis-memory-server` when installed as a package.
fn strip_package_nesting(cwd: &Path) -> PathBuf {
    let mut path = cwd.to_path_buf();
    loop {
        let mut components = path.components().rev();
        let is_nested = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(pkg)), Some(Component::Normal(modules)))
                if pkg == CACHE_NAME && modules == "node_modules"
        );
        if !is_nested {
            return path;
        }
        match path.parent().and_then(Path::parent) {
            Some(parent) => path = parent.to_path_buf(),
            None => return path,
        }
    }
}
