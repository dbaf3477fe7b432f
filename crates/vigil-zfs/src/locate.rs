//! Finds the storage tools on the host. Results are memoized per locator
//! instance; nothing is cached process-wide.

use crate::command::{CancelToken, CommandRunner};
use log::debug;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Directories probed, in order, before falling back to `$PATH`.
pub const DEFAULT_SEARCH_DIRS: &[&str] = &[
    "/sbin",
    "/usr/sbin",
    "/usr/local/sbin",
    "/bin",
    "/usr/bin",
    "/usr/local/bin",
];

#[derive(Debug)]
pub struct ToolLocator {
    overrides: HashMap<String, PathBuf>,
    search_dirs: Vec<PathBuf>,
    use_env_path: bool,
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect())
    }
}

impl ToolLocator {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            overrides: HashMap::new(),
            search_dirs,
            use_env_path: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Locator restricted to `search_dirs`; `$PATH` is ignored.
    pub fn isolated(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            use_env_path: false,
            ..Self::new(search_dirs)
        }
    }

    /// Pin `tool` to an explicit path. A missing override is reported as
    /// unavailable rather than silently searched for elsewhere.
    pub fn with_override(mut self, tool: &str, path: PathBuf) -> Self {
        self.overrides.insert(tool.to_string(), path);
        self
    }

    pub fn locate(&self, tool: &str) -> Option<PathBuf> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(tool) {
                return hit.clone();
            }
        }

        let found = self.search(tool);
        match &found {
            Some(path) => debug!("located {tool} at {}", path.display()),
            None => debug!("{tool} not found"),
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(tool.to_string(), found.clone());
        }
        found
    }

    /// Build a runner for `tool` if it can be found.
    pub fn runner(&self, tool: &str, timeout: Duration, cancel: &CancelToken) -> Option<CommandRunner> {
        self.locate(tool)
            .map(|path| CommandRunner::new(path, timeout, cancel.clone()))
    }

    fn search(&self, tool: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(tool) {
            return is_executable(path).then(|| path.clone());
        }

        let env_dirs: Vec<PathBuf> = if self.use_env_path {
            env::var_os("PATH")
                .map(|p| env::split_paths(&p).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.search_dirs
            .iter()
            .chain(env_dirs.iter())
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn make_tool(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn locate_walks_search_dirs_in_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        make_tool(second.path(), "zpool");
        let expected = make_tool(first.path(), "zpool");

        let locator =
            ToolLocator::isolated(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(locator.locate("zpool"), Some(expected));
        assert_eq!(locator.locate("zfs"), None);
    }

    #[test]
    fn locate_skips_non_executable_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("zpool"), "not a tool").unwrap();
        let locator = ToolLocator::isolated(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate("zpool"), None);
    }

    #[test]
    fn locate_memoizes_per_instance() {
        let dir = tempdir().unwrap();
        let locator = ToolLocator::isolated(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate("zpool"), None);

        make_tool(dir.path(), "zpool");
        assert_eq!(locator.locate("zpool"), None, "cached miss");

        let fresh = ToolLocator::isolated(vec![dir.path().to_path_buf()]);
        assert!(fresh.locate("zpool").is_some());
    }

    #[test]
    fn override_wins_and_is_not_searched_around() {
        let dir = tempdir().unwrap();
        let custom = tempdir().unwrap();
        make_tool(dir.path(), "zpool");
        let pinned = make_tool(custom.path(), "zpool-wrapper");

        let locator = ToolLocator::isolated(vec![dir.path().to_path_buf()])
            .with_override("zpool", pinned.clone());
        assert_eq!(locator.locate("zpool"), Some(pinned));

        let missing = ToolLocator::isolated(vec![dir.path().to_path_buf()])
            .with_override("zpool", custom.path().join("absent"));
        assert_eq!(missing.locate("zpool"), None);
    }
}
