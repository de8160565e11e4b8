//! Workspace confinement for file access.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// System directories that are never accessible, even if a workspace were
/// placed beneath one of them.
pub const RESTRICTED_DIRS: &[&str] = &[
    "/etc",
    "/proc",
    "/sys",
    "/dev",
    "/boot",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/lib",
    "/lib64",
    "/var/log",
    "/var/run",
    "/private/etc",
    "/System",
];

/// Kind of access being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Read,
    Write,
    Execute,
    Delete,
}

impl FileAction {
    /// Whether the action changes the filesystem.
    pub fn is_mutating(self) -> bool {
        matches!(self, FileAction::Write | FileAction::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileAction::Read => "read",
            FileAction::Write => "write",
            FileAction::Execute => "execute",
            FileAction::Delete => "delete",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(FileAction::Read),
            "write" => Ok(FileAction::Write),
            "execute" => Ok(FileAction::Execute),
            "delete" => Ok(FileAction::Delete),
            other => Err(format!("unknown file action '{}'", other)),
        }
    }
}

/// Why a path was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsDenial {
    #[error("cannot resolve path '{}'", .0.display())]
    Unresolvable(PathBuf),

    #[error("'{}' is inside restricted directory '{}'", .path.display(), .dir.display())]
    Restricted { path: PathBuf, dir: PathBuf },

    #[error("'{}' is outside the workspace", .0.display())]
    OutsideWorkspace(PathBuf),

    #[error("{action} of '{}' denied: writes are disabled", .path.display())]
    WritesDisabled { path: PathBuf, action: FileAction },
}

/// Confines file access to a single workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemPolicy {
    workspace_root: PathBuf,
    allow_writes: bool,
    restricted_dirs: Vec<PathBuf>,
}

impl FileSystemPolicy {
    /// Create a policy rooted at `workspace_root`.
    ///
    /// The root is resolved once here, so symlinked workspaces (`/tmp` on
    /// macOS, for instance) compare correctly against resolved paths later.
    pub fn new(workspace_root: impl AsRef<Path>, allow_writes: bool) -> Self {
        let root = workspace_root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        let workspace_root = resolve_lenient(&absolute).unwrap_or(absolute);

        let mut restricted_dirs = Vec::with_capacity(RESTRICTED_DIRS.len() * 2);
        for dir in RESTRICTED_DIRS.iter().map(PathBuf::from) {
            if let Ok(canonical) = dir.canonicalize() {
                if canonical != dir {
                    restricted_dirs.push(canonical);
                }
            }
            restricted_dirs.push(dir);
        }

        Self {
            workspace_root,
            allow_writes,
            restricted_dirs,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn allow_writes(&self) -> bool {
        self.allow_writes
    }

    /// Restricted directories, including the resolved form of any that are
    /// symlinks on this host.
    pub fn restricted_dirs(&self) -> &[PathBuf] {
        &self.restricted_dirs
    }

    /// Resolve `path` and check it. Relative paths are taken against the
    /// workspace root. Returns the resolved path on success.
    pub fn evaluate(&self, path: impl AsRef<Path>, action: FileAction) -> Result<PathBuf, FsDenial> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };

        let resolved =
            resolve_lenient(&joined).ok_or_else(|| FsDenial::Unresolvable(path.to_path_buf()))?;

        if let Some(dir) = self.restricted_dirs.iter().find(|dir| resolved.starts_with(dir)) {
            return Err(FsDenial::Restricted {
                path: resolved,
                dir: dir.clone(),
            });
        }

        if !resolved.starts_with(&self.workspace_root) {
            return Err(FsDenial::OutsideWorkspace(resolved));
        }

        if action.is_mutating() && !self.allow_writes {
            return Err(FsDenial::WritesDisabled {
                path: resolved,
                action,
            });
        }

        Ok(resolved)
    }

    /// Boolean form of [`evaluate`](Self::evaluate).
    pub fn is_allowed(&self, path: impl AsRef<Path>, action: FileAction) -> bool {
        match self.evaluate(path, action) {
            Ok(_) => true,
            Err(denial) => {
                tracing::debug!(%denial, "filesystem access denied");
                false
            }
        }
    }
}

/// Resolve symlinks along the longest existing prefix of an absolute path,
/// then apply the remaining components lexically. Lets write targets that do
/// not exist yet be checked without losing symlink resolution.
fn resolve_lenient(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        let Ok(mut resolved) = prefix.canonicalize() else {
            continue;
        };
        for component in &components[split..] {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        return Some(resolved);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, FileSystemPolicy) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let policy = FileSystemPolicy::new(dir.path(), true);
        (dir, policy)
    }

    #[test]
    fn test_paths_inside_workspace() {
        let (dir, policy) = workspace();
        assert!(policy.is_allowed("data.txt", FileAction::Read));
        assert!(policy.is_allowed(dir.path().join("sub/new.txt"), FileAction::Write));
        assert!(policy.is_allowed("sub/./deeper/out.json", FileAction::Write));
        assert!(policy.is_allowed("data.txt", FileAction::Delete));
    }

    #[test]
    fn test_system_paths_denied() {
        let (_dir, policy) = workspace();
        assert!(!policy.is_allowed("/etc/passwd", FileAction::Read));
        assert!(matches!(
            policy.evaluate("/etc/passwd", FileAction::Read),
            Err(FsDenial::Restricted { .. })
        ));
        assert!(!policy.is_allowed("/proc/self/environ", FileAction::Read));
    }

    #[test]
    fn test_traversal_denied() {
        let (_dir, policy) = workspace();
        assert!(!policy.is_allowed("../outside.txt", FileAction::Read));
        assert!(!policy.is_allowed("sub/../../../etc/passwd", FileAction::Read));
        assert!(!policy.is_allowed("missing/../../x", FileAction::Write));
        assert!(policy.is_allowed("missing/../data.txt", FileAction::Read));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let (dir, policy) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            policy.evaluate("link/secret", FileAction::Read),
            Err(FsDenial::OutsideWorkspace(_))
        ));
    }

    #[test]
    fn test_writes_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let policy = FileSystemPolicy::new(dir.path(), false);
        assert!(policy.is_allowed("report.txt", FileAction::Read));
        assert!(policy.is_allowed("report.txt", FileAction::Execute));
        assert!(matches!(
            policy.evaluate("report.txt", FileAction::Write),
            Err(FsDenial::WritesDisabled { action: FileAction::Write, .. })
        ));
        assert!(!policy.is_allowed("report.txt", FileAction::Delete));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("Write".parse::<FileAction>(), Ok(FileAction::Write));
        assert!("chmod".parse::<FileAction>().is_err());
        assert!(FileAction::Delete.is_mutating());
        assert!(!FileAction::Execute.is_mutating());
    }
}
