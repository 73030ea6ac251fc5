//! Project-path resolver (component E, §4.E).
//!
//! Resolves a project root to a canonical, symlink-evaluated path once, then
//! answers `matches(cwd)` cheaply for every session considered during
//! enumeration.

use std::fs;
use std::path::{Path, PathBuf};

/// A resolved project root. `R` in the spec's notation.
pub struct ProjectResolver {
    root: PathBuf,
}

impl ProjectResolver {
    /// Canonicalizes `project_root` (absolute, symlinks evaluated, cleaned)
    /// and caches the result. Returns `None` for an empty input or a path
    /// that does not exist — empty inputs never match anything (§4.E).
    pub fn new(project_root: impl AsRef<Path>) -> Option<ProjectResolver> {
        let project_root = project_root.as_ref();
        if project_root.as_os_str().is_empty() {
            return None;
        }
        let root = fs::canonicalize(project_root).ok()?;
        Some(ProjectResolver { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `true` iff `cwd` canonicalises to a path `C` that is `R` itself or a
    /// descendant of it — the filepath relation `Rel(R, C)` is `"."` or does
    /// not begin with `".."`.
    pub fn matches(&self, cwd: &str) -> bool {
        if cwd.is_empty() {
            return false;
        }
        let Ok(c) = fs::canonicalize(cwd) else {
            return false;
        };
        c == self.root || c.starts_with(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_project_root_never_resolves() {
        assert!(ProjectResolver::new("").is_none());
    }

    #[test]
    fn root_matches_itself() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProjectResolver::new(dir.path()).unwrap();
        assert!(resolver.matches(dir.path().to_str().unwrap()));
    }

    #[test]
    fn descendant_matches() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("child");
        std::fs::create_dir(&child).unwrap();
        let resolver = ProjectResolver::new(dir.path()).unwrap();
        assert!(resolver.matches(child.to_str().unwrap()));
    }

    #[test]
    fn sibling_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        let resolver = ProjectResolver::new(&a).unwrap();
        assert!(!resolver.matches(b.to_str().unwrap()));
    }

    #[test]
    fn empty_cwd_never_matches() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProjectResolver::new(dir.path()).unwrap();
        assert!(!resolver.matches(""));
    }

    #[test]
    fn symlinked_descendant_resolves_through_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let child = real.join("child");
        std::fs::create_dir(&child).unwrap();

        let link = dir.path().join("link");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real, &link).unwrap();

        #[cfg(unix)]
        {
            let resolver = ProjectResolver::new(&real).unwrap();
            let via_link = link.join("child");
            assert!(resolver.matches(via_link.to_str().unwrap()));
        }
    }
}
