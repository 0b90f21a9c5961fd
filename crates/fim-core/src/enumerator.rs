//! Walks the monitored roots and decides which files are in scope.

use crate::error::{FimError, Result};
use crate::report::{ScanWarning, WarningKind};
use glob::Pattern;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files found by a walk, plus whatever could not be walked.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: BTreeSet<PathBuf>,
    pub warnings: Vec<ScanWarning>,
    /// Canonical directories whose contents could not be listed. Files
    /// beneath them are unknown, not gone.
    pub unreadable_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PathEnumerator {
    roots: Vec<PathBuf>,
    excludes: Vec<Pattern>,
    follow_symlinks: bool,
}

impl PathEnumerator {
    /// Roots are expected to be absolute and canonical already.
    pub fn new(roots: Vec<PathBuf>, exclude_globs: &[String], follow_symlinks: bool) -> Result<Self> {
        let excludes = exclude_globs
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| FimError::InvalidGlob {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            roots,
            excludes,
            follow_symlinks,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Test one entry (not its ancestors) against the exclusion patterns.
    /// Patterns see the path relative to `root` and the bare file name.
    fn matches(&self, root: &Path, path: &Path) -> bool {
        if self.excludes.is_empty() {
            return false;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        let name = path.file_name().map(Path::new);
        self.excludes.iter().any(|pattern| {
            (!rel.as_os_str().is_empty() && pattern.matches_path(rel))
                || name.is_some_and(|n| pattern.matches_path(n))
        })
    }

    /// True if `path`, or any directory between `root` and `path`, is excluded.
    pub fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if path == root {
            return root.is_file() && self.matches(root, root);
        }
        let Ok(rel) = path.strip_prefix(root) else {
            return false;
        };
        let mut current = root.to_path_buf();
        for component in rel.components() {
            current.push(component);
            if self.matches(root, &current) {
                return true;
            }
        }
        false
    }

    /// The root that monitors `path`, if the path is in scope at all.
    pub fn admits(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .find(|root| path.starts_with(root) && !self.is_excluded(root, path))
            .map(PathBuf::as_path)
    }

    /// Whether a resolved file may be recorded. A target inside a root must
    /// pass that root's exclusions; a target outside every root was reached
    /// through a followed link and is kept.
    pub fn accepts_target(&self, canonical: &Path) -> bool {
        let under_root = self.roots.iter().any(|root| canonical.starts_with(root));
        !under_root || self.admits(canonical).is_some()
    }

    /// Walk every root.
    pub fn enumerate(&self) -> Enumeration {
        let mut out = Enumeration::default();
        let mut visited_dirs = HashSet::new();

        for root in &self.roots {
            match fs::symlink_metadata(root) {
                Ok(meta) if meta.is_file() && self.matches(root, root) => {
                    debug!(path = %root.display(), "root file excluded");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "monitored path does not exist");
                    out.warnings.push(ScanWarning::new(
                        WarningKind::MissingRoot,
                        root,
                        format!("monitored path unavailable: {e}"),
                    ));
                    continue;
                }
            }
            self.walk(root, root, &mut out, &mut visited_dirs);
        }

        debug!(files = out.files.len(), warnings = out.warnings.len(), "enumeration finished");
        out
    }

    /// Walk only the subtree at `dir`, with the same rules as a full walk.
    pub fn enumerate_under(&self, dir: &Path) -> Enumeration {
        let mut out = Enumeration::default();
        if let Some(root) = self.admits(dir) {
            let root = root.to_path_buf();
            self.walk(&root, dir, &mut out, &mut HashSet::new());
        }
        out
    }

    fn walk(
        &self,
        root: &Path,
        start: &Path,
        out: &mut Enumeration,
        visited_dirs: &mut HashSet<PathBuf>,
    ) {
        let mut entries = WalkDir::new(start)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.matches(root, e.path()));

        while let Some(next) = entries.next() {
            let entry = match next {
                Ok(e) => e,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| start.to_path_buf());
                    let warning = if let Some(ancestor) = err.loop_ancestor() {
                        ScanWarning::new(
                            WarningKind::SymlinkLoop,
                            &path,
                            format!("symlink loop back to {}", ancestor.display()),
                        )
                    } else {
                        out.unreadable_dirs.push(canonical_identity(&path));
                        ScanWarning::new(WarningKind::UnreadableDirectory, &path, err.to_string())
                    };
                    warn!(path = %path.display(), "skipping: {}", warning.message);
                    out.warnings.push(warning);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if entry.path_is_symlink() && !self.follow_symlinks {
                continue;
            }

            if file_type.is_dir() {
                if self.follow_symlinks {
                    if let Ok(canonical) = entry.path().canonicalize() {
                        if !visited_dirs.insert(canonical) {
                            debug!(path = %entry.path().display(), "directory already visited");
                            entries.skip_current_dir();
                        }
                    }
                }
                continue;
            }

            if !file_type.is_file() {
                continue;
            }

            match entry.path().canonicalize() {
                Ok(canonical) if !self.accepts_target(&canonical) => {
                    debug!(path = %entry.path().display(), "link target excluded");
                }
                Ok(canonical) => {
                    out.files.insert(canonical);
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot resolve file");
                    out.warnings.push(ScanWarning::new(
                        WarningKind::UnreadableFile,
                        entry.path(),
                        e.to_string(),
                    ));
                }
            }
        }
    }
}

/// Identity of the entry itself: the parent is canonicalized, the last
/// component is kept as named, so a symlink stays a symlink.
pub fn leaf_identity(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Canonical identity for a path that may no longer exist.
///
/// Existing paths are fully canonicalized; for a vanished path the parent is
/// canonicalized and the file name re-attached.
pub fn canonical_identity(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
