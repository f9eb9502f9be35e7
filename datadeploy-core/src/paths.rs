//! Directory resolution and the include/exclude data file filter.

use std::path::{Component, Path, PathBuf};

/// Resolves a possibly relative path against the current working directory.
/// An empty input resolves to the current directory.
pub fn absolute_path(input: &Path) -> std::io::Result<PathBuf> {
    if input.is_absolute() {
        return Ok(normalize(input));
    }
    let cwd = std::env::current_dir()?;
    Ok(normalize(&cwd.join(input)))
}

/// True if `path`, resolved inside `base`, equals any entry of `list` resolved the same way.
pub fn matches_path_in_list<S: AsRef<str>>(base: &Path, list: &[S], path: &str) -> bool {
    let target = normalize(&base.join(path));
    list.iter()
        .any(|candidate| normalize(&base.join(candidate.as_ref())) == target)
}

/// Lexically resolves `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Data file include/exclude lists, matched relative to the base directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PathFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Exclusion wins; a non-empty include list admits only the files it names.
    pub fn is_skipped(&self, base: &Path, data_file_name: &str) -> bool {
        if matches_path_in_list(base, &self.exclude, data_file_name) {
            return true;
        }
        !self.include.is_empty() && !matches_path_in_list(base, &self.include, data_file_name)
    }
}
