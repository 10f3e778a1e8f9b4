//! Work-list discovery
//!
//! The engine never enumerates directories itself. A [`Discovery`]
//! implementation hands it an ordered list of files, and that order is the
//! processing order.

use crate::error::EngineError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: SystemTime,
}

impl FileDescriptor {
    /// Describe an existing regular file
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)
            .map_err(|e| EngineError::Discovery(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(EngineError::Discovery(format!("{} is not a regular file", path.display())));
        }
        let last_modified = metadata
            .modified()
            .map_err(|e| EngineError::Discovery(format!("{}: {e}", path.display())))?;

        Ok(Self {
            path,
            size: metadata.len(),
            last_modified,
        })
    }
}

/// Source of the ordered work list
pub trait Discovery {
    fn discover(&self) -> Result<Vec<FileDescriptor>, EngineError>;
}

/// Discovery over an explicit list of paths, relative ones resolved against `root`
#[derive(Debug, Clone)]
pub struct ListDiscovery {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl ListDiscovery {
    pub fn new(root: impl Into<PathBuf>, paths: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths,
        }
    }

    /// Read one path per line; blank lines and `#` comments are ignored
    pub fn from_list_file(root: impl Into<PathBuf>, list: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(list)
            .map_err(|e| {
                EngineError::Discovery(format!("cannot read file list {}: {e}", list.display()))
            })?;
        let paths = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(PathBuf::from)
            .collect();
        Ok(Self::new(root, paths))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Discovery for ListDiscovery {
    fn discover(&self) -> Result<Vec<FileDescriptor>, EngineError> {
        let mut seen = HashSet::with_capacity(self.paths.len());
        let mut files = Vec::with_capacity(self.paths.len());

        for path in &self.paths {
            let resolved = self.resolve(path);
            let descriptor = FileDescriptor::from_path(&resolved)?;

            // Two spellings of one file would be processed twice
            let identity = resolved
                .canonicalize()
                .map_err(|e| EngineError::Discovery(format!("{}: {e}", resolved.display())))?;
            if !seen.insert(identity) {
                return Err(EngineError::Discovery(format!(
                    "{} is listed more than once",
                    path.display()
                )));
            }
            files.push(descriptor);
        }

        tracing::debug!("discovered {} files", files.len());
        Ok(files)
    }
}

impl Discovery for Vec<FileDescriptor> {
    fn discover(&self) -> Result<Vec<FileDescriptor>, EngineError> {
        Ok(self.clone())
    }
}
