//! Lazy recursive enumeration of the files to sort
//!
//! The walk keeps one directory handle open at a time and a stack of directories still to
//! visit, so memory stays proportional to the number of pending directories rather than the
//! number of files. Symlinks are never followed.

use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::classify::Classifier;

/// The scan root could not be walked; nothing below it is processed.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot read directory {path:?}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot read directory {path:?}: not a directory")]
    NotADirectory { path: PathBuf },
}

/// A regular file found under the scan root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    relative: PathBuf,
}

impl SourceFile {
    #[must_use]
    pub fn new(root: &Path, path: PathBuf) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        Self { path, relative }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path below the scan root.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or_default()
    }

    /// File name used for classification; non UTF-8 bytes are replaced.
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        self.file_name().to_string_lossy()
    }
}

pub struct Scanner {
    root: PathBuf,
    classifier: Classifier,
    current: Option<(PathBuf, tokio::fs::ReadDir)>,
    pending: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
    unreadable_dirs: usize,
}

impl Scanner {
    /// Opens the scan root. Fails if it is missing, not a directory or unreadable.
    #[instrument(skip(classifier))]
    pub async fn new(root: &Path, classifier: Classifier) -> Result<Self, ScanError> {
        let root_err = |source| ScanError::Root {
            path: root.to_path_buf(),
            source,
        };
        let metadata = tokio::fs::metadata(root).await.map_err(root_err)?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let canonical = tokio::fs::canonicalize(root).await.map_err(root_err)?;
        let entries = tokio::fs::read_dir(&canonical).await.map_err(root_err)?;
        Ok(Self {
            root: canonical.clone(),
            classifier,
            current: Some((canonical, entries)),
            pending: vec![],
            excluded: vec![],
            unreadable_dirs: 0,
        })
    }

    /// Canonical scan root; every [`SourceFile`] path starts with it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Skips the subtree at `path` if the walk ever reaches it.
    ///
    /// The path does not need to exist yet.
    pub async fn exclude(&mut self, path: &Path) {
        let resolved = resolve_lenient(path).await;
        tracing::debug!("excluding {:?} from the scan", &resolved);
        self.excluded.push(resolved);
    }

    /// Directories below the root that could not be read and were skipped.
    pub fn unreadable_dirs(&self) -> usize {
        self.unreadable_dirs
    }

    /// Next classifiable regular file, `None` once the tree is exhausted.
    pub async fn next(&mut self) -> Result<Option<SourceFile>, ScanError> {
        loop {
            let Some((dir, entries)) = self.current.as_mut() else {
                let Some(dir) = self.pending.pop() else {
                    return Ok(None);
                };
                match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => self.current = Some((dir, entries)),
                    Err(error) => {
                        tracing::warn!("skipping directory {:?}: {}", &dir, &error);
                        self.unreadable_dirs += 1;
                    }
                }
                continue;
            };
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(error) => {
                    if *dir == self.root {
                        return Err(ScanError::Root {
                            path: self.root.clone(),
                            source: error,
                        });
                    }
                    tracing::warn!("failed traversing directory {:?}: {}", &dir, &error);
                    self.unreadable_dirs += 1;
                    self.current = None;
                    continue;
                }
            };
            let entry_path = entry.path();
            // DirEntry::file_type does not follow symlinks
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(error) => {
                    tracing::warn!("skipping {:?}: {}", &entry_path, &error);
                    continue;
                }
            };
            if file_type.is_dir() {
                if self.excluded.iter().any(|excluded| *excluded == entry_path) {
                    tracing::debug!("not descending into excluded {:?}", &entry_path);
                } else {
                    self.pending.push(entry_path);
                }
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!("skipping non-regular {:?}", &entry_path);
                continue;
            }
            if !self
                .classifier
                .is_classified(&entry.file_name().to_string_lossy())
            {
                tracing::trace!("skipping unclassified {:?}", &entry_path);
                continue;
            }
            return Ok(Some(SourceFile::new(&self.root, entry_path)));
        }
    }
}

/// Drains a whole scan into memory.
pub async fn collect(root: &Path, classifier: Classifier) -> Result<Vec<SourceFile>, ScanError> {
    let mut scanner = Scanner::new(root, classifier).await?;
    let mut files = vec![];
    while let Some(file) = scanner.next().await? {
        files.push(file);
    }
    Ok(files)
}

/// Canonicalizes the longest existing prefix of `path` and appends the rest.
async fn resolve_lenient(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.clone();
    let mut rest = vec![];
    loop {
        if let Ok(mut resolved) = tokio::fs::canonicalize(&existing).await {
            resolved.extend(rest.iter().rev());
            return resolved;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return absolute,
        }
    }
}
