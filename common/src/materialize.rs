//! Idempotent creation of bucket directories
//!
//! Many copy jobs target the same bucket and all of them ask for it to exist before they
//! open their destination. A directory that already exists, including one created a moment
//! ago by another job, is never an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::instrument;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("cannot create directory {path:?}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot create directory {path:?}: path exists and is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Creates `path` and any missing parents.
///
/// Safe to call concurrently for the same path; exactly one caller observes
/// [`Outcome::Created`] when the directory did not exist before.
#[instrument]
pub async fn ensure_dir(path: &Path) -> Result<Outcome, MaterializeError> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => return Ok(Outcome::Created),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            return check_existing(path, error).await;
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("parent of {:?} is missing, creating it", path);
        }
        Err(source) => {
            return Err(MaterializeError::Create {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    if let Some(parent) = path.parent() {
        // create_dir_all already tolerates concurrent creation of the same chain
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| MaterializeError::Create {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(Outcome::Created),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            check_existing(path, error).await
        }
        Err(source) => Err(MaterializeError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn check_existing(path: &Path, error: std::io::Error) -> Result<Outcome, MaterializeError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(Outcome::AlreadyExisted),
        Ok(_) => Err(MaterializeError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(MaterializeError::Create {
            path: path.to_path_buf(),
            source: error,
        }),
    }
}

/// Remembers which buckets are already in place so that each one is created once per run.
///
/// Concurrent callers for the same path wait for the first one; a failed attempt is not
/// remembered and the next caller tries again.
#[derive(Debug, Default)]
pub struct Materializer {
    known: std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::OnceCell<Outcome>>>>,
}

impl Materializer {
    pub async fn ensure(&self, path: &Path) -> Result<Outcome, MaterializeError> {
        let cell = {
            let mut known = self.known.lock().expect("materializer lock poisoned");
            known.entry(path.to_path_buf()).or_default().clone()
        };
        let mut initialized_here = false;
        let outcome = *cell
            .get_or_try_init(|| {
                initialized_here = true;
                ensure_dir(path)
            })
            .await?;
        if initialized_here {
            Ok(outcome)
        } else {
            Ok(Outcome::AlreadyExisted)
        }
    }
}
