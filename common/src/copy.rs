//! Copy of a single file into its bucket
//!
//! A [`CopyJob`] streams its source into the destination in fixed size chunks and ends in
//! either `Succeeded` or `Failed`. Output left behind by a failed copy is removed, and a
//! destination that is the source file itself is never opened for writing.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::progress;

/// Size of the buffer a copy job streams through.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Error type for a failed copy job that preserves the job summary.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so log it with `{}` or `{:#}`:
/// ```ignore
/// tracing::error!("copy failed: {:#}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub files_failed: usize,
    pub partial_files_removed: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            files_failed: self.files_failed + other.files_failed,
            partial_files_removed: self.partial_files_removed + other.partial_files_removed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files failed: {}\n\
            partial files removed: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.files_failed,
            self.partial_files_removed,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed(_))
    }
}

/// Copies one source file to one destination path.
#[derive(Debug)]
pub struct CopyJob {
    source: PathBuf,
    destination: PathBuf,
    state: JobState,
}

impl CopyJob {
    #[must_use]
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination,
            state: JobState::Pending,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Runs the job to a terminal state. A job runs at most once.
    pub async fn run(
        &mut self,
        prog_track: &'static progress::Progress,
        settings: &Settings,
    ) -> Result<Summary, Error> {
        assert_eq!(self.state, JobState::Pending, "copy job started twice");
        self.state = JobState::Running;
        let result = copy_file(prog_track, &self.source, &self.destination, settings).await;
        self.state = match &result {
            Ok(_) => JobState::Succeeded,
            Err(error) => JobState::Failed(format!("{error:#}")),
        };
        result
    }

    /// Runs the job and returns the terminal state it ended in.
    pub async fn run_to_state(
        mut self,
        prog_track: &'static progress::Progress,
        settings: &Settings,
    ) -> JobState {
        if let Err(error) = self.run(prog_track, settings).await {
            tracing::debug!("copy job failed: {:#}", &error);
        }
        self.state
    }
}

/// Streams `src` into `dst` chunk by chunk, truncating `dst` if it exists.
///
/// Fails without touching either file when `dst` is `src` itself, including through a hard
/// link or a symlink.
///
/// Both handles are closed before returning. If anything fails after `dst` was opened the
/// partially written file is removed.
#[instrument(skip(prog_track))]
pub async fn copy_file(
    prog_track: &'static progress::Progress,
    src: &Path,
    dst: &Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let failed = Summary {
        files_failed: 1,
        ..Default::default()
    };
    let _open_file_guard = throttle::open_file_permit().await;
    tracing::debug!("opening 'src' for reading and 'dst' for writing");
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("cannot open {src:?} for reading"))
        .map_err(|err| Error::new(err, failed))?;
    let src_metadata = reader
        .metadata()
        .await
        .with_context(|| format!("failed reading metadata from {src:?}"))
        .map_err(|err| Error::new(err, failed))?;
    // truncating the destination must never truncate the source
    if let Ok(dst_metadata) = tokio::fs::metadata(dst).await
        && dst_metadata.dev() == src_metadata.dev()
        && dst_metadata.ino() == src_metadata.ino()
    {
        return Err(Error::new(
            anyhow::anyhow!("{src:?} and {dst:?} are the same file"),
            failed,
        ));
    }
    let mut writer = tokio::fs::File::create(dst)
        .await
        .with_context(|| format!("cannot open {dst:?} for writing"))
        .map_err(|err| Error::new(err, failed))?;
    tracing::debug!("copying data");
    let mut buffer = vec![0u8; settings.chunk_size.max(1)];
    let mut bytes_copied = 0u64;
    let streamed: anyhow::Result<()> = async {
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .with_context(|| format!("failed reading {src:?}"))?;
            if read == 0 {
                break;
            }
            throttle::get_chunk_token().await;
            writer
                .write_all(&buffer[..read])
                .await
                .with_context(|| format!("failed writing {dst:?}"))?;
            bytes_copied += read as u64;
            prog_track.bytes_copied.add(read as u64);
        }
        writer
            .flush()
            .await
            .with_context(|| format!("failed flushing {dst:?}"))?;
        Ok(())
    }
    .await;
    drop(reader);
    drop(writer);
    if let Err(error) = streamed {
        let mut summary = failed;
        match tokio::fs::remove_file(dst).await {
            Ok(()) => {
                tracing::debug!("removed partially written {:?}", dst);
                summary.partial_files_removed = 1;
            }
            Err(rm_error) => {
                tracing::warn!("failed removing partially written {:?}: {}", dst, &rm_error);
            }
        }
        return Err(Error::new(error, summary));
    }
    prog_track.files_copied.inc();
    Ok(Summary {
        bytes_copied,
        files_copied: 1,
        ..Default::default()
    })
}

#[cfg(test)]
mod copy_tests {
    use crate::testutils;
    use tracing_test::traced_test;

    use super::*;

    static PROGRESS: std::sync::LazyLock<progress::Progress> =
        std::sync::LazyLock::new(progress::Progress::new);

    #[tokio::test]
    #[traced_test]
    async fn copies_across_chunk_boundaries() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("big.bin");
        let dst = tmp_dir.path().join("copy.bin");
        // two full chunks and a partial one
        std::fs::write(&src, testutils::payload(2 * DEFAULT_CHUNK_SIZE + 17))?;
        let summary = copy_file(&PROGRESS, &src, &dst, &Settings::default()).await?;
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.bytes_copied, (2 * DEFAULT_CHUNK_SIZE + 17) as u64);
        testutils::check_same_content(&src, &dst)?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn copies_empty_file() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("empty.txt");
        let dst = tmp_dir.path().join("copy.txt");
        std::fs::write(&src, "")?;
        let summary = copy_file(&PROGRESS, &src, &dst, &Settings { chunk_size: 7 }).await?;
        assert_eq!(summary.bytes_copied, 0);
        assert!(dst.is_file());
        assert_eq!(std::fs::metadata(&dst)?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn overwrites_longer_destination() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("short.txt");
        let dst = tmp_dir.path().join("long.txt");
        std::fs::write(&src, "new")?;
        std::fs::write(&dst, "old content that is much longer")?;
        copy_file(&PROGRESS, &src, &dst, &Settings { chunk_size: 2 }).await?;
        assert_eq!(std::fs::read_to_string(&dst)?, "new");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_source_fails_the_job() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let mut job = CopyJob::new(
            tmp_dir.path().join("gone.txt"),
            tmp_dir.path().join("dst.txt"),
        );
        assert_eq!(job.state(), &JobState::Pending);
        let error = job
            .run(&PROGRESS, &Settings::default())
            .await
            .expect_err("copying a missing file must fail");
        assert_eq!(error.summary.files_failed, 1);
        assert!(format!("{error}").contains("gone.txt"));
        match job.state() {
            JobState::Failed(reason) => assert!(reason.contains("for reading")),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(job.state().is_terminal());
        // the destination is never opened when the source can't be
        assert!(!job.destination().exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn read_failure_removes_partial_destination() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        // opening a directory succeeds but reading from it fails
        let src = tmp_dir.path().join("dir.txt");
        std::fs::create_dir(&src)?;
        let dst = tmp_dir.path().join("dst.txt");
        let error = copy_file(&PROGRESS, &src, &dst, &Settings::default())
            .await
            .expect_err("reading a directory must fail");
        assert!(format!("{error:#}").contains("failed reading"));
        assert_eq!(error.summary.partial_files_removed, 1);
        assert!(!dst.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn directory_in_place_of_destination_fails() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("a.txt");
        std::fs::write(&src, "a")?;
        let dst = tmp_dir.path().join("taken.txt");
        std::fs::create_dir(&dst)?;
        let mut job = CopyJob::new(src, dst.clone());
        assert!(job.run(&PROGRESS, &Settings::default()).await.is_err());
        assert!(matches!(job.state(), JobState::Failed(_)));
        // the directory that was in the way is left alone
        assert!(dst.is_dir());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn copy_onto_itself_keeps_the_data() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("keep.txt");
        std::fs::write(&src, "precious data")?;
        let linked = tmp_dir.path().join("linked.txt");
        std::fs::hard_link(&src, &linked)?;
        for dst in [&src, &linked] {
            let error = copy_file(&PROGRESS, &src, dst, &Settings::default())
                .await
                .expect_err("copying a file onto itself must fail");
            assert!(format!("{error:#}").contains("are the same file"));
            assert_eq!(error.summary.files_failed, 1);
            assert_eq!(error.summary.partial_files_removed, 0);
            assert_eq!(std::fs::read_to_string(&src)?, "precious data");
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn successful_job_reaches_succeeded() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("a.txt");
        std::fs::write(&src, "a")?;
        let mut job = CopyJob::new(src, tmp_dir.path().join("b.txt"));
        job.run(&PROGRESS, &Settings::default()).await?;
        assert_eq!(job.state(), &JobState::Succeeded);
        testutils::check_same_content(job.source(), job.destination())?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn run_to_state_reports_terminal_state() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("a.txt");
        std::fs::write(&src, "a")?;
        let job = CopyJob::new(src, tmp_dir.path().join("b.txt"));
        assert_eq!(
            job.run_to_state(&PROGRESS, &Settings::default()).await,
            JobState::Succeeded
        );
        let job = CopyJob::new(tmp_dir.path().join("gone.txt"), tmp_dir.path().join("c.txt"));
        assert!(matches!(
            job.run_to_state(&PROGRESS, &Settings::default()).await,
            JobState::Failed(_)
        ));
        Ok(())
    }

    #[test]
    fn summaries_add_up() {
        let copied = Summary {
            bytes_copied: 10,
            files_copied: 1,
            ..Default::default()
        };
        let failed = Summary {
            files_failed: 1,
            partial_files_removed: 1,
            ..Default::default()
        };
        let total = copied + copied + failed;
        assert_eq!(total.bytes_copied, 20);
        assert_eq!(total.files_copied, 2);
        assert_eq!(total.files_failed, 1);
        assert!(total.to_string().contains("files failed: 1"));
    }
}
