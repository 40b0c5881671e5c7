//! Fan-out of copy jobs over a scanned tree
//!
//! One job is started per discovered file. Each job makes sure its bucket exists and then
//! streams the file into it. Failures stay inside the job that hit them: they are logged,
//! collected into the [`Report`] and the remaining jobs carry on.

use std::collections::{HashMap, HashSet, hash_map};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::instrument;

use crate::classify::Classifier;
use crate::copy;
use crate::materialize::{MaterializeError, Materializer, Outcome};
use crate::progress;
use crate::scan::{ScanError, Scanner, SourceFile};

/// Name of the directory created under the copy root.
pub const SORTED_DIR_NAME: &str = "Sorted_Files";

/// Jobs kept in flight by default, 0 means one job per file all at once.
pub const DEFAULT_MAX_JOBS: usize = 1024;

/// What happens when two source files map to the same destination path.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CollisionPolicy {
    /// Keep the original file name; the last job to finish wins
    #[default]
    Overwrite,
    /// Name the copy after its path below the source root, e.g. `docs__b.txt`; a second file
    /// mapping to a name already taken (`docs/b.txt` and `docs__b.txt`) is not copied and is
    /// reported as failed
    RelativeName,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub copy: copy::Settings,
    pub classifier: Classifier,
    pub max_jobs: usize,
    pub collision: CollisionPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            copy: copy::Settings::default(),
            classifier: Classifier::default(),
            max_jobs: DEFAULT_MAX_JOBS,
            collision: CollisionPolicy::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub files_scanned: usize,
    pub unreadable_dirs: usize,
    pub buckets: usize,
    pub buckets_created: usize,
    pub copy_summary: copy::Summary,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_scanned: self.files_scanned + other.files_scanned,
            unreadable_dirs: self.unreadable_dirs + other.unreadable_dirs,
            buckets: self.buckets + other.buckets,
            buckets_created: self.buckets_created + other.buckets_created,
            copy_summary: self.copy_summary + other.copy_summary,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files scanned: {}\n\
            unreadable directories: {}\n\
            buckets: {}\n\
            buckets created: {}\n\
            {}",
            self.files_scanned,
            self.unreadable_dirs,
            self.buckets,
            self.buckets_created,
            &self.copy_summary,
        )
    }
}

/// Why a single job did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Copy(#[from] copy::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JobFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?} -> {:?}: {}",
            self.source, self.destination, self.reason
        )
    }
}

/// Outcome of a sort whose scan succeeded, including partial success.
#[derive(Debug, Default)]
pub struct Report {
    pub summary: Summary,
    pub failures: Vec<JobFailure>,
}

impl Report {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn reject(&mut self, prog_track: &'static progress::Progress, failure: JobFailure) {
        tracing::error!("sort: {}", &failure);
        prog_track.files_failed.inc();
        self.summary.copy_summary.files_failed += 1;
        self.failures.push(failure);
    }

    fn record(
        &mut self,
        prog_track: &'static progress::Progress,
        res: Result<JobResult, tokio::task::JoinError>,
    ) {
        let job = match res {
            Ok(job) => job,
            Err(error) => {
                tracing::error!("copy job did not complete: {:#}", &error);
                prog_track.files_failed.inc();
                self.summary.copy_summary.files_failed += 1;
                return;
            }
        };
        match job.result {
            Ok((bucket, summary)) => {
                tracing::info!("copied: {:?} -> {:?}", &job.source, &job.destination);
                if bucket == Outcome::Created {
                    self.summary.buckets_created += 1;
                }
                self.summary.copy_summary = self.summary.copy_summary + summary;
            }
            Err(error) => {
                tracing::error!(
                    "sort: {:?} -> {:?} failed with: {:#}",
                    &job.source,
                    &job.destination,
                    &error
                );
                prog_track.files_failed.inc();
                self.summary.copy_summary = self.summary.copy_summary
                    + match &error {
                        JobError::Copy(error) => error.summary,
                        JobError::Materialize(_) => copy::Summary {
                            files_failed: 1,
                            ..Default::default()
                        },
                    };
                self.failures.push(JobFailure {
                    source: job.source,
                    destination: job.destination,
                    reason: error.to_string(),
                });
            }
        }
    }
}

struct JobResult {
    source: PathBuf,
    destination: PathBuf,
    result: Result<(Outcome, copy::Summary), JobError>,
}

/// Serializes writes that target the same destination path.
#[derive(Default)]
struct DestinationLocks {
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl DestinationLocks {
    fn get(&self, destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("destination locks poisoned");
        locks.entry(destination.to_path_buf()).or_default().clone()
    }
}

/// File name of the copy inside its bucket.
#[must_use]
pub fn destination_name(file: &SourceFile, collision: CollisionPolicy) -> OsString {
    match collision {
        CollisionPolicy::Overwrite => file.file_name().to_os_string(),
        CollisionPolicy::RelativeName => {
            let mut name = OsString::new();
            for (idx, component) in file.relative().iter().enumerate() {
                if idx > 0 {
                    name.push("__");
                }
                name.push(component);
            }
            name
        }
    }
}

/// Output root for a sort: `<copy_dir>/Sorted_Files`, or `<cwd>/Sorted_Files`.
pub fn output_root(copy_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    let base = match copy_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    Ok(base.join(SORTED_DIR_NAME))
}

async fn run_job(
    prog_track: &'static progress::Progress,
    materializer: Arc<Materializer>,
    lock: Arc<tokio::sync::Mutex<()>>,
    bucket_dir: PathBuf,
    mut job: copy::CopyJob,
    settings: copy::Settings,
) -> Result<(Outcome, copy::Summary), JobError> {
    let _job_guard = prog_track.jobs.guard();
    let bucket = materializer.ensure(&bucket_dir).await?;
    if bucket == Outcome::Created {
        prog_track.buckets_created.inc();
    }
    let _dst_guard = lock.lock().await;
    let summary = job.run(prog_track, &settings).await?;
    Ok((bucket, summary))
}

/// Copies every classifiable file under `src` into `<out_root>/<bucket>/`.
///
/// Returns an error only if the scan root can't be read; individual job failures are part of
/// the returned [`Report`].
#[instrument(skip(prog_track, settings))]
pub async fn sort(
    prog_track: &'static progress::Progress,
    src: &Path,
    out_root: &Path,
    settings: &Settings,
) -> Result<Report, ScanError> {
    let mut scanner = Scanner::new(src, settings.classifier.clone()).await?;
    // the output may live inside the tree being sorted, never sort it again
    scanner.exclude(out_root).await;
    let materializer = Arc::new(Materializer::default());
    let locks = DestinationLocks::default();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut buckets = HashSet::new();
    let mut report = Report::default();
    let mut join_set = tokio::task::JoinSet::new();
    let scan_result = loop {
        let file = match scanner.next().await {
            Ok(Some(file)) => file,
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        };
        prog_track.files_scanned.inc();
        report.summary.files_scanned += 1;
        let Some(bucket) = settings.classifier.bucket(&file.name_lossy()) else {
            continue;
        };
        let bucket_dir = out_root.join(&bucket);
        let destination = bucket_dir.join(destination_name(&file, settings.collision));
        buckets.insert(bucket);
        if settings.collision == CollisionPolicy::RelativeName {
            match claimed.entry(destination.clone()) {
                hash_map::Entry::Occupied(first) => {
                    let reason = format!("destination already taken by {:?}", first.get());
                    report.reject(
                        prog_track,
                        JobFailure {
                            source: file.path().to_path_buf(),
                            destination,
                            reason,
                        },
                    );
                    continue;
                }
                hash_map::Entry::Vacant(slot) => {
                    slot.insert(file.path().to_path_buf());
                }
            }
        }
        if settings.max_jobs > 0
            && join_set.len() >= settings.max_jobs
            && let Some(res) = join_set.join_next().await
        {
            report.record(prog_track, res);
        }
        throttle::get_ops_token().await;
        let lock = locks.get(&destination);
        let source = file.path().to_path_buf();
        let job = copy::CopyJob::new(source.clone(), destination.clone());
        let materializer = materializer.clone();
        let copy_settings = settings.copy;
        join_set.spawn(async move {
            let result = run_job(
                prog_track,
                materializer,
                lock,
                bucket_dir,
                job,
                copy_settings,
            )
            .await;
            JobResult {
                source,
                destination,
                result,
            }
        });
    };
    report.summary.unreadable_dirs = scanner.unreadable_dirs();
    // release the open directory handle before waiting on the jobs
    drop(scanner);
    while let Some(res) = join_set.join_next().await {
        report.record(prog_track, res);
    }
    report.summary.buckets = buckets.len();
    scan_result?;
    Ok(report)
}
