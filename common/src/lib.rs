//! Common utilities and types for rsort
//!
//! This crate is the engine behind the `rsort` binary: it walks a directory tree, classifies
//! every regular file by its extension and copies each one into a per-extension bucket
//! directory, running one concurrent copy job per file.
//!
//! # Core Modules
//!
//! - [`scan`] - lazy recursive enumeration of the files to sort
//! - [`classify`] - mapping from file names to extensions and buckets
//! - [`materialize`] - idempotent, race-free creation of bucket directories
//! - [`copy`] - chunked streaming copy of a single file
//! - [`sort`](mod@sort) - fan-out of copy jobs with per-job failure isolation
//! - [`extensions`] - read-only listing of the extensions present in a tree
//!
//! # Running an operation
//!
//! [`run`] sets up logging, the tokio runtime, throttling and progress reporting, runs the
//! provided future to completion and prints its summary. It returns `None` if the operation
//! failed, in which case the error has already been reported.
//!
//! ```rust,no_run
//! # fn example() {
//! let settings = common::sort::Settings::default();
//! let res = common::run(
//!     None,
//!     common::OutputConfig::default(),
//!     common::RuntimeConfig::default(),
//!     common::ThrottleConfig {
//!         chunk_size: 4096,
//!         ..Default::default()
//!     },
//!     || async move {
//!         let out_root = common::sort::output_root(None)?;
//!         let report = common::sort(std::path::Path::new("downloads"), &out_root, &settings)
//!             .await?;
//!         Ok::<_, anyhow::Error>(report.summary)
//!     },
//! );
//! # }
//! ```

use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Arc, Condvar, LazyLock, Mutex};

use anyhow::{Context, anyhow};
use tracing::instrument;

pub mod classify;
pub mod config;
pub mod copy;
pub mod extensions;
pub mod materialize;
pub mod progress;
pub mod scan;
pub mod sort;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, ProgressSettings, ProgressType, RuntimeConfig, ThrottleConfig};

static PROGRESS: LazyLock<progress::Progress> = LazyLock::new(progress::Progress::new);

/// Sorts `src` into `out_root`, see [`sort::sort`].
pub async fn sort(
    src: &Path,
    out_root: &Path,
    settings: &sort::Settings,
) -> Result<sort::Report, scan::ScanError> {
    sort::sort(&PROGRESS, src, out_root, settings).await
}

/// Lists the extensions present under `root`, see [`extensions::read_dir`].
pub async fn read_dir(
    root: &Path,
    classifier: classify::Classifier,
) -> Result<std::collections::BTreeSet<String>, scan::ScanError> {
    extensions::read_dir(root, classifier).await
}

struct ProgressTracker {
    done: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressTracker {
    fn new(progress_bar: bool, delay: std::time::Duration) -> Self {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let done_clone = done.clone();
        let handle = std::thread::spawn(move || {
            let bar = progress_bar.then(|| {
                let bar = indicatif::ProgressBar::new_spinner();
                if let Ok(style) = indicatif::ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] {msg}",
                ) {
                    bar.set_style(style);
                }
                bar
            });
            let mut printer = progress::ProgressPrinter::new(&PROGRESS);
            let (lock, cvar) = &*done_clone;
            let mut is_done = lock.lock().expect("progress lock poisoned");
            while !*is_done {
                let (guard, _) = cvar
                    .wait_timeout(is_done, delay)
                    .expect("progress lock poisoned");
                is_done = guard;
                match &bar {
                    Some(bar) => {
                        bar.set_message(printer.short());
                        bar.tick();
                    }
                    None => eprintln!("{}", printer.print()),
                }
            }
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
        });
        Self {
            done,
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.done;
        if let Ok(mut is_done) = lock.lock() {
            *is_done = true;
        }
        cvar.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn progress_tracker(settings: &ProgressSettings) -> anyhow::Result<ProgressTracker> {
    let progress_bar = match settings.progress_type {
        ProgressType::Auto => std::io::stderr().is_terminal(),
        ProgressType::ProgressBar => true,
        ProgressType::TextUpdates => false,
    };
    let delay = match &settings.progress_delay {
        Some(delay) => humantime::parse_duration(delay)
            .with_context(|| format!("invalid progress delay {delay:?}"))?,
        None if progress_bar => std::time::Duration::from_millis(200),
        None => std::time::Duration::from_secs(10),
    };
    Ok(ProgressTracker::new(progress_bar, delay))
}

/// Log filter for the given output settings; `RUST_LOG` wins unless quiet.
fn env_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    if output.quiet {
        return tracing_subscriber::EnvFilter::new("off");
    }
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

/// Installs the stderr log subscriber; later calls are no-ops.
pub fn init_tracing(output: &OutputConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(output))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 80% of the soft `RLIMIT_NOFILE` of this process.
pub fn default_max_open_files() -> anyhow::Result<usize> {
    let (soft, _hard) = nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE)
        .context("cannot query the open files limit")?;
    let limit = usize::try_from(soft / 10 * 8).unwrap_or(usize::MAX);
    Ok(limit.clamp(1, tokio::sync::Semaphore::MAX_PERMITS))
}

fn build_runtime(config: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = if config.max_workers == 1 {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if config.max_workers > 0 {
            builder.worker_threads(config.max_workers);
        }
        builder
    };
    if config.max_blocking_threads > 0 {
        builder.max_blocking_threads(config.max_blocking_threads);
    }
    builder
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")
}

#[instrument(skip(runtime))]
fn setup_throttle(
    runtime: &tokio::runtime::Runtime,
    config: &ThrottleConfig,
) -> anyhow::Result<()> {
    config.validate().map_err(|error| anyhow!(error))?;
    let max_open_files = match config.max_open_files {
        Some(max_open_files) => max_open_files,
        None => default_max_open_files()?,
    };
    tracing::info!("max open files: {}", max_open_files);
    throttle::set_max_open_files(max_open_files);
    if config.ops_throttle > 0 {
        let (replenish, interval) = throttle::replenish_schedule(config.ops_throttle);
        throttle::init_ops_tokens(replenish);
        runtime.spawn(throttle::run_ops_replenish_thread(replenish, interval));
    }
    if config.iops_throttle > 0 {
        let (replenish, interval) = throttle::replenish_schedule(config.iops_throttle);
        throttle::init_chunk_tokens(replenish);
        runtime.spawn(throttle::run_chunk_replenish_thread(replenish, interval));
    }
    Ok(())
}

fn print_summary<Summary: std::fmt::Display + serde::Serialize>(
    output: &OutputConfig,
    summary: &Summary,
) {
    if output.summary_json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(error) => tracing::error!("failed to serialize summary: {}", &error),
        }
    } else if output.print_summary || output.verbose > 0 {
        println!("{summary}");
    }
}

/// Runs `func` to completion inside a freshly configured runtime.
///
/// Returns `None` if the setup or `func` failed; the error is printed to stderr unless quiet.
pub fn run<Fut, Summary, Error>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display + serde::Serialize,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    init_tracing(&output);
    let report_error = |error: String| {
        if !output.quiet {
            eprintln!("{error}");
        }
    };
    let rt = match build_runtime(&runtime) {
        Ok(rt) => rt,
        Err(error) => {
            report_error(format!("{error:#}"));
            return None;
        }
    };
    if let Err(error) = setup_throttle(&rt, &throttle) {
        report_error(format!("{error:#}"));
        return None;
    }
    let tracker = match progress.as_ref().map(progress_tracker).transpose() {
        Ok(tracker) => tracker,
        Err(error) => {
            report_error(format!("{error:#}"));
            return None;
        }
    };
    let res = rt.block_on(func());
    drop(tracker);
    match res {
        Ok(summary) => {
            print_summary(&output, &summary);
            Some(summary)
        }
        Err(error) => {
            report_error(format!("{error:#}"));
            None
        }
    }
}
