use anyhow::Result;
use clap::Parser;
use tracing::instrument;

use rsort_tools_rsort::repl;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rsort",
    version,
    about = "Sort files into per-extension directories, copying them concurrently",
    long_about = "`rsort` copies every file found under a directory into `Sorted_Files/<extension>/`,
running one copy job per file. Files without an extension are left out unless --unclassified is
given. The source tree is never modified.

Without a directory argument `rsort` starts an interactive prompt accepting the commands
`sort [dirname] [copydir]`, `read_dir <dirname>`, `help` and `exit`.

EXAMPLES:
    # Sort ~/Downloads into ./Sorted_Files
    rsort ~/Downloads

    # Sort into /data/Sorted_Files with progress and a summary
    rsort ~/Downloads /data --progress --summary

    # List the extensions present in a directory
    rsort --read-dir ~/Downloads"
)]
struct Args {
    // Sorting options
    /// List the extensions found under DIR instead of sorting
    #[arg(long, value_name = "DIR", conflicts_with_all = ["dirname", "copydir"], help_heading = "Sorting options")]
    read_dir: Option<std::path::PathBuf>,

    /// Treat extensions case-insensitively, e.g. `.PDF` and `.pdf` share the `pdf` bucket
    #[arg(long, help_heading = "Sorting options")]
    fold_case: bool,

    /// Copy files without an extension into bucket NAME instead of skipping them
    #[arg(long, value_name = "NAME", value_parser = parse_bucket_name, help_heading = "Sorting options")]
    unclassified: Option<String>,

    /// What to do when two files end up with the same destination path
    ///
    /// `overwrite` keeps the original file name and the last copy wins. `relative-name` names
    /// each copy after its path below the source directory, e.g. `docs__notes.txt`; a file
    /// whose name is already taken that way (`docs/a.txt` and `docs__a.txt`) is reported as
    /// failed and not copied.
    #[arg(
        long,
        default_value = "overwrite",
        value_name = "POLICY",
        help_heading = "Sorting options"
    )]
    collision: common::sort::CollisionPolicy,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Toggles the type of progress to show
    ///
    /// If specified, --progress flag is implied.
    ///
    /// Options are: `progress-bar` (animated progress bar), `text-updates` (appropriate for logging), `auto` (default, will
    /// choose between `progress-bar` or `text-updates` depending on the type of terminal attached to stderr)
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// - For the interactive (--progress-type=progress-bar), the default is 200ms.
    /// - For the non-interactive (--progress-type=text-updates), the default is 10s.
    ///
    /// If specified, --progress flag is implied.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Print summary at the end as JSON
    #[arg(long, help_heading = "Progress & output")]
    summary_json: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of copy jobs in flight, 0 means one job per file started right away
    #[arg(
        long,
        default_value_t = common::sort::DEFAULT_MAX_JOBS,
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    max_jobs: usize,

    /// Maximum number of open files, 0 means no limit, leaving unspecified means using 80% of max open files system limit
    #[arg(long, value_name = "N", help_heading = "Performance & throttling")]
    max_open_files: Option<usize>,

    /// Throttle the number of copy jobs started per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    /// Throttle the number of chunks written per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    iops_throttle: usize,

    /// Size of the buffer each copy job streams through, e.g. "4KiB" or "1MiB"
    #[arg(
        long,
        default_value = "4KiB",
        value_name = "SIZE",
        help_heading = "Performance & throttling"
    )]
    chunk_size: bytesize::ByteSize,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores, 1 runs everything on a single thread
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Directory to sort; starts the interactive prompt when omitted
    #[arg()]
    dirname: Option<std::path::PathBuf>,

    /// Directory in which `Sorted_Files` is created, defaults to the current directory
    #[arg(requires = "dirname")]
    copydir: Option<std::path::PathBuf>,
}

fn parse_bucket_name(name: &str) -> Result<String, String> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(format!("{name:?} is not a valid directory name"));
    }
    Ok(name.to_string())
}

fn sort_settings(args: &Args) -> common::sort::Settings {
    common::sort::Settings {
        copy: common::copy::Settings {
            chunk_size: args.chunk_size.as_u64() as usize,
        },
        classifier: common::classify::Classifier::new(args.fold_case, args.unclassified.clone()),
        max_jobs: args.max_jobs,
        collision: args.collision,
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<common::sort::Summary> {
    let settings = sort_settings(&args);
    if let Some(dir) = &args.read_dir {
        let extensions = common::read_dir(dir, settings.classifier.clone()).await?;
        println!(
            "found file types: {}",
            common::extensions::format_list(&extensions)
        );
        return Ok(common::sort::Summary::default());
    }
    let Some(src) = &args.dirname else {
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        return repl::run(input, &mut std::io::stdout(), &settings).await;
    };
    let out_root = common::sort::output_root(args.copydir.as_deref())?;
    let report = common::sort(src, &out_root, &settings).await?;
    if !report.is_complete() {
        tracing::error!(
            "{} of {} files could not be copied",
            report.failures.len(),
            report.summary.files_scanned
        );
    }
    Ok(report.summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
        summary_json: args.summary_json,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_open_files: args.max_open_files,
        ops_throttle: args.ops_throttle,
        iops_throttle: args.iops_throttle,
        chunk_size: args.chunk_size.as_u64(),
    };
    let res = common::run(
        if args.progress || args.progress_type.is_some() || args.progress_delay.is_some() {
            Some(common::ProgressSettings {
                progress_type: args.progress_type.unwrap_or_default(),
                progress_delay: args.progress_delay,
            })
        } else {
            None
        },
        output,
        runtime,
        throttle,
        func,
    );
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
