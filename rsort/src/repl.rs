//! Interactive prompt loop
//!
//! Reads one command per line until `exit` or end of input. A failing command is reported and
//! the loop moves on to the next one.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::command::{self, Command, CommandError};

async fn handle_sort(
    src: &Path,
    copy_dir: Option<&Path>,
    settings: &common::sort::Settings,
) -> anyhow::Result<common::sort::Report> {
    let out_root = common::sort::output_root(copy_dir)?;
    let report = common::sort(src, &out_root, settings).await?;
    Ok(report)
}

async fn handle_read_dir(
    dir: &Path,
    settings: &common::sort::Settings,
) -> anyhow::Result<String> {
    let extensions = common::read_dir(dir, settings.classifier.clone()).await?;
    Ok(common::extensions::format_list(&extensions))
}

fn print_report(output: &mut impl Write, report: &common::sort::Report) -> std::io::Result<()> {
    writeln!(
        output,
        "sorted {} files into {} buckets",
        report.summary.copy_summary.files_copied, report.summary.buckets
    )?;
    if !report.is_complete() {
        writeln!(output, "{} files failed:", report.failures.len())?;
        for failure in &report.failures {
            writeln!(output, "    {failure}")?;
        }
    }
    Ok(())
}

/// Runs the prompt until `exit` or end of input, returning the combined summary of all sorts.
pub async fn run<R, W>(
    input: R,
    output: &mut W,
    settings: &common::sort::Settings,
) -> anyhow::Result<common::sort::Summary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut total = common::sort::Summary::default();
    loop {
        write!(output, "> ")?;
        output.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(output)?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match command::parse(line) {
            Ok(command) => command,
            Err(error) => {
                tracing::warn!("{}", &error);
                writeln!(output, "{error}")?;
                continue;
            }
        };
        tracing::debug!("running {:?}", &command);
        match command {
            Command::Exit => break,
            Command::Help => write!(output, "{}", command::HELP)?,
            Command::ReadDir { dir } => match handle_read_dir(&dir, settings).await {
                Ok(list) => writeln!(output, "found file types: {list}")?,
                Err(error) => {
                    tracing::error!("read_dir {:?} failed: {:#}", &dir, &error);
                    writeln!(output, "read_dir failed: {error:#}")?;
                }
            },
            Command::Sort { src, copy_dir } => {
                let src = match src {
                    Some(src) => src,
                    None => {
                        write!(output, "directory to sort: ")?;
                        output.flush()?;
                        match lines.next_line().await? {
                            Some(answer) if !answer.trim().is_empty() => {
                                PathBuf::from(answer.trim())
                            }
                            Some(_) => {
                                let error = CommandError::MissingArgument { command: "sort" };
                                writeln!(output, "{error}")?;
                                continue;
                            }
                            None => {
                                writeln!(output)?;
                                break;
                            }
                        }
                    }
                };
                match handle_sort(&src, copy_dir.as_deref(), settings).await {
                    Ok(report) => {
                        print_report(output, &report)?;
                        total = total + report.summary;
                    }
                    Err(error) => {
                        tracing::error!("sort {:?} failed: {:#}", &src, &error);
                        writeln!(output, "sort failed: {error:#}")?;
                    }
                }
            }
        }
    }
    Ok(total)
}
