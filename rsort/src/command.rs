//! Commands accepted by the interactive prompt

use std::path::PathBuf;

pub const HELP: &str = "\
commands:
    sort [dirname] [copydir]   copy every file under dirname into copydir/Sorted_Files/<extension>/
                               (dirname is asked for when omitted, copydir defaults to the
                               current directory)
    read_dir <dirname>         list the file extensions found under dirname
    help                       show this message
    exit                       quit
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sort {
        src: Option<PathBuf>,
        copy_dir: Option<PathBuf>,
    },
    ReadDir {
        dir: PathBuf,
    },
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}, type `help` for the list of commands")]
    Unknown(String),
    #[error("`{command}` expects a directory name")]
    MissingArgument { command: &'static str },
    #[error("`{command}` takes at most {max} argument(s)")]
    TooManyArguments { command: &'static str, max: usize },
}

fn check_max(command: &'static str, args: &[&str], max: usize) -> Result<(), CommandError> {
    if args.len() > max {
        return Err(CommandError::TooManyArguments { command, max });
    }
    Ok(())
}

/// Parses one line of input. Arguments are separated by whitespace.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    match name {
        "sort" => {
            check_max("sort", &args, 2)?;
            Ok(Command::Sort {
                src: args.first().map(PathBuf::from),
                copy_dir: args.get(1).map(PathBuf::from),
            })
        }
        "read_dir" => {
            check_max("read_dir", &args, 1)?;
            let dir = args.first().ok_or(CommandError::MissingArgument {
                command: "read_dir",
            })?;
            Ok(Command::ReadDir {
                dir: PathBuf::from(dir),
            })
        }
        "help" => {
            check_max("help", &args, 0)?;
            Ok(Command::Help)
        }
        "exit" => {
            check_max("exit", &args, 0)?;
            Ok(Command::Exit)
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sort_variants() {
        assert_eq!(
            parse("sort"),
            Ok(Command::Sort {
                src: None,
                copy_dir: None
            })
        );
        assert_eq!(
            parse("sort downloads"),
            Ok(Command::Sort {
                src: Some("downloads".into()),
                copy_dir: None
            })
        );
        assert_eq!(
            parse("  sort   downloads  /tmp/out "),
            Ok(Command::Sort {
                src: Some("downloads".into()),
                copy_dir: Some("/tmp/out".into())
            })
        );
        assert_eq!(
            parse("sort a b c"),
            Err(CommandError::TooManyArguments {
                command: "sort",
                max: 2
            })
        );
    }

    #[test]
    fn read_dir_needs_a_directory() {
        assert_eq!(
            parse("read_dir"),
            Err(CommandError::MissingArgument {
                command: "read_dir"
            })
        );
        assert_eq!(
            parse("read_dir docs"),
            Ok(Command::ReadDir { dir: "docs".into() })
        );
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("help"), Ok(Command::Help));
        assert_eq!(parse("exit"), Ok(Command::Exit));
        assert!(matches!(
            parse("exit now"),
            Err(CommandError::TooManyArguments { .. })
        ));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert_eq!(
            parse("Sort downloads"),
            Err(CommandError::Unknown("Sort".to_string()))
        );
        let error = parse("list").unwrap_err();
        assert!(error.to_string().contains("\"list\""));
    }
}
