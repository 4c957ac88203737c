use std::fmt;

use course_core::model::{ModuleId, ProgramId, VideoId};

#[derive(Debug, PartialEq, Eq)]
pub enum ArgsError {
    HelpRequested,
    MissingCommand,
    UnknownCommand(String),
    UnknownArg(String),
    MissingValue { flag: &'static str },
    MissingFlag { command: &'static str, flag: &'static str },
    InvalidPosition { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::HelpRequested => write!(f, "help requested"),
            ArgsError::MissingCommand => write!(f, "missing subcommand"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { command, flag } => write!(f, "{command} requires {flag}"),
            ArgsError::InvalidPosition { raw } => write!(f, "invalid --position value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Programs,
    Seed {
        program: ProgramId,
    },
    Show {
        program: ProgramId,
    },
    Toggle {
        program: ProgramId,
        module: ModuleId,
        video: VideoId,
    },
    Watch {
        program: ProgramId,
        module: ModuleId,
        video: VideoId,
        position_secs: u32,
    },
    DeleteVideo {
        program: ProgramId,
        module: ModuleId,
        video: VideoId,
    },
    DeleteModule {
        program: ProgramId,
        module: ModuleId,
    },
    Refresh {
        program: ProgramId,
    },
}

/// Parsed command line. `db_url` and `user` override the environment config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub db_url: Option<String>,
    pub user: Option<String>,
    pub command: Command,
}

#[derive(Default)]
struct Flags {
    program: Option<String>,
    module: Option<String>,
    video: Option<String>,
    position: Option<String>,
}

impl Flags {
    fn take(
        value: Option<String>,
        command: &'static str,
        flag: &'static str,
    ) -> Result<String, ArgsError> {
        value.ok_or(ArgsError::MissingFlag { command, flag })
    }

    fn program(&mut self, command: &'static str) -> Result<ProgramId, ArgsError> {
        Self::take(self.program.take(), command, "--program").map(ProgramId::new)
    }

    fn module(&mut self, command: &'static str) -> Result<ModuleId, ArgsError> {
        Self::take(self.module.take(), command, "--module").map(ModuleId::new)
    }

    fn video(&mut self, command: &'static str) -> Result<VideoId, ArgsError> {
        Self::take(self.video.take(), command, "--video").map(VideoId::new)
    }
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  course-progress <command> [--db <sqlite_url|path>] [--user <id>] [flags]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  programs");
    eprintln!("  seed          [--program <id>]   # default id: demo");
    eprintln!("  show          --program <id>");
    eprintln!("  toggle        --program <id> --module <id> --video <id>");
    eprintln!("  watch         --program <id> --module <id> --video <id> --position <secs>");
    eprintln!("  delete-video  --program <id> --module <id> --video <id>");
    eprintln!("  delete-module --program <id> --module <id>");
    eprintln!("  refresh       --program <id>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, PROGRESS_USER_ID, PROGRESS_WATCH_THRESHOLD,");
    eprintln!("  PROGRESS_DB_MAX_CONNECTIONS, PROGRESS_DB_BUSY_TIMEOUT_MS, RUST_LOG");
}

impl Args {
    pub fn parse(argv: impl IntoIterator<Item = String>) -> Result<Self, ArgsError> {
        let mut args = argv.into_iter();
        let mut command: Option<String> = None;
        let mut db_url = None;
        let mut user = None;
        let mut flags = Flags::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(ArgsError::HelpRequested),
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = Some(value);
                }
                "--user" => user = Some(require_value(&mut args, "--user")?),
                "--program" => flags.program = Some(require_value(&mut args, "--program")?),
                "--module" => flags.module = Some(require_value(&mut args, "--module")?),
                "--video" => flags.video = Some(require_value(&mut args, "--video")?),
                "--position" => flags.position = Some(require_value(&mut args, "--position")?),
                other if other.starts_with('-') => return Err(ArgsError::UnknownArg(arg)),
                _ if command.is_none() => command = Some(arg),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = command.ok_or(ArgsError::MissingCommand)?;
        let command = match command.as_str() {
            "programs" => Command::Programs,
            "seed" => Command::Seed {
                program: flags
                    .program
                    .take()
                    .map_or_else(|| ProgramId::new("demo"), ProgramId::new),
            },
            "show" => Command::Show {
                program: flags.program("show")?,
            },
            "toggle" => Command::Toggle {
                program: flags.program("toggle")?,
                module: flags.module("toggle")?,
                video: flags.video("toggle")?,
            },
            "watch" => {
                let raw = Flags::take(flags.position.take(), "watch", "--position")?;
                let position_secs = raw
                    .parse()
                    .map_err(|_| ArgsError::InvalidPosition { raw: raw.clone() })?;
                Command::Watch {
                    program: flags.program("watch")?,
                    module: flags.module("watch")?,
                    video: flags.video("watch")?,
                    position_secs,
                }
            }
            "delete-video" => Command::DeleteVideo {
                program: flags.program("delete-video")?,
                module: flags.module("delete-video")?,
                video: flags.video("delete-video")?,
            },
            "delete-module" => Command::DeleteModule {
                program: flags.program("delete-module")?,
                module: flags.module("delete-module")?,
            },
            "refresh" => Command::Refresh {
                program: flags.program("refresh")?,
            },
            _ => return Err(ArgsError::UnknownCommand(command)),
        };

        Ok(Self {
            db_url,
            user,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Args, ArgsError> {
        Args::parse(line.split_whitespace().map(str::to_owned))
    }

    #[test]
    fn parses_toggle_with_overrides() {
        let args = parse("toggle --db sqlite://x.db --user u1 --program p --module m --video v")
            .unwrap();
        assert_eq!(args.db_url.as_deref(), Some("sqlite://x.db"));
        assert_eq!(args.user.as_deref(), Some("u1"));
        assert_eq!(
            args.command,
            Command::Toggle {
                program: ProgramId::new("p"),
                module: ModuleId::new("m"),
                video: VideoId::new("v"),
            }
        );
    }

    #[test]
    fn flags_may_precede_the_command() {
        let args = parse("--program p show").unwrap();
        assert_eq!(
            args.command,
            Command::Show {
                program: ProgramId::new("p")
            }
        );
    }

    #[test]
    fn seed_defaults_to_demo_program() {
        assert_eq!(
            parse("seed").unwrap().command,
            Command::Seed {
                program: ProgramId::new("demo")
            }
        );
    }

    #[test]
    fn missing_required_flag_names_it() {
        assert_eq!(
            parse("delete-module --program p").unwrap_err(),
            ArgsError::MissingFlag {
                command: "delete-module",
                flag: "--module"
            }
        );
    }

    #[test]
    fn rejects_bad_position_and_unknown_input() {
        assert_eq!(
            parse("watch --program p --module m --video v --position soon").unwrap_err(),
            ArgsError::InvalidPosition {
                raw: "soon".into()
            }
        );
        assert_eq!(
            parse("launch").unwrap_err(),
            ArgsError::UnknownCommand("launch".into())
        );
        assert_eq!(
            parse("show --verbose").unwrap_err(),
            ArgsError::UnknownArg("--verbose".into())
        );
        assert_eq!(parse("").unwrap_err(), ArgsError::MissingCommand);
        assert_eq!(
            parse("show --program").unwrap_err(),
            ArgsError::MissingValue { flag: "--program" }
        );
    }

    #[test]
    fn blank_db_target_is_rejected() {
        let argv = ["show", "--db", "  ", "--program", "p"].map(str::to_owned);
        assert_eq!(
            Args::parse(argv).unwrap_err(),
            ArgsError::InvalidDbUrl { raw: "  ".into() }
        );
    }
}
