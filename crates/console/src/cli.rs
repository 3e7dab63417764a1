use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat {
        session_id: Option<String>,
        follow_phases: bool,
    },
    Watch {
        goal_id: Option<String>,
    },
    Sessions,
}

impl Command {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Watch { .. } => "watch",
            Self::Sessions => "sessions",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub command: Command,
    pub user_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("missing command")]
    MissingCommand,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("{argument} is not supported by the {command} command")]
    UnsupportedArgument {
        command: &'static str,
        argument: String,
    },
    #[error("help requested")]
    HelpRequested,
}

impl CliOptions {
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut iter = args.into_iter();
        let mut command = match iter.next().as_deref() {
            None => return Err(CliError::MissingCommand),
            Some("--help" | "-h" | "help") => return Err(CliError::HelpRequested),
            Some("chat") => Command::Chat {
                session_id: None,
                follow_phases: false,
            },
            Some("watch") => Command::Watch { goal_id: None },
            Some("sessions") => Command::Sessions,
            Some(unknown) => return Err(CliError::UnknownCommand(unknown.to_string())),
        };
        let mut user_id = None;

        while let Some(arg) = iter.next() {
            let command_name = command.as_str();
            match (arg.as_str(), &mut command) {
                ("--help" | "-h", _) => return Err(CliError::HelpRequested),
                ("--user", _) => {
                    user_id = Some(required_value(&mut iter, &arg)?);
                }
                ("--session", Command::Chat { session_id, .. }) => {
                    *session_id = Some(required_value(&mut iter, &arg)?);
                }
                ("--phases", Command::Chat { follow_phases, .. }) => *follow_phases = true,
                ("--goal", Command::Watch { goal_id }) => {
                    *goal_id = Some(required_value(&mut iter, &arg)?);
                }
                ("--session" | "--phases" | "--goal", _) => {
                    return Err(CliError::UnsupportedArgument {
                        command: command_name,
                        argument: arg.clone(),
                    });
                }
                (unknown, _) => return Err(CliError::UnknownArgument(unknown.to_string())),
            }
        }

        Ok(Self { command, user_id })
    }
}

fn required_value<I>(iter: &mut I, arg: &str) -> Result<String, CliError>
where
    I: Iterator<Item = String>,
{
    iter.next()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CliError::MissingValue(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{CliError, CliOptions, Command};

    fn parse(args: &[&str]) -> Result<CliOptions, CliError> {
        CliOptions::parse(args.iter().map(|arg| (*arg).to_string()))
    }

    #[test]
    fn chat_accepts_session_and_phase_flags() {
        let options = parse(&["chat", "--session", "abc", "--phases", "--user", "u1"])
            .expect("chat args should parse");

        assert_eq!(
            options.command,
            Command::Chat {
                session_id: Some("abc".to_string()),
                follow_phases: true,
            }
        );
        assert_eq!(options.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn watch_accepts_goal() {
        let options = parse(&["watch", "--goal", "goal-onboarding"]).expect("watch should parse");

        assert_eq!(
            options.command,
            Command::Watch {
                goal_id: Some("goal-onboarding".to_string())
            }
        );
    }

    #[test]
    fn flags_of_other_commands_are_rejected() {
        let err = parse(&["sessions", "--goal", "g"]).expect_err("goal is a watch flag");

        assert_eq!(
            err,
            CliError::UnsupportedArgument {
                command: "sessions",
                argument: "--goal".to_string(),
            }
        );
    }

    #[test]
    fn missing_values_and_commands_are_reported() {
        assert_eq!(parse(&[]).expect_err("no command"), CliError::MissingCommand);
        assert_eq!(
            parse(&["chat", "--session"]).expect_err("no value"),
            CliError::MissingValue("--session".to_string())
        );
        assert_eq!(
            parse(&["deploy"]).expect_err("unknown command"),
            CliError::UnknownCommand("deploy".to_string())
        );
        assert_eq!(parse(&["-h"]).expect_err("help"), CliError::HelpRequested);
    }
}
