//! Line commands typed at the prompt
//!
//! Plain text submits a prompt. Lines starting with `/` are commands:
//!
//! | Command             | Effect                                   |
//! |---------------------|------------------------------------------|
//! | `/accept`           | implement the ready plan                 |
//! | `/clarify`          | open a clarification on the ready plan   |
//! | `/clarify <text>`   | send a clarification and re-plan         |
//! | `/cancel`           | drop an open clarification               |
//! | `/save [name]`      | save the current session                 |
//! | `/retry-save`       | retry the oldest save that failed        |
//! | `/plan on\|off`      | plan before implementing by default      |
//! | `/help`             | list commands                            |
//! | `/quit`             | exit                                     |

use controller_core::ControllerCommand;
use thiserror::Error;

/// Help text printed by `/help`
pub const HELP: &str = "\
commands:
  <text>            submit a prompt
  /accept           implement the ready plan
  /clarify [text]   refine the ready plan
  /cancel           drop an open clarification
  /save [name]      save the current session
  /retry-save       retry the oldest failed save
  /plan on|off      plan before implementing
  /help             show this help
  /quit             exit
";

/// A parsed input line
#[derive(Debug, PartialEq, Eq)]
pub enum InputCommand {
    Prompt(String),
    Accept,
    BeginClarification,
    Clarify(String),
    CancelClarification,
    Save(Option<String>),
    RetrySave,
    PlanFirst(bool),
    Help,
    Quit,
}

/// Input that could not be understood
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),

    #[error("/{command} expects {expected}, got {value:?}")]
    InvalidArgument {
        command: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Parse one line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<InputCommand>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(InputCommand::Prompt(line.to_string())));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "accept" => InputCommand::Accept,
        "clarify" if argument.is_empty() => InputCommand::BeginClarification,
        "clarify" => InputCommand::Clarify(argument.to_string()),
        "cancel" => InputCommand::CancelClarification,
        "save" if argument.is_empty() => InputCommand::Save(None),
        "save" => InputCommand::Save(Some(argument.to_string())),
        "retry-save" => InputCommand::RetrySave,
        "plan" => match argument {
            "on" => InputCommand::PlanFirst(true),
            "off" => InputCommand::PlanFirst(false),
            other => {
                return Err(InputError::InvalidArgument {
                    command: "plan",
                    expected: "on or off",
                    value: other.to_string(),
                })
            }
        },
        "help" | "?" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

impl InputCommand {
    /// The controller request for this input, if it has one
    pub fn into_command(self) -> Option<ControllerCommand> {
        let command = match self {
            Self::Prompt(prompt) => ControllerCommand::Submit {
                prompt,
                plan_first: None,
            },
            Self::Accept => ControllerCommand::AcceptPlan,
            Self::BeginClarification => ControllerCommand::BeginClarification,
            Self::Clarify(text) => ControllerCommand::Clarify(text),
            Self::CancelClarification => ControllerCommand::AbandonClarification,
            Self::Save(name) => ControllerCommand::SaveSession { name },
            Self::RetrySave => ControllerCommand::RetrySave,
            Self::PlanFirst(on) => ControllerCommand::SetPlanFirst(on),
            Self::Help | Self::Quit => return None,
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_is_prompt() {
        assert_eq!(
            parse_line("  a snake game in pygame \n"),
            Ok(Some(InputCommand::Prompt("a snake game in pygame".into())))
        );
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/accept"), Ok(Some(InputCommand::Accept)));
        assert_eq!(parse_line("/clarify"), Ok(Some(InputCommand::BeginClarification)));
        assert_eq!(
            parse_line("/clarify  use blue "),
            Ok(Some(InputCommand::Clarify("use blue".into())))
        );
        assert_eq!(parse_line("/save"), Ok(Some(InputCommand::Save(None))));
        assert_eq!(
            parse_line("/save my clock"),
            Ok(Some(InputCommand::Save(Some("my clock".into()))))
        );
        assert_eq!(parse_line("/retry-save"), Ok(Some(InputCommand::RetrySave)));
        assert_eq!(parse_line("/plan off"), Ok(Some(InputCommand::PlanFirst(false))));
        assert_eq!(parse_line("/exit"), Ok(Some(InputCommand::Quit)));
    }

    #[test]
    fn test_bad_commands() {
        assert_eq!(
            parse_line("/deploy"),
            Err(InputError::UnknownCommand("deploy".into()))
        );
        assert!(matches!(
            parse_line("/plan maybe"),
            Err(InputError::InvalidArgument { command: "plan", .. })
        ));
    }

    #[test]
    fn test_into_command() {
        assert!(matches!(
            InputCommand::Prompt("x".into()).into_command(),
            Some(ControllerCommand::Submit { ref prompt, plan_first: None }) if prompt == "x"
        ));
        assert!(matches!(
            InputCommand::CancelClarification.into_command(),
            Some(ControllerCommand::AbandonClarification)
        ));
        assert!(InputCommand::Quit.into_command().is_none());
        assert!(InputCommand::Help.into_command().is_none());
    }
}
