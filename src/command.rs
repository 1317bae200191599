//! Administrative commands issued in-band through chat messages.
//!
//! # Grammar
//!
//! ```text
//! command := prefix verb (flag value)*
//! flag    := "--" name | "-" letter
//! value   := word | '"' text '"'
//! ```
//!
//! | Verb           | Flags                                                        |
//! |----------------|--------------------------------------------------------------|
//! | `ping`         | none (bare `.p` also works)                                  |
//! | `reload`       | none                                                         |
//! | `exit`         | none                                                         |
//! | `add-redirect` | `--source/-s`, `--dest/-d` (comma separated, repeatable), `--title/-t`, `--color/-c` |
//!
//! Example: `.eb add-redirect -s 111,222 -d 333 --title "Patch notes"`

use std::collections::VecDeque;
use thiserror::Error;

/// Legacy liveness check, accepted without the prefix.
const BARE_PING: &str = ".p";

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Reload,
    Exit,
    AddRedirect {
        sources: Vec<String>,
        destinations: Vec<String>,
        title: Option<String>,
        color: Option<u32>,
    },
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Reload => "reload",
            Command::Exit => "exit",
            Command::AddRedirect { .. } => "add-redirect",
        }
    }
}

/// Errors produced while parsing a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("no command given")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownVerb(String),

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("flag {0} needs a value")]
    MissingValue(String),

    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("{verb} does not take flag {flag}")]
    UnknownFlag { verb: &'static str, flag: String },

    #[error("{verb} requires --{flag}")]
    MissingFlag {
        verb: &'static str,
        flag: &'static str,
    },

    #[error("invalid value for --{flag}: {value}")]
    InvalidValue { flag: &'static str, value: String },
}

/// Parse `text` as a command.
///
/// Returns `None` when the text is not addressed to the bot at all, so
/// ordinary messages can be told apart from malformed commands.
pub fn parse(text: &str, prefix: &str) -> Option<Result<Command, CommandError>> {
    let text = text.trim();

    if text == BARE_PING {
        return Some(Ok(Command::Ping));
    }

    let rest = text.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    Some(tokenize(rest).and_then(parse_tokens))
}

fn parse_tokens(tokens: Vec<String>) -> Result<Command, CommandError> {
    let mut tokens: VecDeque<String> = tokens.into();
    let verb = tokens.pop_front().ok_or(CommandError::Empty)?;

    match verb.to_ascii_lowercase().as_str() {
        "ping" | "p" => no_arguments(Command::Ping, tokens),
        "reload" => no_arguments(Command::Reload, tokens),
        "exit" | "shutdown" => no_arguments(Command::Exit, tokens),
        "add-redirect" | "addredirect" | "add" => parse_add_redirect(tokens),
        _ => Err(CommandError::UnknownVerb(verb)),
    }
}

fn no_arguments(command: Command, mut tokens: VecDeque<String>) -> Result<Command, CommandError> {
    match tokens.pop_front() {
        None => Ok(command),
        Some(extra) if is_flag(&extra) => Err(CommandError::UnknownFlag {
            verb: command.verb(),
            flag: extra,
        }),
        Some(extra) => Err(CommandError::UnexpectedArgument(extra)),
    }
}

fn parse_add_redirect(mut tokens: VecDeque<String>) -> Result<Command, CommandError> {
    const VERB: &str = "add-redirect";

    let mut sources = Vec::new();
    let mut destinations = Vec::new();
    let mut title = None;
    let mut color = None;

    while let Some(flag) = tokens.pop_front() {
        if !is_flag(&flag) {
            return Err(CommandError::UnexpectedArgument(flag));
        }
        let value = tokens
            .pop_front()
            .filter(|v| !is_flag(v))
            .ok_or_else(|| CommandError::MissingValue(flag.clone()))?;

        match flag.as_str() {
            "--source" | "--sources" | "-s" => sources.extend(split_ids(&value)),
            "--dest" | "--destination" | "--destinations" | "-d" => {
                destinations.extend(split_ids(&value))
            }
            "--title" | "-t" => title = Some(value),
            "--color" | "-c" => color = Some(parse_color(&value)?),
            _ => return Err(CommandError::UnknownFlag { verb: VERB, flag }),
        }
    }

    if sources.is_empty() {
        return Err(CommandError::MissingFlag {
            verb: VERB,
            flag: "source",
        });
    }
    if destinations.is_empty() {
        return Err(CommandError::MissingFlag {
            verb: VERB,
            flag: "dest",
        });
    }

    Ok(Command::AddRedirect {
        sources,
        destinations,
        title,
        color,
    })
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1
}

fn split_ids(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Colors may be decimal (`30975`) or hex (`#0078ff`, `0x0078ff`).
fn parse_color(value: &str) -> Result<u32, CommandError> {
    let parsed = if let Some(hex) = value
        .strip_prefix('#')
        .or_else(|| value.strip_prefix("0x"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };

    parsed.map_err(|_| CommandError::InvalidValue {
        flag: "color",
        value: value.to_string(),
    })
}

/// Split on whitespace, keeping double-quoted runs together.
fn tokenize(input: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }

    Ok(tokens)
}
