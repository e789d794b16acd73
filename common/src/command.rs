//! Command grammar
//!
//! ```text
//! verb
//! verb("arg1")
//! verb("arg1","arg2")
//! verb(true|false)
//! ```
//!
//! Parsing happens in two steps. [`RawCommand::tokenize`] never fails: it
//! splits the verb from the argument list and pulls out up to two quoted
//! arguments plus an optional boolean literal. [`Command::try_from`] then maps
//! the verb onto a typed variant, checking that the arguments it needs exist.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

/// Longest command line (in bytes) accepted from a peer, terminator included.
pub const COMMAND_MAX_LEN: usize = 128;

/// Bytes of ATT header taken out of every notification.
pub const ATT_HEADER: usize = 3;

/// Smallest chunk the notifier will cut, whatever the negotiated MTU.
pub const MIN_CHUNK: usize = 20;

/// MTU every link starts at before negotiation.
pub const DEFAULT_MTU: u16 = 23;

/// Quoted arguments beyond this count are ignored.
pub const MAX_ARGS: usize = 2;

pub const CONNECT_USAGE: &str = r#"connect("ssid","pass")"#;
pub const AUTOCONNECT_USAGE: &str = "autoconnect(true|false)";
pub const SETNAME_USAGE: &str = r#"setname("name")"#;

/// Signatures listed by `help`, in display order.
pub const HELP_SIGNATURES: &[&str] = &[
    CONNECT_USAGE,
    "reconnect()",
    "disconnect()",
    "forget()",
    "status()",
    AUTOCONNECT_USAGE,
    SETNAME_USAGE,
    "reset()",
    "restart()",
    r#"echo("msg")"#,
    "help()",
];

/// A tokenized command line. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCommand {
    pub verb: String,
    /// Quoted arguments in left-to-right order, at most [`MAX_ARGS`].
    pub args: Vec<String>,
    /// Set when the argument list is exactly `true` or `false`.
    pub flag: Option<bool>,
}

impl RawCommand {
    pub fn tokenize(input: &str) -> Self {
        let line = input.trim_end_matches(|c: char| c == '\r' || c == '\n');

        let (verb, arg_list) = match line.split_once('(') {
            Some((verb, rest)) => {
                let rest = match rest.rfind(')') {
                    Some(end) => &rest[..end],
                    None => rest,
                };
                (verb, rest)
            }
            None => (line, ""),
        };

        RawCommand {
            verb: verb.to_string(),
            args: quoted_args(arg_list),
            flag: bool_literal(arg_list),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Walk successive quote pairs. An unterminated quote takes the rest of the
/// list and stops the scan.
fn quoted_args(mut rest: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(MAX_ARGS);

    while args.len() < MAX_ARGS {
        let Some(open) = rest.find('"') else {
            break;
        };
        let body = &rest[open + 1..];

        match body.find('"') {
            Some(close) => {
                args.push(body[..close].to_string());
                rest = &body[close + 1..];
            }
            None => {
                args.push(body.to_string());
                break;
            }
        }
    }

    args
}

fn bool_literal(arg_list: &str) -> Option<bool> {
    match arg_list.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// A fully parsed command, one variant per verb.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Echo(String),
    Connect { ssid: String, password: String },
    Reconnect,
    Disconnect,
    Forget,
    Status,
    AutoConnect(bool),
    SetName(String),
    Reset,
    Restart,
    Help,
    /// Toggle the board's diagnostic outputs.
    Led,
}

/// Why a line could not become a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Known verb, missing or malformed arguments. Carries the expected signature.
    Usage(&'static str),
    /// Verb not in the table.
    Unknown(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Usage(signature) => write!(f, "usage: {}", signature),
            ParseError::Unknown(verb) => write!(f, "unknown: {}", verb),
        }
    }
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        Command::try_from(RawCommand::tokenize(input))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Echo(_) => "echo",
            Command::Connect { .. } => "connect",
            Command::Reconnect => "reconnect",
            Command::Disconnect => "disconnect",
            Command::Forget => "forget",
            Command::Status => "status",
            Command::AutoConnect(_) => "autoconnect",
            Command::SetName(_) => "setname",
            Command::Reset => "reset",
            Command::Restart => "restart",
            Command::Help => "help",
            Command::Led => "led",
        }
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = ParseError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let RawCommand {
            verb,
            mut args,
            flag,
        } = raw;

        let command = match verb.as_str() {
            "echo" => Command::Echo(args.drain(..).next().unwrap_or_default()),
            "connect" => {
                if args.len() < 2 {
                    return Err(ParseError::Usage(CONNECT_USAGE));
                }
                let password = args.swap_remove(1);
                let ssid = args.swap_remove(0);
                Command::Connect { ssid, password }
            }
            "reconnect" => Command::Reconnect,
            "disconnect" => Command::Disconnect,
            "forget" => Command::Forget,
            "status" => Command::Status,
            "autoconnect" => match flag {
                Some(value) => Command::AutoConnect(value),
                None => return Err(ParseError::Usage(AUTOCONNECT_USAGE)),
            },
            "setname" => match args.drain(..).next() {
                Some(name) => Command::SetName(name),
                None => return Err(ParseError::Usage(SETNAME_USAGE)),
            },
            "reset" => Command::Reset,
            "restart" => Command::Restart,
            "help" => Command::Help,
            "led" => Command::Led,
            _ => return Err(ParseError::Unknown(verb)),
        };

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_tokenize_bare_verb() {
        let raw = RawCommand::tokenize("status");
        assert_eq!(raw.verb, "status");
        assert!(raw.args.is_empty());
        assert_eq!(raw.flag, None);

        let raw = RawCommand::tokenize("status()\r\n");
        assert_eq!(raw.verb, "status");
        assert!(raw.args.is_empty());
    }

    #[test]
    fn test_tokenize_quoted_args_in_order() {
        let raw = RawCommand::tokenize(r#"connect("Home Net","hunter2")"#);
        assert_eq!(raw.verb, "connect");
        assert_eq!(raw.args, vec!["Home Net".to_string(), "hunter2".to_string()]);
        assert_eq!(raw.flag, None);
    }

    #[test]
    fn test_tokenize_ignores_extra_args() {
        let raw = RawCommand::tokenize(r#"connect("a","b","c")"#);
        assert_eq!(raw.args, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_tokenize_keeps_parens_inside_quotes() {
        // Only the last ')' closes the list
        let raw = RawCommand::tokenize(r#"echo("(hi)")"#);
        assert_eq!(raw.verb, "echo");
        assert_eq!(raw.arg(0), Some("(hi)"));
    }

    #[test]
    fn test_tokenize_unterminated_quote_takes_rest() {
        let raw = RawCommand::tokenize(r#"setname("half"#);
        assert_eq!(raw.arg(0), Some("half"));
        assert_eq!(raw.arg(1), None);
    }

    #[test]
    fn test_tokenize_bool_literal() {
        assert_eq!(RawCommand::tokenize("autoconnect(true)").flag, Some(true));
        assert_eq!(RawCommand::tokenize("autoconnect(false)").flag, Some(false));
        assert_eq!(RawCommand::tokenize(r#"autoconnect("true")"#).flag, None);
        assert_eq!(RawCommand::tokenize("autoconnect(yes)").flag, None);
    }

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            Command::parse(r#"connect("S","P")"#),
            Ok(Command::Connect {
                ssid: "S".to_string(),
                password: "P".to_string()
            })
        );
    }

    #[test]
    fn test_parse_connect_missing_args() {
        assert_eq!(Command::parse("connect()"), Err(ParseError::Usage(CONNECT_USAGE)));
        assert_eq!(Command::parse("connect"), Err(ParseError::Usage(CONNECT_USAGE)));
        assert_eq!(
            Command::parse(r#"connect("only")"#),
            Err(ParseError::Usage(CONNECT_USAGE))
        );
    }

    #[test]
    fn test_parse_empty_password_is_allowed() {
        assert_eq!(
            Command::parse(r#"connect("Open","")"#),
            Ok(Command::Connect {
                ssid: "Open".to_string(),
                password: String::new()
            })
        );
    }

    #[test]
    fn test_parse_autoconnect() {
        assert_eq!(Command::parse("autoconnect(false)"), Ok(Command::AutoConnect(false)));
        assert_eq!(
            Command::parse("autoconnect()"),
            Err(ParseError::Usage(AUTOCONNECT_USAGE))
        );
    }

    #[test]
    fn test_parse_setname() {
        assert_eq!(
            Command::parse(r#"setname("My Device")"#),
            Ok(Command::SetName("My Device".to_string()))
        );
        assert_eq!(Command::parse("setname()"), Err(ParseError::Usage(SETNAME_USAGE)));
    }

    #[test]
    fn test_parse_echo_without_arg_is_empty() {
        assert_eq!(Command::parse("echo()"), Ok(Command::Echo(String::new())));
    }

    #[test]
    fn test_parse_unknown_verb() {
        assert_eq!(
            Command::parse("foo()"),
            Err(ParseError::Unknown("foo".to_string()))
        );
        // Verbs are case-sensitive
        assert_eq!(
            Command::parse("STATUS"),
            Err(ParseError::Unknown("STATUS".to_string()))
        );
        // So is whitespace around them
        assert_eq!(
            Command::parse(" status()"),
            Err(ParseError::Unknown(" status".to_string()))
        );
        assert_eq!(
            Command::parse("help ()"),
            Err(ParseError::Unknown("help ".to_string()))
        );
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::Usage(CONNECT_USAGE).to_string(),
            r#"usage: connect("ssid","pass")"#
        );
        assert_eq!(ParseError::Unknown("foo".to_string()).to_string(), "unknown: foo");
    }

    #[test]
    fn test_every_help_signature_parses_to_its_verb() {
        for signature in HELP_SIGNATURES {
            let filled = signature
                .replace("true|false", "true")
                .replace(r#""ssid","pass""#, r#""s","p""#);
            let command = Command::parse(&filled).unwrap();
            assert_eq!(signature.split('(').next(), Some(command.verb()));
        }
    }
}
