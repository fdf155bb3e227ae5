//! Operator session-control line protocol.
//!
//! One command per line, `verb` or `verb:argument`. Replies are fixed tokens.

use std::fmt;

/// A parsed session-control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Close,
    RecordStart,
    RecordStop,
    Ping,
    /// Ask for the session state; answered with [`Reply::Status`].
    Status,
    FileName(String),
    Greet(String),
    /// Anything we do not recognise; routed to the default handler.
    Unknown(String),
}

impl SessionCommand {
    /// Parse one line. The verb is everything before the first `:`; the argument is the
    /// trimmed remainder (it may itself contain `:`).
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match line.split_once(':') {
            Some((v, a)) => (v.trim(), a.trim()),
            None => (line.trim(), ""),
        };
        match verb {
            "close" => SessionCommand::Close,
            "recordStart" => SessionCommand::RecordStart,
            "recordStop" => SessionCommand::RecordStop,
            "ping" => SessionCommand::Ping,
            "status" => SessionCommand::Status,
            "fileName" => SessionCommand::FileName(arg.to_string()),
            "greet" => SessionCommand::Greet(arg.to_string()),
            _ => SessionCommand::Unknown(line.to_string()),
        }
    }
}

/// Reply tokens written back to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Bye,
    Recording,
    Stopping,
    Pong,
    FilenameSet,
    /// `status:{state}:{name}:{take}`
    Status {
        state: String,
        name: String,
        take: u32,
    },
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Bye => f.write_str("BYE"),
            Reply::Recording => f.write_str("recording"),
            Reply::Stopping => f.write_str("stopping"),
            Reply::Pong => f.write_str("pong"),
            Reply::FilenameSet => f.write_str("filename_set"),
            Reply::Status { state, name, take } => write!(f, "status:{state}:{name}:{take}"),
            Reply::Error(msg) => write!(f, "error:{msg}"),
        }
    }
}
