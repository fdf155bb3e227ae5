//! Data-plane framing.
//!
//! Message format:
//! - len:  u32 BE
//! - body: [u8; len]
//!
//! A body that starts with [`COMMAND_MARKER`] is always a command, `VERB!ARGUMENT` after the
//! marker. Anything else is artifact bytes. Artifacts can therefore never start with the
//! marker; senders own that constraint.

use std::fmt;
use std::io::{self, Read, Write};

/// Reserved prefix that turns a message body into a command.
pub const COMMAND_MARKER: &[u8] = b"COMMAND:";

/// Separates verb and argument inside a command body.
pub const ARG_SEPARATOR: char = '!';

/// Control verbs understood by a transfer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Stop serving and release the listener.
    Close,
    /// Liveness check; logged only.
    Alive,
    /// Set the pending artifact name.
    File,
    /// A payload is about to follow.
    Record,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Close => "CLOSE",
            Verb::Alive => "ALIVE",
            Verb::File => "FILE",
            Verb::Record => "RECORD",
        }
    }

    pub fn parse(s: &str) -> io::Result<Self> {
        let v = match s {
            "CLOSE" => Verb::Close,
            "ALIVE" => Verb::Alive,
            "FILE" => Verb::File,
            "RECORD" => Verb::Record,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown command verb {s:?}"),
                ));
            }
        };
        Ok(v)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded data-plane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    Command { verb: Verb, argument: String },
    Payload(Vec<u8>),
}

/// Encode a message body into a single buffer (prefix + body).
pub fn encode_message(body: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Build the body of a command message.
pub fn encode_command(verb: Verb, argument: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMAND_MARKER.len() + verb.as_str().len() + 1 + argument.len());
    out.extend_from_slice(COMMAND_MARKER);
    out.extend_from_slice(verb.as_str().as_bytes());
    out.push(ARG_SEPARATOR as u8);
    out.extend_from_slice(argument.as_bytes());
    out
}

/// Write one length-prefixed message.
pub fn write_message(mut w: impl Write, body: &[u8]) -> io::Result<()> {
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Write one command message.
pub fn write_command(w: impl Write, verb: Verb, argument: &str) -> io::Result<()> {
    write_message(w, &encode_command(verb, argument))
}

/// Read one message.
///
/// Returns `Ok(None)` when the peer closed cleanly between messages. A peer that closes
/// inside a message yields `ConnectionReset`; a malformed command yields `InvalidData`.
pub fn read_message(mut r: impl Read) -> io::Result<Option<TransferMessage>> {
    let Some(len) = read_len_prefix(&mut r)? else {
        return Ok(None);
    };

    let mut body = Vec::new();
    let got = (&mut r).take(u64::from(len)).read_to_end(&mut body)?;
    if got != len as usize {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            format!("peer closed after {got} of {len} bytes"),
        ));
    }

    decode_body(body).map(Some)
}

/// Classify a complete message body as command or payload.
pub fn decode_body(body: Vec<u8>) -> io::Result<TransferMessage> {
    let Some(rest) = body.strip_prefix(COMMAND_MARKER) else {
        return Ok(TransferMessage::Payload(body));
    };

    let text = std::str::from_utf8(rest)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "command not utf-8"))?;
    let (verb, argument) = text.split_once(ARG_SEPARATOR).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("command without '{ARG_SEPARATOR}' separator"),
        )
    })?;

    Ok(TransferMessage::Command {
        verb: Verb::parse(verb)?,
        argument: argument.to_string(),
    })
}

/// Read the 4-byte prefix, tolerating partial reads. `None` on clean EOF before any byte.
fn read_len_prefix(r: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0usize;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("peer closed after {filled} of 4 prefix bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u32::from_be_bytes(buf)))
}
