//! Minimal OSC 1.0 codec for the control plane.
//!
//! Supported argument tags: `i` `f` `h` `d` `s` `b` `T` `F`. Strings and blobs are padded
//! to 4-byte boundaries. Inbound bundles are flattened to their messages; outbound traffic
//! is always plain messages.

use std::io;

const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// A single OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl OscArg {
    fn tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Long(_) => b'h',
            OscArg::Float(_) => b'f',
            OscArg::Double(_) => b'd',
            OscArg::Str(_) => b's',
            OscArg::Blob(_) => b'b',
            OscArg::Bool(true) => b'T',
            OscArg::Bool(false) => b'F',
        }
    }

    /// Borrow the argument as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the argument (ints, floats and numeric strings).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(v) => Some(f64::from(*v)),
            OscArg::Long(v) => Some(*v as f64),
            OscArg::Float(v) => Some(f64::from(*v)),
            OscArg::Double(v) => Some(*v),
            OscArg::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::Str(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::Str(v)
    }
}

/// An OSC message: address pattern plus typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<OscArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Address without the leading `/`, which is how handlers are keyed.
    pub fn verb(&self) -> &str {
        self.addr.trim_start_matches('/')
    }

    /// String argument at `idx`, if present.
    pub fn str_arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).and_then(OscArg::as_str)
    }

    /// Encode into a datagram.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        if !self.addr.starts_with('/') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("osc address must start with '/': {:?}", self.addr),
            ));
        }

        let mut out = Vec::with_capacity(64);
        push_padded_str(&mut out, self.addr.as_bytes());

        let mut tags = Vec::with_capacity(self.args.len() + 1);
        tags.push(b',');
        tags.extend(self.args.iter().map(OscArg::tag));
        push_padded_str(&mut out, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => push_padded_str(&mut out, s.as_bytes()),
                OscArg::Blob(b) => {
                    let len: i32 = b.len().try_into().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "osc blob too large")
                    })?;
                    out.extend_from_slice(&len.to_be_bytes());
                    out.extend_from_slice(b);
                    pad_to_4(&mut out);
                }
                OscArg::Bool(_) => {}
            }
        }
        Ok(out)
    }

    /// Decode a single message (not a bundle).
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut cur = Reader { buf, off: 0 };
        let addr = cur.padded_str()?;
        if !addr.starts_with('/') {
            return Err(invalid(format!("bad osc address {addr:?}")));
        }

        // Type tag string is optional in very old senders; treat as no arguments.
        if cur.remaining() == 0 {
            return Ok(Self {
                addr,
                args: Vec::new(),
            });
        }
        let tags = cur.padded_str()?;
        let Some(tags) = tags.strip_prefix(',') else {
            return Err(invalid("osc type tags must start with ','"));
        };

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.bytes() {
            let arg = match tag {
                b'i' => OscArg::Int(i32::from_be_bytes(cur.array()?)),
                b'h' => OscArg::Long(i64::from_be_bytes(cur.array()?)),
                b'f' => OscArg::Float(f32::from_be_bytes(cur.array()?)),
                b'd' => OscArg::Double(f64::from_be_bytes(cur.array()?)),
                b's' => OscArg::Str(cur.padded_str()?),
                b'b' => OscArg::Blob(cur.blob()?),
                b'T' => OscArg::Bool(true),
                b'F' => OscArg::Bool(false),
                other => return Err(invalid(format!("unsupported osc tag {:?}", other as char))),
            };
            args.push(arg);
        }

        Ok(Self { addr, args })
    }
}

/// Decode a datagram into its messages, flattening bundles.
pub fn decode_packet(buf: &[u8]) -> io::Result<Vec<OscMessage>> {
    let mut out = Vec::new();
    decode_into(buf, &mut out, 0)?;
    Ok(out)
}

fn decode_into(buf: &[u8], out: &mut Vec<OscMessage>, depth: usize) -> io::Result<()> {
    if depth > 8 {
        return Err(invalid("osc bundles nested too deeply"));
    }
    let Some(rest) = buf.strip_prefix(BUNDLE_TAG) else {
        out.push(OscMessage::decode(buf)?);
        return Ok(());
    };

    let mut cur = Reader { buf: rest, off: 0 };
    let _timetag: [u8; 8] = cur.array()?;
    while cur.remaining() > 0 {
        let len = i32::from_be_bytes(cur.array()?);
        let len = usize::try_from(len).map_err(|_| invalid("negative bundle element size"))?;
        let element = cur.take(len)?;
        decode_into(element, out, depth + 1)?;
    }
    Ok(())
}

fn push_padded_str(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
    pad_to_4(out);
}

fn pad_to_4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.off
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(invalid("truncated osc packet"));
        }
        let s = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let s = self.take(N)?;
        let mut a = [0u8; N];
        a.copy_from_slice(s);
        Ok(a)
    }

    fn skip_padding(&mut self) {
        let aligned = (self.off + 3) & !3;
        self.off = aligned.min(self.buf.len());
    }

    fn padded_str(&mut self) -> io::Result<String> {
        let rest = &self.buf[self.off..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("unterminated osc string"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| invalid("osc string not utf-8"))?
            .to_string();
        self.off += nul + 1;
        self.skip_padding();
        Ok(s)
    }

    fn blob(&mut self) -> io::Result<Vec<u8>> {
        let len = i32::from_be_bytes(self.array()?);
        let len = usize::try_from(len).map_err(|_| invalid("negative osc blob size"))?;
        let data = self.take(len)?.to_vec();
        self.skip_padding();
        Ok(data)
    }
}
