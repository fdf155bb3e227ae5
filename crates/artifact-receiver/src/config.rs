use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

/// One data-plane endpoint dedicated to a single artifact kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Channel id used in logs (e.g. `csv`, `video`).
    pub id: String,
    /// Listen address.
    pub bind: SocketAddr,
    /// File extension for artifacts written by this channel, without the dot.
    pub extension: String,
    /// Directory artifacts are written to.
    pub dest_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ReceiverListenConfig {
    pub channels: Vec<ChannelConfig>,
    pub install_ctrlc: bool,
}

/// A `--channel` value before the output directory is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub extension: String,
    pub bind: SocketAddr,
}

impl ChannelSpec {
    pub fn into_config(self, dest_dir: PathBuf) -> ChannelConfig {
        ChannelConfig {
            id: self.id,
            bind: self.bind,
            extension: self.extension,
            dest_dir,
        }
    }
}

/// Parse `ID[:EXT]@ADDR`, e.g. `csv@0.0.0.0:8007` or `video:mov@0.0.0.0:8008`.
///
/// Without `:EXT` the id doubles as the extension.
pub fn parse_channel_spec(raw: &str) -> Result<ChannelSpec> {
    let (kind, addr) = raw
        .split_once('@')
        .ok_or_else(|| anyhow!("channel must look like ID[:EXT]@ADDR, got {raw:?}"))?;
    let (id, extension) = match kind.split_once(':') {
        Some((id, ext)) => (id.trim(), ext.trim().trim_start_matches('.')),
        None => (kind.trim(), kind.trim()),
    };
    if id.is_empty() || extension.is_empty() {
        return Err(anyhow!("channel id and extension must be non-empty in {raw:?}"));
    }
    let bind: SocketAddr = addr
        .trim()
        .parse()
        .with_context(|| format!("parse channel address {addr}"))?;
    Ok(ChannelSpec {
        id: id.to_string(),
        extension: extension.to_string(),
        bind,
    })
}
