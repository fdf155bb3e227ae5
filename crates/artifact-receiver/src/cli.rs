use std::net::SocketAddr;
use std::path::PathBuf;

use capture_sync_proto::Verb;
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{ChannelSpec, parse_channel_spec};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "artifact-receiver", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Connect/write timeout for `send` and `command`, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen on one or more channels and write received artifacts to disk
    Listen {
        /// Directory artifacts are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Channel as ID[:EXT]@ADDR, e.g. csv@0.0.0.0:8007 or video:mov@0.0.0.0:8008
        #[arg(long = "channel", value_parser = parse_channel_spec, required = true)]
        channels: Vec<ChannelSpec>,
    },

    /// Push a file's bytes to a channel as one payload
    Send {
        /// Channel address
        #[arg(long)]
        to: SocketAddr,

        /// File to send
        #[arg(long)]
        file: PathBuf,
    },

    /// Send a single control command to a channel
    Command {
        /// Channel address
        #[arg(long)]
        to: SocketAddr,

        verb: CliVerb,

        /// Argument, e.g. the artifact name for `file`
        #[arg(default_value = "")]
        arg: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliVerb {
    Close,
    Alive,
    File,
    Record,
}

impl From<CliVerb> for Verb {
    fn from(v: CliVerb) -> Self {
        match v {
            CliVerb::Close => Verb::Close,
            CliVerb::Alive => Verb::Alive,
            CliVerb::File => Verb::File,
            CliVerb::Record => Verb::Record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listen_with_channels() {
        let args = Args::try_parse_from([
            "artifact-receiver",
            "listen",
            "--out",
            "/tmp/takes",
            "--channel",
            "csv@0.0.0.0:8007",
            "--channel",
            "video:mov@0.0.0.0:8008",
        ])
        .unwrap();
        match args.cmd {
            Command::Listen { out, channels } => {
                assert_eq!(out, PathBuf::from("/tmp/takes"));
                assert_eq!(channels.len(), 2);
                assert_eq!(channels[1].extension, "mov");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn listen_requires_a_channel() {
        assert!(Args::try_parse_from(["artifact-receiver", "listen"]).is_err());
    }

    #[test]
    fn parses_command_verb() {
        let args = Args::try_parse_from([
            "artifact-receiver",
            "command",
            "--to",
            "127.0.0.1:8007",
            "file",
            "take_01",
        ])
        .unwrap();
        match args.cmd {
            Command::Command { verb, arg, .. } => {
                assert_eq!(Verb::from(verb), Verb::File);
                assert_eq!(arg, "take_01");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
