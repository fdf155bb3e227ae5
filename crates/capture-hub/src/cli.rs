use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "capture-hub", version = VERSION)]
pub struct Args {
    /// Hub config file (TOML); defaults to config.toml next to the executable
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Session-control bind address, e.g. 127.0.0.1:8765
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Print capture devices reported by ffmpeg and exit
    #[arg(long)]
    pub list_devices: bool,

    /// ffmpeg binary used by --list-devices
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "capture-hub",
            "--config",
            "/etc/hub.toml",
            "--bind",
            "0.0.0.0:9100",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/hub.toml")));
        assert_eq!(args.bind, Some("0.0.0.0:9100".parse().unwrap()));
        assert!(!args.list_devices);
        assert_eq!(args.ffmpeg, "ffmpeg");
    }

    #[test]
    fn version_carries_sha_and_date() {
        let date = env!("BUILD_DATE");
        assert_eq!(date.len(), 10);
        assert_eq!(date.matches('-').count(), 2);
        assert!(!env!("GIT_SHA").is_empty());
        assert!(VERSION.ends_with(&format!(", {date})")));
    }

    #[test]
    fn rejects_bad_bind() {
        assert!(Args::try_parse_from(["capture-hub", "--bind", "nowhere"]).is_err());
    }
}
