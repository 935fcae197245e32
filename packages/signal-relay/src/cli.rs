use clap::Parser;
use std::path::PathBuf;

/// Signal relay - bridges websocket sources into a streaming platform and back
#[derive(Parser, Debug)]
#[command(name = "signal-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Plugin configuration file (defaults to ./plugin.json when present)
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen port, overriding the configuration and environment
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    pub bind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::parse_from(["signal-relay", "--config", "relay.json", "-p", "9100"]);
        assert_eq!(cli.config, Some(PathBuf::from("relay.json")));
        assert_eq!(cli.port, Some(9100));
        assert!(cli.bind.is_none());
    }
}
