//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Edge Gateway - request admission pipeline for multi-tenant APIs
#[derive(Parser, Debug)]
#[command(name = "edge-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "EDGE_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "EDGE_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "EDGE_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "EDGE_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EDGE_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Validate the configuration and exit
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_means_serve() {
        let cli = Cli::parse_from(["edge-gateway"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn check_subcommand_with_config_path() {
        let cli = Cli::parse_from(["edge-gateway", "check", "--config", "/etc/gateway.yaml"]);
        assert!(matches!(cli.command, Some(Command::Check)));
        assert_eq!(
            cli.config,
            Some(PathBuf::from("/etc/gateway.yaml"))
        );
    }

    #[test]
    fn host_and_port_overrides_parse() {
        let cli = Cli::parse_from(["edge-gateway", "--host", "0.0.0.0", "--port", "9090"]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(9090));
    }
}
