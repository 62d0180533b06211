//! CLI argument parsing for Drainsafe

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drainsafe - cordon and drain Kubernetes nodes ahead of cloud platform maintenance
#[derive(Debug, Parser)]
#[command(name = "drainsafe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "/etc/drainsafe/config.yaml")]
    pub config: PathBuf,

    /// Node name (overrides config and NODE_NAME env)
    #[arg(long, global = true, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Pod name (overrides config and POD_NAME env)
    #[arg(long, global = true, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "DRAINSAFE_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, global = true, default_value = "false", env = "DRAINSAFE_LOG_JSON")]
    pub log_json: bool,

    /// Dry run mode - log actions but don't execute
    #[arg(long, global = true, default_value = "false")]
    pub dry_run: bool,
}

/// Process role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the cluster-wide node maintenance controller
    Controller,
    /// Run the per-node scheduled event agent
    Agent,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["drainsafe", "controller"]).unwrap();
        assert_eq!(cli.command, Command::Controller);
        assert_eq!(cli.config.to_str().unwrap(), "/etc/drainsafe/config.yaml");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.log_json);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_agent_with_flags() {
        let cli = Cli::try_parse_from([
            "drainsafe",
            "agent",
            "-c",
            "/custom/config.yaml",
            "--node-name",
            "aks-nodepool1-0",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Agent);
        assert_eq!(cli.config.to_str().unwrap(), "/custom/config.yaml");
        assert_eq!(cli.node_name.as_deref(), Some("aks-nodepool1-0"));
        assert!(cli.dry_run);
    }

    #[test]
    fn test_cli_requires_role() {
        assert!(Cli::try_parse_from(["drainsafe"]).is_err());
    }
}
