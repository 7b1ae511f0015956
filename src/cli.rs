// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-agent coding assistant workspace server.
#[derive(Debug, Parser)]
#[command(name = "ads", version, about)]
pub struct Cli {
    /// Workspace root (default: detected from the current directory).
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Log to stderr at debug level (overrides ADS_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the WebSocket gateway (the default when no subcommand is given).
    Serve,
    /// Print the resolved configuration and exit.
    ShowConfig,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_defaults_to_serve() {
        let cli = Cli::parse_from(["ads"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn workspace_flag_parses() {
        let cli = Cli::parse_from(["ads", "--workspace", "/ws", "serve"]);
        assert_eq!(cli.workspace, Some(PathBuf::from("/ws")));
        assert!(matches!(cli.command, Some(Commands::Serve)));
    }
}
