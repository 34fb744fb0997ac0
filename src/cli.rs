// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dialogd",
    about = "Dialog orchestration kernel for a multi-agent conversational runtime",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override the workspace root (where `.dialogs/` lives)
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit
    ShowConfig,

    /// Run a single-shot smoke dialog against the built-in echo provider
    /// and print the reply. Useful for verifying a deployment end to end
    /// without wiring up a real model provider.
    Demo {
        /// The prompt to send
        prompt: String,
        /// Agent id for the root dialog
        #[arg(long, default_value = "pangu")]
        agent_id: String,
        /// Self id for the root dialog (reused across runs to resume it)
        #[arg(long, default_value = "demo")]
        self_id: String,
    },

    /// Reconcile every dialog under the workspace's active tree and print a
    /// summary, then exit. Run this once on process startup in production;
    /// exposed standalone here for operational inspection.
    Reconcile,
}
