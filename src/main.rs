// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use dialog_config::Config;
use dialog_coordinator::{
    reconcile_workspace, restore_dialog_hierarchy, DialogRegistry, DialogTreeStatus,
    WorkspaceLayout,
};
use dialog_core::{Dialog, Driver, DriveInput, DriverConfig};
use dialog_model::mock::EchoProvider;
use dialog_model::DialogId;
use dialog_persist::{DialogMetadata, DialogPersistence, LogStore};
use dialog_tools::{AddReminderTool, ShellCmdTool, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = dialog_config::load(cli.config.as_deref()).context("loading configuration")?;
    let workspace_root = cli
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.workspace_root));

    match cli.command.unwrap_or(Commands::Demo {
        prompt: "say hello".into(),
        agent_id: "pangu".into(),
        self_id: "demo".into(),
    }) {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Reconcile => run_reconcile(&workspace_root).await,
        Commands::Demo {
            prompt,
            agent_id,
            self_id,
        } => run_demo(&workspace_root, &config, &agent_id, &self_id, &prompt).await,
    }
}

async fn run_reconcile(workspace_root: &std::path::Path) -> anyhow::Result<()> {
    let persistence = DialogPersistence::new();
    let layout = WorkspaceLayout::new(workspace_root);
    let summary = reconcile_workspace(&persistence, &layout.status_dir(DialogTreeStatus::Active)).await?;
    tracing::info!(?summary, "reconciliation finished");
    Ok(())
}

/// Bring up the ambient plumbing (persistence, log store, tool registry,
/// driver), reconcile the workspace, then either restore an existing
/// `self_id` or start it fresh, drive one course with `prompt`, and print
/// the assistant's reply. No real `ModelProvider` is wired up to this
/// binary (this kernel's concern is orchestration, not a vendor
/// integration), so this always runs against the built-in echo provider.
async fn run_demo(
    workspace_root: &std::path::Path,
    config: &Config,
    agent_id: &str,
    self_id: &str,
    prompt: &str,
) -> anyhow::Result<()> {
    let persistence = Arc::new(DialogPersistence::new());
    let log_store = Arc::new(LogStore::new(workspace_root));
    let layout = WorkspaceLayout::new(workspace_root);
    let registry = Arc::new(DialogRegistry::new());

    reconcile_workspace(&persistence, &layout.status_dir(DialogTreeStatus::Active)).await?;

    let dialog_dir = layout.root_dialog_dir(DialogTreeStatus::Active, self_id);
    tokio::fs::create_dir_all(&dialog_dir).await?;

    let dialog = if persistence.read_metadata(&dialog_dir).await?.is_some() {
        tracing::info!(self_id, "resuming existing dialog");
        let restored = restore_dialog_hierarchy(
            &persistence,
            &log_store,
            &registry,
            &layout,
            DialogTreeStatus::Active,
            self_id,
        )
        .await?;
        restored
            .into_iter()
            .next()
            .context("restore produced no root dialog despite existing metadata")?
    } else {
        tracing::info!(self_id, agent_id, "starting new dialog");
        let id = DialogId::root(self_id);
        let dialog = Arc::new(Dialog::new(id.clone(), agent_id, config.diligence.push_max));
        persistence
            .write_metadata(
                &dialog_dir,
                &DialogMetadata {
                    id,
                    agent_id: agent_id.to_string(),
                    task_document_path: None,
                    created_at: chrono::Utc::now(),
                    disable_diligence_push: false,
                    suppress_diligence_push: false,
                    parent_self_id: None,
                    spawn: None,
                },
            )
            .await?;
        registry.insert(dialog.clone());
        dialog
    };

    let mut tools = ToolRegistry::new();
    tools.register(AddReminderTool::default());
    tools.register(ShellCmdTool);

    let driver = Driver::new(
        Arc::new(EchoProvider),
        Arc::new(tools),
        log_store,
        persistence,
        DriverConfig {
            max_retries: config.retry.max_retries,
            ..DriverConfig::default()
        },
    );

    let outcome = driver
        .drive(&dialog, &dialog_dir, DriveInput::user(prompt))
        .await?;
    tracing::info!(?outcome, "drive finished");

    let state = dialog.acquire().await;
    if let Some(dialog_model::ChatMessage::Saying { content, .. }) = state.transcript.last() {
        println!("{content}");
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
