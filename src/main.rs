mod client;
mod langs;
mod opt;
mod prelude;
mod runner;
mod tester;
mod workspace;

use std::sync::Arc;

use clap::Parser;

use client::config::{AgentConfig, SharedAgentData};
use langs::LanguageRegistry;
use prelude::agent_id;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opts = opt::Opts::parse();
    let cfg = AgentConfig {
        dispatcher_url: opts.dispatcher_url,
        workspace_root: opts.workspace_root,
        reconnect_delay_ms: opts.reconnect_delay_ms,
    };

    let registry = Arc::new(match &opts.languages {
        Some(path) => LanguageRegistry::from_file(path)?,
        None => LanguageRegistry::builtin(),
    });
    tracing::info!(languages = ?registry.tags(), "Loaded language profiles");

    let docker = bollard::Docker::connect_with_local_defaults()?;

    // A crash leaves orphaned workspaces behind; clear them before
    // accepting the first job.
    workspace::sweep_root(&cfg.workspace_root).await;

    let data = Arc::new(SharedAgentData::new(cfg, docker, registry));
    tracing::info!(agent_id = %agent_id(), "Agent starting");

    tokio::select! {
        _ = client::connect_loop(data.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(running_jobs = data.running_jobs(), "Shutting down");
        }
    }
    Ok(())
}
