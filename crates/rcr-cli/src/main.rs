// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rcr_core::RuleChainDsl;
use rcr_daemon::{build_app, AppState};
use rcr_registry::ComponentRegistry;
use rcr_runtime::Runtime;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rcr", version, about = "Rule-chain runtime CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the admin HTTP daemon.
    Serve {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Chain DSL operations.
    Chain {
        #[command(subcommand)]
        action: ChainAction,
    },
}

#[derive(Subcommand, Debug)]
enum ChainAction {
    /// Parse and compile-check a chain DSL file without running it.
    Validate {
        /// Path to the chain DSL JSON file.
        file: PathBuf,
    },
    /// Load a chain DSL file and dispatch one message into it.
    Inject {
        /// Path to the chain DSL JSON file.
        file: PathBuf,
        /// Chain id to dispatch into (defaults to the DSL's own id).
        #[arg(long)]
        chain: Option<String>,
        /// JSON message body to dispatch.
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Chain { action } => match action {
            ChainAction::Validate { file } => validate(&file).await,
            ChainAction::Inject { file, chain, message } => inject(&file, chain, &message).await,
        },
    }
}

fn new_runtime(debug_capacity: usize) -> Runtime {
    let registry = Arc::new(ComponentRegistry::new());
    rcr_nodes::register_builtins(&registry);
    Runtime::new(registry, HashMap::new(), debug_capacity)
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = rcr_config::load_config(config_path.as_deref()).context("load config")?;
    rcr_config::validate_config(&config).context("validate config")?;

    let runtime = Arc::new(new_runtime(config.debug_ring_capacity));
    let state = Arc::new(AppState::new(runtime));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    tracing::info!(bind = %config.listen_addr, "rcr serve listening");
    axum::serve(listener, app).await.context("serve")
}

fn read_dsl(file: &PathBuf) -> Result<RuleChainDsl> {
    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {} as chain DSL", file.display()))
}

async fn validate(file: &PathBuf) -> Result<()> {
    let dsl = read_dsl(file)?;
    let runtime = new_runtime(60);
    runtime.load_chain(&dsl).await.with_context(|| format!("compile chain from {}", file.display()))?;
    println!("chain '{}' is valid ({} node(s))", dsl.rule_chain.id, dsl.metadata.nodes.len());
    Ok(())
}

async fn inject(file: &PathBuf, chain: Option<String>, message: &str) -> Result<()> {
    let dsl = read_dsl(file)?;
    let chain_id = chain.unwrap_or_else(|| dsl.rule_chain.id.clone());
    let runtime = new_runtime(60);
    runtime.load_chain(&dsl).await.with_context(|| format!("compile chain from {}", file.display()))?;

    let body: serde_json::Value = serde_json::from_str(message).context("parse --message as JSON")?;
    let bytes = serde_json::to_vec(&body).context("re-serialize --message")?;
    let msg = rcr_core::Msg::new(0, "CLI_INJECT", rcr_core::DataType::Json, rcr_core::Metadata::new(), bytes);

    let outcomes = runtime.dispatch(&chain_id, msg).await.context("dispatch message")?;
    for outcome in outcomes {
        match outcome.err {
            Some(err) => println!("{}: {} FAILED: {err}", outcome.node_id, outcome.relation),
            None => println!("{}: {} -> {}", outcome.node_id, outcome.relation, outcome.msg.get_data().unwrap_or_default()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validate_rejects_unknown_node_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "ruleChain": {"id": "c1", "name": "c1", "root": true},
                "metadata": {"nodes": [{"id": "a", "type": "doesNotExist", "configuration": {}}], "connections": []}
            })
            .to_string(),
        )
        .unwrap();
        assert!(validate(&path).await.is_err());
    }

    #[tokio::test]
    async fn validate_accepts_a_log_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "ruleChain": {"id": "c1", "name": "c1", "root": true},
                "metadata": {"nodes": [{"id": "a", "type": "log", "configuration": {}}], "connections": []}
            })
            .to_string(),
        )
        .unwrap();
        assert!(validate(&path).await.is_ok());
    }
}
