// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use rcr_config::RuntimeConfig;
use rcr_daemon::{build_app, AppState};
use rcr_registry::ComponentRegistry;
use rcr_runtime::Runtime;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rcr-daemon", version, about = "Rule-chain runtime daemon")]
struct Args {
    /// Path to a TOML config file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the admin HTTP bind address from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = rcr_config::load_config(args.config.as_deref()).context("load config")?;
    rcr_config::validate_config(&config).context("validate config")?;

    let filter = EnvFilter::new(config.log_filter.clone());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let listen_addr = args.bind.unwrap_or_else(|| config.listen_addr.clone());
    let runtime = Arc::new(build_runtime(&config));

    if let Some(chain_dir) = &config.chain_dir {
        load_chains_from_dir(&runtime, chain_dir).await?;
    }

    let state = Arc::new(AppState::new(runtime));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;
    info!(bind = %listen_addr, "rcr-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn build_runtime(config: &RuntimeConfig) -> Runtime {
    let registry = Arc::new(ComponentRegistry::new());
    rcr_nodes::register_builtins(&registry);
    Runtime::new(registry, HashMap::new(), config.debug_ring_capacity)
}

async fn load_chains_from_dir(runtime: &Runtime, dir: &str) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await.with_context(|| format!("read chain dir {dir}"))?;
    while let Some(entry) = entries.next_entry().await.context("iterate chain dir")? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let bytes = tokio::fs::read(&path).await.with_context(|| format!("read {}", path.display()))?;
        let dsl = serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
        runtime.load_chain(&dsl).await.with_context(|| format!("load {}", path.display()))?;
        info!(path = %path.display(), "chain loaded from disk");
    }
    Ok(())
}
