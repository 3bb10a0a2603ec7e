//! capgate - permission diagnostics.
//!
//! ```text
//! capgate <config.toml> check <user> <node>
//! capgate <config.toml> explain <user> <node>
//! ```

use anyhow::{Context, bail};
use capgate::config::{Config, validation};
use capgate::{DeclareOptions, PermissionService, SqliteStore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: capgate <config.toml> <check|explain> <user> <node>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, command, user, node] = args.as_slice() else {
        bail!(USAGE);
    };

    let config = Config::load(config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    let store = SqliteStore::open(&config.database.path)
        .await
        .with_context(|| format!("opening store at {}", config.database.path))?;

    let service = PermissionService::new(Arc::new(store), config.engine.clone());
    service.bootstrap().await.context("bootstrapping permission service")?;

    for block in &config.declare {
        let mut options = DeclareOptions::with_default(block.default);
        if let Some(description) = &block.description {
            options = options.description(description);
        }
        service
            .declare_node(&block.node, options)
            .with_context(|| format!("declaring {}", block.node))?;
    }
    info!(
        declarations = config.declare.len(),
        namespaces = service.list_namespaces().len(),
        "Catalog loaded"
    );

    match command.as_str() {
        "check" => {
            let decision = service.authorize_user(user, node).await?;
            println!("{decision}");
        }
        "explain" => {
            let trace = service.explain_user(user, node).await?;
            println!("{trace}");
            if trace.depth > 0 {
                println!("matched at depth {}", trace.depth);
            }
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }

    Ok(())
}
