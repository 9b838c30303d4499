//! Console walkthrough of a gated agent turn.
//!
//! Run with: cargo run -p console-demo [config.toml]
//!
//! Uses the in-memory store by default. Build with `--features redis` to run
//! against the Redis instance named by the config (or `AGENT_STATE_REDIS_URL`).

use std::{path::Path, sync::Arc};

use agent_state_core::{AgentResponse, InterruptDirective, KeyValueStore};
use agent_state_executor::ScriptedExecutor;
use agent_state_session::{Coordinator, CoordinatorConfig, InvokeRequest};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CoordinatorConfig::load(Path::new(&path))?,
        None => {
            let mut config = CoordinatorConfig::default();
            config.apply_env();
            config
        }
    };

    #[cfg(feature = "redis")]
    let store = Arc::new(
        agent_state_session::storage::RedisStore::connect(&config.redis_url).await?,
    );
    #[cfg(not(feature = "redis"))]
    let store = Arc::new(agent_state_session::storage::MemoryStore::new());

    run(store, config).await
}

async fn run<S: KeyValueStore>(store: Arc<S>, config: CoordinatorConfig) -> anyhow::Result<()> {
    let executor = ScriptedExecutor::new();
    let coordinator = Coordinator::new(store, executor.clone(), config);
    let user_id = "demo-user";

    coordinator
        .write_memory(user_id, "Keeps reports under /tmp/reports.")
        .await;

    executor
        .push_interrupt("delete_file", json!({ "path": "/tmp/reports/old.txt" }))
        .await;
    let paused = coordinator
        .invoke(InvokeRequest::new(user_id, "Tidy up my old reports."))
        .await?;
    print_response("invoke", &paused)?;

    let session_id = paused.session_id.clone();
    let status = coordinator.status(user_id, &session_id).await?;
    println!("status: {}", serde_json::to_string_pretty(&status)?);

    let resumed = coordinator
        .resume(InterruptDirective::new(user_id, &session_id, "accept"))
        .await?;
    print_response("resume", &resumed)?;

    let follow_up = coordinator
        .invoke(InvokeRequest::new(user_id, "Thanks!").session(&session_id))
        .await?;
    print_response("invoke", &follow_up)?;

    let info = coordinator.system_info().await?;
    println!("system: {}", serde_json::to_string_pretty(&info)?);

    coordinator.cleanup().await?;
    Ok(())
}

fn print_response(step: &str, response: &AgentResponse) -> anyhow::Result<()> {
    println!("{step}: {}", serde_json::to_string_pretty(response)?);
    Ok(())
}
