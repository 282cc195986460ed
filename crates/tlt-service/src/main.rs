//! Coordinator binary: Task Manager, agent loop, ingress HTTP surface, and
//! the gateway front-end, in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tlt_agent::{Agent, AgentConfig};
use tlt_core::config::Config;
use tlt_core::logging;
use tlt_gateway::{GatewayClient, GatewayState, PolicyEngine, ServiceRegistry};
use tlt_providers::{ModelClient, ModelClientConfig};
use tlt_service::{TaskManager, TaskManagerConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    let log_dir = config.data_root.join("logs");
    let _guard = logging::init(config.debug, Some(&log_dir));
    if let Err(err) = run(config).await {
        tracing::error!(error = %format!("{err:#}"), "coordinator failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let stop = CancellationToken::new();

    // Gateway front-end, hosted in-process.
    let policy_path = config.data_root.join("gateway_policy.json");
    let policy = PolicyEngine::load(&policy_path).context("load gateway policy")?;
    let registry = ServiceRegistry::from_services(&config.services);
    let gateway_state = GatewayState::new(registry, policy, config.debug);
    let gateway_router = tlt_gateway::router(gateway_state);
    let gateway_listener = tokio::net::TcpListener::bind(&config.gateway_bind)
        .await
        .with_context(|| format!("bind gateway {}", config.gateway_bind))?;
    tracing::info!(bind = %config.gateway_bind, "gateway listening");

    // The agent calls tools back through the gateway it shares a process with.
    let model = config.model.resolve_api_key().ok().map(|api_key| {
        Arc::new(ModelClient::new(ModelClientConfig {
            api_key,
            base_url: config.model.base_url.clone(),
            model: config.model.model.clone(),
            max_tokens: config.model.max_tokens,
        }))
    });
    if model.is_none() {
        tracing::warn!("no model API key; reasoning falls back to the analysis table");
    }
    let agent_config = AgentConfig {
        agent_id: format!("tlt-agent-{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")),
        recursion_limit: config.recursion_limit,
        abandon_age_minutes: config.abandon_age_minutes,
        idle_wait: Duration::from_millis(250),
        debug: config.debug,
    };
    let (agent, agent_handle) = Agent::new(
        agent_config,
        GatewayClient::new(config.gateway_url.clone()),
        model,
    );

    let manager = Arc::new(TaskManager::new(
        TaskManagerConfig {
            rate_limit_per_minute: config.rate_limit_per_minute,
            queue_soft_ceiling: config.queue_soft_ceiling,
            task_timeout: config.task_timeout(),
            max_completed_tasks: 1000,
        },
        agent_handle.clone(),
    ));

    let ingress_router = tlt_service::http::router(Arc::clone(&manager));
    let ingress_listener = tokio::net::TcpListener::bind(&config.ingress_bind)
        .await
        .with_context(|| format!("bind ingress {}", config.ingress_bind))?;
    tracing::info!(bind = %config.ingress_bind, "ingress listening");

    let agent_task = tokio::spawn(agent.run());
    let worker_task = {
        let manager = Arc::clone(&manager);
        let stop = stop.clone();
        tokio::spawn(async move { manager.run_worker(stop).await })
    };
    let gateway_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(gateway_listener, gateway_router).await {
            tracing::error!(error = %err, "gateway server exited");
        }
    });
    let ingress_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(ingress_listener, ingress_router).await {
            tracing::error!(error = %err, "ingress server exited");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("install ctrl-c handler")?;
    tracing::info!("shutdown requested");
    stop.cancel();
    agent_handle.stop.cancel();

    // Let in-flight work settle before tearing the servers down.
    let _ = worker_task.await;
    let _ = agent_task.await;
    gateway_task.abort();
    ingress_task.abort();
    Ok(())
}
