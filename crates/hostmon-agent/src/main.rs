use anyhow::Result;
use hostmon_agent::agent::Agent;
use hostmon_agent::config::AgentConfig;
use hostmon_agent::registry::CommandRegistry;
use hostmon_client::HttpControlPlane;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("hostmon={}", config.log_level).parse()?),
        )
        .init();

    tracing::info!(agent_id = %config.agent_id, "hostmon-agent starting");

    let control = Arc::new(HttpControlPlane::new(
        &config.server_url,
        &config.agent_id,
        &config.agent_token,
    )?);
    let registry = Arc::new(CommandRegistry::default());
    let agent = Agent::new(
        config,
        control,
        registry,
        hostmon_agent::agent::MetricSources::new(),
    );

    agent.start().await?;

    wait_for_shutdown_signal().await?;
    agent.shutdown().await;

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("Received interrupt signal"),
            _ = terminate.recv() => tracing::info!("Received termination signal"),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received interrupt signal");
    }
    Ok(())
}
