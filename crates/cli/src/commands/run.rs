//! `ragbot run` — Telegram bot.

use ragbot_agent::{Orchestrator, TurnSettings};
use ragbot_channels::{TelegramChannel, TelegramConfig};
use std::sync::Arc;
use tracing::{error, info};

pub async fn run(with_gateway: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    config.validate_for_bot()?;

    let retriever = super::build_retriever(&config)?;
    let agent = super::build_agent(&config, retriever.clone())?;
    let channel = Arc::new(TelegramChannel::new(TelegramConfig::from_settings(
        &config.telegram,
    )?));
    let orchestrator = Arc::new(Orchestrator::new(
        agent.clone(),
        channel,
        TurnSettings::from_config(&config.stream),
    ));

    println!("🤖 ragbot");
    println!("   Model: {}", agent.model());
    println!("   Knowledge base tool: {}", config.rag.tool_name);

    let shutdown = super::shutdown_on_ctrl_c();

    let gateway = with_gateway.then(|| {
        let config = config.clone();
        let shutdown = shutdown.clone();
        let retriever = retriever.clone();
        println!("   Gateway: {}:{}", config.gateway.host, config.gateway.port);
        tokio::spawn(async move {
            if let Err(e) = ragbot_gateway::start_with(retriever, &config, shutdown).await {
                error!(error = %e, "Gateway failed");
            }
        })
    });

    orchestrator.serve(shutdown.clone()).await?;
    shutdown.cancel();
    if let Some(handle) = gateway {
        let _ = handle.await;
    }

    info!("Bot stopped");
    Ok(())
}
