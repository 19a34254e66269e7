//! `ragbot ask` — Single-question or interactive console mode.

use ragbot_agent::{Orchestrator, TurnSettings, TurnStatus};
use ragbot_channels::ConsoleChannel;
use std::sync::Arc;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    config.validate_for_agent()?;

    let agent = super::build_agent(&config, super::build_retriever(&config)?)?;
    let orchestrator = Arc::new(Orchestrator::new(
        agent,
        Arc::new(ConsoleChannel::new()),
        TurnSettings::from_config(&config.stream),
    ));
    let shutdown = super::shutdown_on_ctrl_c();

    match message {
        Some(msg) => {
            let outcome = orchestrator.run_turn("console", &msg, None, &shutdown).await?;
            println!();
            if let TurnStatus::Failed(reason) = outcome.status {
                return Err(reason.into());
            }
        }
        None => {
            println!("🤖 ragbot — ask about the knowledge base (type 'exit' to quit)");
            orchestrator.serve(shutdown).await?;
            println!();
        }
    }

    Ok(())
}
