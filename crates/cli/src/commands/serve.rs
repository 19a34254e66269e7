//! `ragbot serve` — Start the HTTP gateway.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    config.validate_for_retrieval()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🤖 ragbot gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Tool: {}", config.rag.tool_name);

    let shutdown = super::shutdown_on_ctrl_c();
    ragbot_gateway::start(&config, shutdown)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    Ok(())
}
