pub mod ask;
pub mod doctor;
pub mod onboard;
pub mod retrieve;
pub mod run;
pub mod serve;

use ragbot_agent::{StreamingAgent, load_system_prompt};
use ragbot_config::AppConfig;
use ragbot_providers::OpenAiCompatProvider;
use ragbot_rag::{RetrievalClient, Retriever};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The process-wide retrieval client. Every retrieval call site shares it,
/// and with it a single token cache.
pub(crate) fn build_retriever(config: &AppConfig) -> Result<Arc<dyn Retriever>, Box<dyn std::error::Error>> {
    Ok(Arc::new(RetrievalClient::from_config(&config.rag)?))
}

/// Retrieval tool over `retriever` plus LLM, wired from config.
pub(crate) fn build_agent(
    config: &AppConfig,
    retriever: Arc<dyn Retriever>,
) -> Result<Arc<StreamingAgent>, Box<dyn std::error::Error>> {
    let tools = ragbot_tools::default_registry(retriever, &config.rag.tool_name);
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.llm)?);
    let system_prompt = load_system_prompt(config.llm.system_prompt_file.as_deref());

    Ok(Arc::new(
        StreamingAgent::from_config(provider, tools, &config.llm, system_prompt)
            .with_rag_tool(config.rag.tool_name.as_str()),
    ))
}

/// A token cancelled on Ctrl-C.
pub(crate) fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            trigger.cancel();
        }
    });
    token
}
