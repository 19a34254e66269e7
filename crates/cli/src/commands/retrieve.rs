//! `ragbot retrieve` — Query the knowledge base directly.

use ragbot_rag::RetrievalClient;

pub async fn run(query: String, limit: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    config.validate_for_retrieval()?;

    let client = RetrievalClient::from_config(&config.rag)?;
    let request = client.knowledge_base().request(query.trim(), limit);
    let result = client.execute(&request).await?;

    if result.results.is_empty() {
        eprintln!("No documents found.");
    }
    print!("{}", result.render());
    Ok(())
}
