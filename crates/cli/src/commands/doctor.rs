//! `ragbot doctor` — Diagnose configuration and upstream connectivity.

use ragbot_config::AppConfig;
use ragbot_core::provider::Provider;
use ragbot_providers::OpenAiCompatProvider;
use ragbot_rag::RetrievalClient;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 ragbot doctor");
    println!("================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults and environment (run `ragbot onboard`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  Fix the configuration and re-run doctor.");
            return Ok(());
        }
    };

    match config.validate_for_retrieval() {
        Ok(()) => {
            println!("  ✅ Knowledge base settings present");
            let client = RetrievalClient::from_config(&config.rag)?;
            match client.token_store().get_or_refresh().await {
                Ok(_) => println!("  ✅ Service account token obtained"),
                Err(e) => {
                    println!("  ❌ Token exchange failed: {e}");
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ❌ Knowledge base settings incomplete: {e}");
            issues += 1;
        }
    }

    match OpenAiCompatProvider::from_config(&config.llm) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!("  ✅ LLM endpoint reachable ({})", provider.base_url()),
            Ok(false) => {
                println!("  ⚠️  LLM endpoint answered with an error ({})", provider.base_url());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ LLM endpoint unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ {e} (set LLM_API_KEY)");
            issues += 1;
        }
    }

    if config.telegram.bot_token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        println!("  ✅ Telegram bot token configured");
    } else {
        println!("  ⚠️  No Telegram bot token (set TELEGRAM_BOT_TOKEN to use `ragbot run`)");
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
