//! `ragbot onboard` — First-time setup.

use ragbot_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🤖 ragbot — First-Time Setup");
    println!("============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Fill in the [rag] section, or export EVOLUTION_PROJECT_ID,");
    println!("      KNOWLEDGE_BASE_ID, KNOWLEDGE_BASE_VERSION_ID,");
    println!("      EVOLUTION_SERVICE_ACCOUNT_KEY_ID and EVOLUTION_SERVICE_ACCOUNT_KEY_SECRET");
    println!("   2. Set LLM_API_KEY and TELEGRAM_BOT_TOKEN");
    println!("   3. Run: ragbot doctor, then ragbot run\n");

    Ok(())
}
