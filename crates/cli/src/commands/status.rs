//! `earshot status` — Show system status.

use earshot_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("👂 Earshot Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Store:        {}", config.store.backend);
    if config.store.backend == "sqlite" {
        println!("  Database:     {}", config.store.database_path().display());
    }
    println!("  Agent:        {} ({})", config.agent.provider, config.agent.model);
    println!("  API URL:      {}", config.agent.api_url);
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Force query:  {}s", config.poller.force_query_secs);
    println!("  Pause query:  {}s", config.poller.pause_query_secs);
    println!("  Tick:         {} ms", config.poller.tick_interval_ms);
    println!("  Dispatch:     {:?}", config.poller.dispatch_mode);
    println!("  Wake words:   {}", config.wake_words.phrases.join(", "));

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `earshot config init` to create one");
    }

    let db = config.store.database_path();
    if config.store.backend == "sqlite" && !db.exists() {
        println!("  ⚠️  Database not created yet — it appears on first `earshot run` or `earshot say`");
    }

    Ok(())
}
