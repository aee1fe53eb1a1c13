//! `earshot config` — Configuration management commands.

use earshot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push(
                    "No API key set (set EARSHOT_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY)",
                );
            }
            if config.poller.pause_query_secs >= config.poller.force_query_secs {
                warnings.push("pause_query_secs >= force_query_secs: pause detection never fires first");
            }
            if config.poller.discovery_window_secs * 1000.0 < config.poller.tick_interval_ms as f64 {
                warnings.push("discovery_window_secs is shorter than one tick; fragments may be missed");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Agent:      {} ({})", config.agent.provider, config.agent.model);
            println!(
                "   Timers:     force {}s, pause {}s",
                config.poller.force_query_secs, config.poller.pause_query_secs
            );
            println!("   Dispatch:   {:?}", config.poller.dispatch_mode);
            println!("   Store:      {}", config.store.backend);
            println!("   Wake words: {}", config.wake_words.phrases.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.agent.api_key.is_some() {
        config.agent.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote default configuration to {}", path.display());
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = config_path();
        assert!(path.to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn default_toml_round_trips_through_validation() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        parsed.validate().unwrap();
    }
}
