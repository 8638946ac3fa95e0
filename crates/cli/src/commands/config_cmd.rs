//! `seqpilot config validate`.

use super::CliResult;
use seqpilot_config::AppConfig;

pub async fn validate() -> CliResult {
    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("No config file at {} (defaults apply).", config_path.display());
        println!("Run `seqpilot onboard` to create one.");
        return Ok(());
    }

    match AppConfig::load() {
        Ok(config) => {
            println!("Config is valid: {}", config_path.display());
            println!("  Default provider: {}", config.default_provider);
            println!("  Providers:        {}", config.providers.len());
            println!("  Tool servers:     {}", config.tool_servers.servers.len());
            println!("  Memory backend:   {}", config.memory.backend);
            if !config.has_api_key() {
                println!("  Warning: no API key configured");
            }
            Ok(())
        }
        Err(e) => Err(format!("Invalid config: {e}").into()),
    }
}
