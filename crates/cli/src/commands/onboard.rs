//! `seqpilot onboard`: first-time setup.

use super::CliResult;
use seqpilot_config::AppConfig;

pub async fn run() -> CliResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let plugins_dir = AppConfig::plugins_dir();

    println!("seqpilot: first-time setup");
    println!("==========================\n");

    for dir in [&config_dir, &plugins_dir] {
        if dir.exists() {
            println!("  Directory exists: {}", dir.display());
        } else {
            std::fs::create_dir_all(dir)?;
            println!("  Created {}", dir.display());
        }
    }

    let audit_path = AppConfig::default().audit_log_path();
    if let Some(audit_dir) = audit_path.parent()
        && !audit_dir.exists()
    {
        std::fs::create_dir_all(audit_dir)?;
        println!("  Created {}", audit_dir.display());
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("\n  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Set SEQPILOT_API_KEY or add api_key to {}", config_path.display());
        println!("   2. Drop plugin directories into {}", plugins_dir.display());
        println!("   3. Run: seqpilot agent\n");
    }

    Ok(())
}
