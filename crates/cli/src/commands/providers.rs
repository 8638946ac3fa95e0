//! `seqpilot providers`: configured providers, fallback chain and retry policy.

use super::{CliResult, load_config};
use seqpilot_core::provider::Provider;
use seqpilot_providers::{RetryPolicy, build_from_config};

pub async fn run(check: bool) -> CliResult {
    let config = load_config()?;
    let router = build_from_config(&config).map_err(|e| format!("Provider setup failed: {e}"))?;

    println!("Providers");
    println!("=========");
    for id in router.list() {
        let Some(profile) = router.get(id) else {
            continue;
        };
        let marker = if id == router.default_id() { "*" } else { " " };
        let key = if config.api_key_for(id).is_some() { "key set" } else { "no key" };
        println!(
            "  {marker} {id:<14} model={} timeout={}s ({key})",
            profile.model, profile.config.timeout_secs
        );
        if !profile.config.fallback_chain.is_empty() {
            println!("      falls back to: {}", profile.config.fallback_chain.join(" -> "));
        }
    }

    let chain: Vec<String> = router
        .chain(router.default_id())
        .into_iter()
        .map(|p| p.id)
        .collect();
    println!();
    if chain.is_empty() {
        println!("  Active chain: (none, default provider '{}' is not available)", router.default_id());
    } else {
        println!("  Active chain: {}", chain.join(" -> "));
    }

    if check {
        println!();
        println!("Health");
        for profile in router.chain(router.default_id()) {
            let status = match profile.provider.health_check().await {
                Ok(true) => "reachable".to_string(),
                Ok(false) => "answered with an error status (check key and api_url)".to_string(),
                Err(e) => format!("unreachable: {e}"),
            };
            println!("  {:<14} {status}", profile.id);
        }
    }

    let policy = RetryPolicy::from_config(&config.retry);
    println!();
    println!("Retry policy");
    println!("  attempts per provider: {}", policy.max_attempts);
    println!(
        "  delay: {}ms base, {}ms max, jitter {:.0}%",
        policy.base_delay_ms,
        policy.max_delay_ms,
        policy.jitter * 100.0
    );

    Ok(())
}
