//! `seqpilot tools`: the live tool catalog.

use super::{CliResult, build_registry, load_config};
use seqpilot_core::event::EventBus;
use std::sync::Arc;

pub async fn run(connect: bool) -> CliResult {
    let config = load_config()?;
    let events = Arc::new(EventBus::default());
    let registry = build_registry(&config, &events, connect).await;
    let catalog = registry.catalog();
    let counts = catalog.counts;

    println!("Available tools");
    println!("===============");
    println!(
        "  {} total: {} local, {} plugin, {} remote",
        counts.total(),
        counts.local,
        counts.plugin,
        counts.remote
    );
    println!();

    for entry in &catalog.entries {
        println!(
            "  {:<24} [{}:{}] {}",
            entry.definition.name, entry.source, entry.origin, entry.definition.description
        );
    }

    let servers = registry.servers();
    if !servers.is_empty() {
        println!();
        println!("Tool servers");
        for server in servers {
            let status = if server.is_connected() {
                format!("connected, {} tool(s)", server.tools().len())
            } else {
                "not connected".to_string()
            };
            println!("  {:<24} {} ({status})", server.name(), server.address());
        }
        if !connect && !config.tool_servers.auto_connect {
            println!("  (pass --connect or set tool_servers.auto_connect to connect)");
        }
    }

    let docs = registry.plugin_docs();
    if !docs.is_empty() {
        println!();
        println!("Plugin notes");
        for (name, text) in docs {
            println!("  {name}:");
            for line in text.lines() {
                println!("    {line}");
            }
        }
    }

    for server in registry.servers() {
        server.disconnect().await;
    }

    Ok(())
}
