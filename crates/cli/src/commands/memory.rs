//! `seqpilot memory`: inspect or clear the tool-call audit log.

use super::{CliResult, load_config};
use seqpilot_core::memory::MemoryRecorder;
use seqpilot_core::tool::truncate_chars;
use seqpilot_memory::{recorder_from_config, summarize};

pub async fn recent(limit: usize) -> CliResult {
    let config = load_config()?;
    let recorder = recorder_from_config(&config);
    let records = recorder.recent(limit).await?;

    if records.is_empty() {
        println!("No tool calls recorded ({} backend).", recorder.name());
        return Ok(());
    }

    for r in &records {
        let mark = if r.success { "ok  " } else { "FAIL" };
        println!(
            "  {} {mark} {:<22} {:>6}ms  {}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.tool_name,
            r.execution_time_ms,
            truncate_chars(&r.result_summary, 60)
        );
    }

    Ok(())
}

pub async fn stats() -> CliResult {
    let config = load_config()?;
    let recorder = recorder_from_config(&config);
    let total = recorder.count().await?;
    let records = recorder.recent(total).await?;
    let summary = summarize(&records);

    println!("Tool-call audit");
    println!("===============");
    println!("  Backend:   {}", recorder.name());
    if config.memory.backend == "file" {
        println!("  Log file:  {}", config.audit_log_path().display());
    }
    println!("  Retention: {} records", config.memory.retention);
    println!("  Calls:     {} ({} failed)", summary.total_calls, summary.failed_calls);

    if !summary.tools.is_empty() {
        println!();
        println!("  {:<22} {:>6} {:>8} {:>10}", "tool", "calls", "success", "mean ms");
        for t in &summary.tools {
            println!(
                "  {:<22} {:>6} {:>7.0}% {:>10.1}",
                t.tool_name,
                t.calls,
                t.success_rate() * 100.0,
                t.mean_latency_ms
            );
        }
    }

    Ok(())
}

pub async fn clear(confirm: bool) -> CliResult {
    if !confirm {
        println!("This deletes every audit record. Re-run with --confirm to proceed.");
        return Ok(());
    }

    let config = load_config()?;
    let recorder = recorder_from_config(&config);
    let count = recorder.count().await?;
    recorder.clear().await?;
    println!("Cleared {count} record(s).");

    Ok(())
}
