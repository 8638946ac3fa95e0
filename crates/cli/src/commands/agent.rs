//! `seqpilot agent`: interactive or single-message chat mode.

use super::{CliResult, build_runtime, load_config};
use seqpilot_agent::{ConversationHandle, ConversationPhase, SubmitError, TurnReport};
use seqpilot_config::AppConfig;
use seqpilot_core::event::DomainEvent;
use seqpilot_core::tool::truncate_chars;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast;

pub async fn run(message: Option<String>, connect: bool) -> CliResult {
    let config = load_config()?;

    // Local models need no key
    if !config.has_api_key() && config.default_provider != "ollama" {
        print_missing_key_help();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = build_runtime(&config, connect).await?;
    let renderer = tokio::spawn(render_events(runtime.events.subscribe()));
    let handle = Arc::new(ConversationHandle::new(runtime.orchestrator.clone()));

    if let Some(msg) = message {
        // Single message mode
        let report = handle.submit(&msg).await?;
        print_report(&report);
    } else {
        print_banner(&config, runtime.orchestrator.dispatcher().registry().catalog().len());
        interactive(handle).await?;
        println!();
        println!("  Goodbye!");
        println!();
    }

    renderer.abort();
    Ok(())
}

async fn interactive(handle: Arc<ConversationHandle>) -> CliResult {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = next_input(&mut lines, interrupted()).await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                handle.clear()?;
                println!("  [history cleared]");
                continue;
            }
            _ => {}
        }

        let worker = handle.clone();
        let message = input.to_string();
        let mut task = tokio::spawn(async move { worker.submit(&message).await });

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = tokio::signal::ctrl_c() => {
                    if handle.cancel() {
                        eprintln!("\n  [cancelling...]");
                    }
                }
                extra = lines.next_line() => match extra {
                    Ok(Some(text)) if !text.trim().is_empty() => {
                        eprintln!("  [{}]", SubmitError::Busy);
                    }
                    Ok(Some(_)) => {}
                    // stdin closed mid-request: let the request finish
                    Ok(None) | Err(_) => break task.await,
                },
            }
        };

        match joined {
            Ok(Ok(report)) => print_report(&report),
            Ok(Err(e)) => eprintln!("  [Error] {e}"),
            Err(e) => eprintln!("  [Error] request task failed: {e}"),
        }
    }

    Ok(())
}

/// Next line typed at the prompt, or `None` once stdin closes or `interrupt`
/// fires.
async fn next_input<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => line,
        () = interrupt => Ok(None),
    }
}

/// Resolves on Ctrl+C; never, if the handler can't be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Print transient status lines for orchestrator events until the bus closes.
async fn render_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = status_line(&event) {
                    eprintln!("  {line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Status renderer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn status_line(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::RetryScheduled {
            provider,
            attempt,
            max_attempts,
            delay_ms,
            reason,
        } => Some(format!(
            "[retry] {provider} attempt {attempt}/{max_attempts} in {delay_ms}ms ({reason})"
        )),
        DomainEvent::ProviderSwitched { from, to, reason } => {
            Some(format!("[switch] {from} -> {to} ({reason})"))
        }
        DomainEvent::ReasoningTrace { provider, content, .. } => Some(format!(
            "[thinking:{provider}] {}",
            truncate_chars(content.trim(), 200)
        )),
        DomainEvent::ToolDispatched { tool_name, .. } => Some(format!("[tool] {tool_name}...")),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let mark = if *success { "ok" } else { "failed" };
            Some(format!("[tool] {tool_name} {mark} ({duration_ms}ms)"))
        }
        DomainEvent::ToolServerDisconnected { server } => {
            Some(format!("[server] {server} disconnected"))
        }
        _ => None,
    }
}

fn print_report(report: &TurnReport) {
    println!();
    match report.state {
        ConversationPhase::Completed => {
            let text = report.final_text.as_deref().unwrap_or("(no reply)");
            for line in text.lines() {
                println!("  Assistant > {line}");
            }
        }
        ConversationPhase::Aborted => println!("  [aborted after {} round(s)]", report.rounds),
        ConversationPhase::RoundLimitReached => {
            if let Some(text) = &report.final_text {
                for line in text.lines() {
                    println!("  Assistant > {line}");
                }
            }
            println!("  [stopped: round limit of {} reached]", report.rounds);
        }
        ConversationPhase::Failed => {
            eprintln!(
                "  [Error] {}",
                report.error.as_deref().unwrap_or("request failed")
            );
            if let Some(remedy) = &report.remedy {
                eprintln!("  Hint: {remedy}");
            }
        }
        ConversationPhase::Idle | ConversationPhase::Running => {}
    }
    if !report.tool_results.is_empty() {
        let failed = report.tool_results.iter().filter(|r| !r.success).count();
        println!(
            "  ({} tool call(s), {failed} failed, via {})",
            report.tool_results.len(),
            report.provider.as_deref().unwrap_or("?")
        );
    }
    println!();
}

fn print_banner(config: &AppConfig, tool_count: usize) {
    println!();
    println!("  seqpilot agent: interactive mode");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.model_for(&config.default_provider));
    println!("  Tools:     {tool_count} available (`seqpilot tools` lists them)");
    println!("  Rounds:    up to {} per request", config.agent.max_rounds);
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a running request, or quits at the prompt.");
    println!("  Type '/clear' to reset the conversation, 'exit' to quit.");
    println!();
}

fn print_missing_key_help() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    SEQPILOT_API_KEY     (generic)");
    eprintln!("    OPENROUTER_API_KEY   (recommended)");
    eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}
