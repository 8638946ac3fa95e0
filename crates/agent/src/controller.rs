//! Conversation loop controller.
//!
//! [`Orchestrator`] holds what every conversation shares read-only: the
//! resilient provider caller, the tool dispatcher, the completion detector and
//! the loop settings. [`Orchestrator::run_turn`] drives one user request over
//! an explicitly passed [`ConversationState`]:
//!
//! 1. Build the system prompt from the live catalog and send the history
//! 2. Parse tool calls out of the reply
//! 3. If there are any, dispatch them in order and fold the results back in
//! 4. Otherwise ask the detector whether the task is done; if it is not sure,
//!    nudge the model with the continue prompt
//!
//! The cancellation token is checked before every provider call and before
//! every tool dispatch, and the provider call itself races it. A tool that is
//! already running is allowed to finish, but nothing from that round is
//! folded into history.
//!
//! [`ConversationHandle`] wraps one state for hosts: single-flight submission
//! (a second message while running is refused, not queued) and `cancel()`.

use crate::completion::CompletionDetector;
use crate::prompt::build_system_prompt;
use crate::state::{ConversationPhase, ConversationState, TurnReport};
use chrono::Utc;
use seqpilot_config::{AgentSettings, AppConfig, CompletionConfig};
use seqpilot_core::event::{DomainEvent, EventBus};
use seqpilot_core::message::Message;
use seqpilot_core::provider::ProviderRequest;
use seqpilot_providers::{ResilienceError, ResilientCaller};
use seqpilot_tools::Dispatcher;
use seqpilot_tools::parser::{parse_tool_calls, strip_tool_calls};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Appended to history when a request is cancelled.
pub const ABORT_MESSAGE: &str = "Conversation aborted by the user.";

pub struct Orchestrator {
    caller: Arc<ResilientCaller>,
    dispatcher: Arc<Dispatcher>,
    detector: CompletionDetector,
    settings: AgentSettings,
    provider_id: String,
    temperature: f32,
    max_tokens: Option<u32>,
    events: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(
        caller: Arc<ResilientCaller>,
        dispatcher: Arc<Dispatcher>,
        settings: AgentSettings,
        completion: CompletionConfig,
    ) -> Self {
        let provider_id = caller.router().default_id().to_string();
        Self {
            caller,
            dispatcher,
            detector: CompletionDetector::new(completion),
            settings,
            provider_id,
            temperature: 0.7,
            max_tokens: None,
            events: None,
        }
    }

    /// Wire an orchestrator from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        caller: Arc<ResilientCaller>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self::new(
            caller,
            dispatcher,
            config.agent.clone(),
            config.completion.clone(),
        )
        .with_provider(&config.default_provider)
        .with_sampling(config.default_temperature, Some(config.default_max_tokens))
    }

    /// Primary provider for every request.
    pub fn with_provider(mut self, id: &str) -> Self {
        self.provider_id = id.to_string();
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run one user request to a terminal state. Never fails; the outcome is
    /// in the report and in `state.phase`.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> TurnReport {
        state.reset_if_terminal();
        state.request_id += 1;
        state.phase = ConversationPhase::Running;
        state.messages.push(Message::user(user_message));

        let request_id = state.request_id;
        let mut report = TurnReport::new(request_id);
        info!(request_id, provider = %self.provider_id, "Processing request");

        let phase = self.drive(state, &mut report, cancel).await;

        if phase == ConversationPhase::Aborted {
            state.messages.push(Message::assistant(ABORT_MESSAGE));
        }
        state.phase = phase;
        report.state = phase;
        report.rounds = state.round;

        info!(request_id, state = %phase, rounds = state.round, "Request finished");
        self.publish(DomainEvent::ConversationFinished {
            request_id,
            state: phase.as_str().to_string(),
            rounds: state.round,
            timestamp: Utc::now(),
        });
        report
    }

    async fn drive(
        &self,
        state: &mut ConversationState,
        report: &mut TurnReport,
        cancel: &CancellationToken,
    ) -> ConversationPhase {
        let request_id = state.request_id;

        loop {
            if cancel.is_cancelled() {
                return ConversationPhase::Aborted;
            }
            if state.round >= self.settings.max_rounds {
                warn!(request_id, max_rounds = self.settings.max_rounds, "Round limit reached");
                return ConversationPhase::RoundLimitReached;
            }
            state.round += 1;
            debug!(request_id, round = state.round, "Starting round");
            self.publish(DomainEvent::RoundStarted {
                request_id,
                round: state.round,
                timestamp: Utc::now(),
            });

            let registry = self.dispatcher.registry();
            let system = Message::system(build_system_prompt(
                &self.settings,
                &registry.catalog(),
                &registry.plugin_docs(),
            ));
            let mut messages = Vec::with_capacity(state.messages.len() + 1);
            messages.push(system);
            messages.extend(state.messages.iter().cloned());

            let outcome = self
                .caller
                .call_with_resilience(&self.provider_id, cancel, |profile| ProviderRequest {
                    model: profile.model.clone(),
                    messages: messages.clone(),
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                })
                .await;

            let response = match outcome {
                Ok(response) => response,
                Err(ResilienceError::Cancelled) => return ConversationPhase::Aborted,
                Err(e) => {
                    warn!(request_id, error = %e, "Provider call failed");
                    self.publish(DomainEvent::ErrorOccurred {
                        context: format!("request {request_id}"),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    report.remedy = Some(e.remedy());
                    report.error = Some(e.to_string());
                    return ConversationPhase::Failed;
                }
            };

            report.provider = Some(response.provider.clone());
            if let Some(reasoning) = response.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
                self.publish(DomainEvent::ReasoningTrace {
                    request_id,
                    provider: response.provider.clone(),
                    content: reasoning.to_string(),
                });
            }

            // Tool calls are parsed before completion is considered
            let calls = parse_tool_calls(&response.content);
            state.messages.push(Message::assistant(response.content.clone()));
            report.final_text = Some(strip_tool_calls(&response.content));

            if calls.is_empty() {
                let decision = self.detector.evaluate(&response.content, 0);
                debug!(
                    request_id,
                    confidence = decision.confidence,
                    signals = ?decision.signals,
                    "Completion check"
                );
                if decision.complete {
                    return ConversationPhase::Completed;
                }
                state
                    .messages
                    .push(Message::user(self.settings.continue_prompt.clone()));
                continue;
            }

            debug!(request_id, count = calls.len(), "Dispatching tool calls");
            let mut round_results = Vec::with_capacity(calls.len());
            for call in &calls {
                if cancel.is_cancelled() {
                    break;
                }
                self.publish(DomainEvent::ToolDispatched {
                    request_id,
                    tool_name: call.name.clone(),
                });
                round_results.push(self.dispatcher.execute(call).await);
            }

            if cancel.is_cancelled() {
                info!(request_id, finished = round_results.len(), "Cancelled during dispatch; discarding round results");
                report.tool_results.extend(round_results);
                return ConversationPhase::Aborted;
            }

            for result in round_results {
                state
                    .messages
                    .push(Message::tool(result.tool_name.clone(), result.to_prompt_content()));
                report.tool_results.push(result);
            }
        }
    }
}

/// Returned when a message is submitted while a request is running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("A request is already running; wait for it to finish or cancel it")]
    Busy,
}

/// One conversation, as seen by a host.
pub struct ConversationHandle {
    orchestrator: Arc<Orchestrator>,
    state: tokio::sync::Mutex<ConversationState>,
    active: Mutex<Option<CancellationToken>>,
}

impl ConversationHandle {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            state: tokio::sync::Mutex::new(ConversationState::new()),
            active: Mutex::new(None),
        }
    }

    /// Run a user message to completion. Refused with `Busy` if a request is
    /// already running on this conversation.
    pub async fn submit(&self, message: &str) -> Result<TurnReport, SubmitError> {
        let mut state = self.state.try_lock().map_err(|_| SubmitError::Busy)?;

        let token = CancellationToken::new();
        let _active = ActiveRequest::install(&self.active, token.clone());
        Ok(self.orchestrator.run_turn(&mut state, message, &token).await)
    }

    /// Cancel the running request. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        match self.active.lock() {
            Ok(active) => match active.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// A copy of the message history. Waits for a running request to finish.
    pub async fn history(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn phase(&self) -> ConversationPhase {
        self.state.lock().await.phase
    }

    /// Drop the history. Refused while a request is running.
    pub fn clear(&self) -> Result<(), SubmitError> {
        let mut state = self.state.try_lock().map_err(|_| SubmitError::Busy)?;
        *state = ConversationState {
            request_id: state.request_id,
            ..ConversationState::new()
        };
        Ok(())
    }
}

/// Publishes the active token for `cancel()` and withdraws it on drop, even
/// if the submitting future is dropped mid-request.
struct ActiveRequest<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl<'a> ActiveRequest<'a> {
    fn install(slot: &'a Mutex<Option<CancellationToken>>, token: CancellationToken) -> Self {
        if let Ok(mut active) = slot.lock() {
            *active = Some(token);
        }
        Self { slot }
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        // A dropped submission must not leave its provider call running
        if let Ok(mut active) = self.slot.lock()
            && let Some(token) = active.take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use seqpilot_config::ProviderConfig;
    use seqpilot_core::error::ProviderError;
    use seqpilot_core::memory::MemoryRecorder;
    use seqpilot_core::message::Role;
    use seqpilot_core::provider::{Provider, ProviderResponse};
    use seqpilot_core::tool::ToolOutput;
    use seqpilot_memory::InMemoryRecorder;
    use seqpilot_providers::{ProviderProfile, ProviderRouter, RetryPolicy};
    use seqpilot_tools::{FnTool, ToolRegistry};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies from a script; says "Task completed." once it runs out.
    struct ScriptedProvider {
        script: std::sync::Mutex<VecDeque<Result<String, ProviderError>>>,
        requests: std::sync::Mutex<Vec<ProviderRequest>>,
        hang: bool,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                requests: std::sync::Mutex::new(Vec::new()),
                hang: false,
            })
        }

        fn replies(replies: &[&str]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(VecDeque::new()),
                requests: std::sync::Mutex::new(Vec::new()),
                hang: true,
            })
        }

        fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, index: usize) -> ProviderRequest {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let content = match next {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e),
                None => "Task completed.".into(),
            };
            Ok(ProviderResponse {
                content,
                reasoning: None,
                usage: None,
                model: request.model,
                provider: String::new(),
            })
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_local(Arc::new(FnTool::new(
            "get_current_state",
            "Current browser view",
            |_| async { Ok(ToolOutput::text("chr1:1-5000, 3 tracks")) },
        )));
        registry.register_local(Arc::new(FnTool::new("navigate", "Jump to a region", |args| async move {
            Ok(ToolOutput::text(format!("moved to {}", args["region"].as_str().unwrap_or("?"))))
        })));
        registry
    }

    fn handle_with(
        provider: Arc<ScriptedProvider>,
        registry: ToolRegistry,
        settings: AgentSettings,
    ) -> (Arc<ConversationHandle>, Arc<InMemoryRecorder>) {
        let mut router = ProviderRouter::new("mock");
        router.register(ProviderProfile {
            id: "mock".into(),
            provider,
            model: "mock-model".into(),
            config: ProviderConfig::default(),
        });
        let caller = ResilientCaller::new(
            Arc::new(router),
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter: 0.0,
            },
        );
        let recorder = Arc::new(InMemoryRecorder::new(100));
        let dispatcher = Dispatcher::new(Arc::new(registry), recorder.clone());
        let orchestrator = Orchestrator::new(
            Arc::new(caller),
            Arc::new(dispatcher),
            settings,
            CompletionConfig::default(),
        );
        (Arc::new(ConversationHandle::new(Arc::new(orchestrator))), recorder)
    }

    fn handle(provider: Arc<ScriptedProvider>) -> (Arc<ConversationHandle>, Arc<InMemoryRecorder>) {
        handle_with(provider, registry(), AgentSettings::default())
    }

    #[tokio::test]
    async fn tool_round_then_completion() {
        let provider = ScriptedProvider::replies(&[
            r#"Let me check. {"tool_name":"get_current_state","parameters":{}}"#,
            "Task completed successfully.",
        ]);
        let (conv, recorder) = handle(provider.clone());

        let report = conv.submit("What am I looking at?").await.unwrap();
        assert_eq!(report.state, ConversationPhase::Completed);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.request_id, 1);
        assert_eq!(report.tool_results.len(), 1);
        assert!(report.tool_results[0].success);
        assert_eq!(report.final_text.as_deref(), Some("Task completed successfully."));
        assert_eq!(report.provider.as_deref(), Some("mock"));
        assert_eq!(recorder.count().await.unwrap(), 1);

        let roles: Vec<Role> = conv.history().await.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        // Round 2 saw the tool result, behind a fresh system prompt
        let second = provider.request(1);
        assert_eq!(second.messages[0].role, Role::System);
        assert!(second.messages[0].content.contains("get_current_state"));
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("chr1:1-5000"));
    }

    #[tokio::test]
    async fn completion_claim_with_tool_call_keeps_going() {
        let provider = ScriptedProvider::replies(&[
            r#"Task completed. {"tool_name":"navigate","parameters":{"region":"chr2:1-10"}}"#,
            "All done.",
        ]);
        let (conv, _) = handle(provider.clone());
        let report = conv.submit("Go to chr2").await.unwrap();
        assert_eq!(report.state, ConversationPhase::Completed);
        assert_eq!(report.rounds, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn calls_dispatched_in_textual_order() {
        let provider = ScriptedProvider::replies(&[concat!(
            r#"{"tool_name":"navigate","parameters":{"region":"chr1:1-100"}}"#,
            r#"{"tool_name":"navigate","parameters":{"region":"chr3:1-100"}}"#
        )]);
        let (conv, _) = handle(provider);
        let report = conv.submit("Visit both").await.unwrap();
        let values: Vec<String> = report
            .tool_results
            .iter()
            .map(|r| r.value.as_ref().unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["moved to chr1:1-100", "moved to chr3:1-100"]);
    }

    #[tokio::test]
    async fn undecided_round_gets_continue_prompt() {
        let provider = ScriptedProvider::replies(&["I'll look into the annotation", "Task completed."]);
        let (conv, _) = handle(provider);
        let report = conv.submit("Annotate").await.unwrap();
        assert_eq!(report.state, ConversationPhase::Completed);
        assert_eq!(report.rounds, 2);

        let history = conv.history().await;
        let nudge = &history[2];
        assert_eq!(nudge.role, Role::User);
        assert_eq!(nudge.content, AgentSettings::default().continue_prompt);
    }

    #[tokio::test]
    async fn round_limit_is_a_soft_stop() {
        let call = r#"{"tool_name":"get_current_state","parameters":{}}"#;
        let provider = ScriptedProvider::replies(&[call, call, call, call, call]);
        let settings = AgentSettings {
            max_rounds: 3,
            ..AgentSettings::default()
        };
        let (conv, _) = handle_with(provider.clone(), registry(), settings);

        let report = conv.submit("Loop forever").await.unwrap();
        assert_eq!(report.state, ConversationPhase::RoundLimitReached);
        assert_eq!(report.rounds, 3);
        assert!(report.error.is_none());
        assert_eq!(provider.call_count(), 3);
        assert_eq!(report.tool_results.len(), 3);
        // Partial conversation kept
        assert_eq!(conv.history().await.len(), 7);
    }

    #[tokio::test]
    async fn unknown_tool_fed_back_for_self_correction() {
        let provider = ScriptedProvider::replies(&[
            r#"{"tool_name":"navigat","parameters":{"region":"chr1:1-9"}}"#,
            r#"{"tool_name":"navigate","parameters":{"region":"chr1:1-9"}}"#,
            "Task completed.",
        ]);
        let (conv, _) = handle(provider.clone());
        let report = conv.submit("Go").await.unwrap();
        assert_eq!(report.state, ConversationPhase::Completed);
        assert!(!report.tool_results[0].success);
        assert_eq!(report.tool_results[0].suggestions[0], "navigate");
        assert!(report.tool_results[1].success);

        let second = provider.request(1);
        let feedback = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(feedback.content.contains("Did you mean: navigate?"));
    }

    #[tokio::test]
    async fn fatal_provider_error_fails_with_remedy() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Http {
            status: 401,
            message: "invalid api key".into(),
        })]);
        let (conv, _) = handle(provider.clone());
        let report = conv.submit("Hello").await.unwrap();
        assert_eq!(report.state, ConversationPhase::Failed);
        assert!(report.error.unwrap().contains("401"));
        assert!(report.remedy.unwrap().contains("API key"));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(conv.phase().await, ConversationPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_provider_call() {
        let provider = ScriptedProvider::hanging();
        let (conv, _) = handle(provider.clone());

        let task = {
            let conv = conv.clone();
            tokio::spawn(async move { conv.submit("Slow question").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(conv.is_running());
        assert!(conv.cancel());

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state, ConversationPhase::Aborted);
        assert_eq!(provider.call_count(), 1);
        assert!(!conv.is_running());

        let history = conv.history().await;
        assert_eq!(history.last().unwrap().content, ABORT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_dispatch_discards_round() {
        let finished = Arc::new(AtomicBool::new(false));
        let navigations = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        {
            let finished = finished.clone();
            registry.register_local(Arc::new(FnTool::new("blast_search", "slow", move |_| {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(ToolOutput::text("3 hits"))
                }
            })));
            let navigations = navigations.clone();
            registry.register_local(Arc::new(FnTool::new("navigate", "counted", move |_| {
                let navigations = navigations.clone();
                async move {
                    navigations.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::text("moved"))
                }
            })));
        }
        let provider = ScriptedProvider::replies(&[concat!(
            r#"{"tool_name":"blast_search","parameters":{"sequence":"ACGT"}}"#,
            r#"{"tool_name":"navigate","parameters":{"region":"chr1:1-9"}}"#
        )]);
        let (conv, recorder) = handle_with(provider.clone(), registry, AgentSettings::default());

        let task = {
            let conv = conv.clone();
            tokio::spawn(async move { conv.submit("Blast it").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        conv.cancel();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state, ConversationPhase::Aborted);
        // The running tool finished, the queued one never started
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(navigations.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.count().await.unwrap(), 1);
        assert_eq!(provider.call_count(), 1);

        let history = conv.history().await;
        assert!(history.iter().all(|m| m.role != Role::Tool));
        assert_eq!(history.last().unwrap().content, ABORT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn second_submission_is_refused_while_running() {
        let provider = ScriptedProvider::hanging();
        let (conv, _) = handle(provider);

        let task = {
            let conv = conv.clone();
            tokio::spawn(async move { conv.submit("first").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(conv.submit("second").await.unwrap_err(), SubmitError::Busy);
        assert_eq!(conv.clear().unwrap_err(), SubmitError::Busy);

        conv.cancel();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state, ConversationPhase::Aborted);
        // The refused message never reached history
        assert!(conv.history().await.iter().all(|m| m.content != "second"));
    }

    #[tokio::test]
    async fn next_request_resets_round_counter() {
        let provider = ScriptedProvider::replies(&[
            r#"{"tool_name":"get_current_state","parameters":{}}"#,
            "Task completed.",
            "Task completed.",
        ]);
        let (conv, _) = handle(provider);
        let first = conv.submit("one").await.unwrap();
        assert_eq!((first.request_id, first.rounds), (1, 2));
        let second = conv.submit("two").await.unwrap();
        assert_eq!((second.request_id, second.rounds), (2, 1));
        assert!(!conv.cancel());
    }

    #[tokio::test]
    async fn events_for_a_request() {
        let provider = ScriptedProvider::replies(&[
            r#"{"tool_name":"get_current_state","parameters":{}}"#,
            "Task completed.",
        ]);
        let mut router = ProviderRouter::new("mock");
        router.register(ProviderProfile {
            id: "mock".into(),
            provider,
            model: "mock-model".into(),
            config: ProviderConfig::default(),
        });
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let caller = ResilientCaller::new(Arc::new(router), RetryPolicy::default());
        let dispatcher = Dispatcher::new(Arc::new(registry()), Arc::new(InMemoryRecorder::new(10)))
            .with_events(bus.clone());
        let orchestrator = Orchestrator::new(
            Arc::new(caller),
            Arc::new(dispatcher),
            AgentSettings::default(),
            CompletionConfig::default(),
        )
        .with_events(bus.clone());

        let mut state = ConversationState::new();
        let report = orchestrator
            .run_turn(&mut state, "state?", &CancellationToken::new())
            .await;
        assert!(report.is_success());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::RoundStarted { .. } => "round",
                DomainEvent::ToolDispatched { .. } => "dispatched",
                DomainEvent::ToolExecuted { .. } => "executed",
                DomainEvent::ConversationFinished { .. } => "finished",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["round", "dispatched", "executed", "round", "finished"]);
    }
}
