//! Retry and provider failover.
//!
//! [`ResilientCaller`] wraps every provider call with exponential backoff and,
//! once a provider's attempt budget is spent, fails over along that
//! provider's configured `fallback_chain`. Retryability comes from each
//! provider's own `ProviderConfig::is_retryable`; transport failures with no
//! status are always transient. Non-retryable statuses stop everything at once.

use crate::router::{ProviderProfile, ProviderRouter};
use seqpilot_config::{ProviderConfig, RetryConfig};
use seqpilot_core::error::ProviderError;
use seqpilot_core::event::{DomainEvent, EventBus};
use seqpilot_core::provider::{ProviderRequest, ProviderResponse};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff schedule for one provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per provider, including the first (default 3).
    pub max_attempts: u32,
    /// Base delay in milliseconds (default 1000).
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default 30000).
    pub max_delay_ms: u64,
    /// Random spread as a fraction of the delay (default 0.3).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }

    /// Un-jittered delay after failed attempt `retry` (0-indexed).
    pub fn base_delay_for_retry(&self, retry: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * 2f64.powi(retry.min(31) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Jittered delay, clamped to the cap and never shorter than `previous`.
    pub fn delay_for_retry(&self, retry: u32, previous: Duration) -> Duration {
        let base = self.base_delay_for_retry(retry).as_millis() as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        let jittered = (base * factor).min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(jittered as u64).max(previous)
    }
}

/// Why a resilient call gave up.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// A non-retryable status; no retry and no fallback were attempted.
    #[error("Provider '{provider}' rejected the request: {error}")]
    Fatal {
        provider: String,
        error: ProviderError,
    },

    /// Every provider in the chain used up its attempts.
    #[error("All providers exhausted; last error from '{provider}': {error}")]
    Exhausted {
        provider: String,
        error: ProviderError,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("No usable provider for '{0}'")]
    UnknownProvider(String),
}

impl ResilienceError {
    /// A suggested fix, shown alongside the error.
    pub fn remedy(&self) -> String {
        match self {
            Self::Fatal { provider, error } => match error.status() {
                Some(401) | Some(403) => format!(
                    "Check the API key for '{provider}' (providers.{provider}.api_key or SEQPILOT_API_KEY)."
                ),
                Some(404) => format!(
                    "Check the model name and api_url configured for '{provider}'."
                ),
                Some(400) => format!(
                    "The request was rejected by '{provider}'; check the model and max_tokens settings."
                ),
                _ => format!("Check the configuration of provider '{provider}'."),
            },
            Self::Exhausted { .. } => {
                "All providers are unavailable right now. Try again later or add a fallback_chain."
                    .into()
            }
            Self::Cancelled => "Submit a new message to start again.".into(),
            Self::UnknownProvider(id) => {
                format!("Add a [providers.{id}] section or pick another default_provider.")
            }
        }
    }
}

/// Whether a failure on this provider may be retried.
pub fn is_transient(config: &ProviderConfig, error: &ProviderError) -> bool {
    match error {
        ProviderError::Http { status, .. } => config.is_retryable(*status),
        ProviderError::Network(_) | ProviderError::Timeout(_) => true,
        ProviderError::InvalidResponse(_) => true,
        ProviderError::NotConfigured(_) => false,
    }
}

/// Retry/fallback wrapper shared by every conversation.
pub struct ResilientCaller {
    router: Arc<ProviderRouter>,
    policy: RetryPolicy,
    events: Option<Arc<EventBus>>,
}

impl ResilientCaller {
    pub fn new(router: Arc<ProviderRouter>, policy: RetryPolicy) -> Self {
        Self {
            router,
            policy,
            events: None,
        }
    }

    /// Publish retry and switch notifications on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Call `provider_id`, retrying and failing over as configured.
    ///
    /// `request_fn` builds the request for each attempt from the profile being
    /// tried, so the model name follows the provider. The in-flight call and
    /// every backoff sleep race against `cancel`; losing the race drops the
    /// HTTP future, which aborts the request.
    pub async fn call_with_resilience<F>(
        &self,
        provider_id: &str,
        cancel: &CancellationToken,
        mut request_fn: F,
    ) -> Result<ProviderResponse, ResilienceError>
    where
        F: FnMut(&ProviderProfile) -> ProviderRequest,
    {
        let chain = self.router.chain(provider_id);
        if chain.is_empty() {
            return Err(ResilienceError::UnknownProvider(provider_id.to_string()));
        }

        let mut last_error: Option<(String, ProviderError)> = None;

        for (index, profile) in chain.iter().enumerate() {
            if index > 0 {
                let from = chain[index - 1].id.clone();
                let reason = last_error
                    .as_ref()
                    .map(|(_, e)| e.to_string())
                    .unwrap_or_default();
                info!(from = %from, to = %profile.id, reason = %reason, "Switching provider");
                self.publish(DomainEvent::ProviderSwitched {
                    from,
                    to: profile.id.clone(),
                    reason,
                });
            }

            let mut previous_delay = Duration::ZERO;

            for attempt in 1..=self.policy.max_attempts {
                if cancel.is_cancelled() {
                    return Err(ResilienceError::Cancelled);
                }

                let request = request_fn(profile);
                debug!(provider = %profile.id, attempt, model = %request.model, "Calling provider");

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                    outcome = profile.provider.complete(request) => outcome,
                };

                let error = match outcome {
                    Ok(mut response) => {
                        response.provider = profile.id.clone();
                        return Ok(response);
                    }
                    Err(error) => error,
                };

                if !is_transient(&profile.config, &error) {
                    warn!(provider = %profile.id, error = %error, "Non-retryable provider error");
                    return Err(ResilienceError::Fatal {
                        provider: profile.id.clone(),
                        error,
                    });
                }

                if attempt < self.policy.max_attempts {
                    let delay = self.policy.delay_for_retry(attempt - 1, previous_delay);
                    previous_delay = delay;
                    warn!(
                        provider = %profile.id,
                        attempt,
                        max = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    self.publish(DomainEvent::RetryScheduled {
                        provider: profile.id.clone(),
                        attempt,
                        max_attempts: self.policy.max_attempts,
                        delay_ms: delay.as_millis() as u64,
                        reason: error.to_string(),
                    });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                } else {
                    warn!(provider = %profile.id, attempts = attempt, error = %error, "Provider exhausted");
                }

                last_error = Some((profile.id.clone(), error));
            }
        }

        let (provider, error) = last_error.unwrap_or_else(|| {
            (
                provider_id.to_string(),
                ProviderError::NotConfigured("empty provider chain".into()),
            )
        });
        Err(ResilienceError::Exhausted { provider, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use seqpilot_core::message::Message;
    use seqpilot_core::provider::Provider;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Returns scripted outcomes in order; succeeds once the script runs out.
    struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<Vec<Instant>>,
        hang: bool,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                hang: false,
            })
        }

        fn hanging(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                hang: true,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let content = match next {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e),
                None => format!("ok from {}", self.name),
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

    fn http(status: u16) -> ProviderError {
        ProviderError::Http {
            status,
            message: format!("status {status}"),
        }
    }

    fn profile(id: &str, provider: Arc<ScriptedProvider>, chain: &[&str]) -> ProviderProfile {
        ProviderProfile {
            id: id.into(),
            provider,
            model: format!("{id}-model"),
            config: ProviderConfig {
                fallback_chain: chain.iter().map(|s| s.to_string()).collect(),
                ..ProviderConfig::default()
            },
        }
    }

    fn caller(profiles: Vec<ProviderProfile>, jitter: f64) -> (ResilientCaller, Arc<EventBus>) {
        let mut router = ProviderRouter::new(profiles[0].id.clone());
        for p in profiles {
            router.register(p);
        }
        let bus = Arc::new(EventBus::new(64));
        let policy = RetryPolicy {
            jitter,
            ..RetryPolicy::default()
        };
        (
            ResilientCaller::new(Arc::new(router), policy).with_events(bus.clone()),
            bus,
        )
    }

    fn request_for(profile: &ProviderProfile) -> ProviderRequest {
        ProviderRequest {
            model: profile.model.clone(),
            messages: vec![Message::user("hi")],
            temperature: 0.7,
            max_tokens: None,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) -> Vec<Arc<DomainEvent>> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay_for_retry(0), Duration::from_millis(1000));
        assert_eq!(policy.base_delay_for_retry(1), Duration::from_millis(2000));
        assert_eq!(policy.base_delay_for_retry(2), Duration::from_millis(4000));
        assert_eq!(policy.base_delay_for_retry(10), Duration::from_millis(30_000));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.delay_for_retry(1, Duration::ZERO).as_millis();
            assert!((1400..=2600).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn jittered_delay_never_shrinks() {
        let policy = RetryPolicy {
            base_delay_ms: 20_000,
            ..RetryPolicy::default()
        };
        let previous = Duration::from_millis(26_000);
        for _ in 0..100 {
            let d = policy.delay_for_retry(1, previous);
            assert!(d >= previous);
            assert!(d <= Duration::from_millis(30_000));
        }
    }

    #[test]
    fn transient_classification() {
        let config = ProviderConfig::default();
        assert!(is_transient(&config, &http(503)));
        assert!(is_transient(&config, &http(429)));
        assert!(is_transient(&config, &ProviderError::Network("reset".into())));
        assert!(!is_transient(&config, &http(401)));
        assert!(!is_transient(&config, &http(404)));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_monotonic_delays() {
        let sf = ScriptedProvider::new("siliconflow", vec![Err(http(503)), Err(http(503))]);
        let (caller, bus) = caller(vec![profile("siliconflow", sf.clone(), &[])], 0.3);
        let mut rx = bus.subscribe();

        let response = caller
            .call_with_resilience("siliconflow", &CancellationToken::new(), request_for)
            .await
            .unwrap();

        assert_eq!(response.provider, "siliconflow");
        assert_eq!(sf.call_count(), 3);

        let times = sf.call_times();
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        assert!(gap1 >= Duration::from_millis(700));
        assert!(gap2 >= gap1);

        let delays: Vec<u64> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e.as_ref() {
                DomainEvent::RetryScheduled { delay_ms, .. } => Some(*delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays.len(), 2);
        assert!(delays[1] >= delays[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_after_exhausting_primary() {
        let sf = ScriptedProvider::new(
            "siliconflow",
            vec![Err(http(503)), Err(http(503)), Err(http(503))],
        );
        let or = ScriptedProvider::new("openrouter", vec![]);
        let oa = ScriptedProvider::new("openai", vec![]);
        let (caller, bus) = caller(
            vec![
                profile("siliconflow", sf.clone(), &["openrouter", "openai"]),
                profile("openrouter", or.clone(), &[]),
                profile("openai", oa.clone(), &[]),
            ],
            0.3,
        );
        let mut rx = bus.subscribe();

        let response = caller
            .call_with_resilience("siliconflow", &CancellationToken::new(), request_for)
            .await
            .unwrap();

        assert_eq!(response.provider, "openrouter");
        assert_eq!(response.model, "openrouter-model");
        assert_eq!(sf.call_count(), 3);
        assert_eq!(or.call_count(), 1);
        assert_eq!(oa.call_count(), 0);

        let switches = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e.as_ref(), DomainEvent::ProviderSwitched { .. }))
            .count();
        assert_eq!(switches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_status_short_circuits() {
        let sf = ScriptedProvider::new("siliconflow", vec![Err(http(401))]);
        let or = ScriptedProvider::new("openrouter", vec![]);
        let (caller, _bus) = caller(
            vec![
                profile("siliconflow", sf.clone(), &["openrouter"]),
                profile("openrouter", or.clone(), &[]),
            ],
            0.3,
        );

        let err = caller
            .call_with_resilience("siliconflow", &CancellationToken::new(), request_for)
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Fatal { .. }));
        assert!(err.remedy().contains("API key"));
        assert_eq!(sf.call_count(), 1);
        assert_eq!(or.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_reports_last_providers_error() {
        let sf = ScriptedProvider::new(
            "siliconflow",
            vec![Err(http(503)), Err(http(503)), Err(http(503))],
        );
        let or = ScriptedProvider::new(
            "openrouter",
            vec![
                Err(ProviderError::Network("reset".into())),
                Err(http(502)),
                Err(http(429)),
            ],
        );
        let (caller, _bus) = caller(
            vec![
                profile("siliconflow", sf.clone(), &["openrouter"]),
                profile("openrouter", or.clone(), &[]),
            ],
            0.0,
        );

        let err = caller
            .call_with_resilience("siliconflow", &CancellationToken::new(), request_for)
            .await
            .unwrap_err();

        match err {
            ResilienceError::Exhausted { provider, error } => {
                assert_eq!(provider, "openrouter");
                assert_eq!(error.status(), Some(429));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(sf.call_count(), 3);
        assert_eq!(or.call_count(), 3);
    }

    #[tokio::test]
    async fn unknown_provider_rejected() {
        let sf = ScriptedProvider::new("siliconflow", vec![]);
        let (caller, _bus) = caller(vec![profile("siliconflow", sf, &[])], 0.0);
        let err = caller
            .call_with_resilience("nowhere", &CancellationToken::new(), request_for)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::UnknownProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_call_makes_no_request() {
        let sf = ScriptedProvider::new("siliconflow", vec![]);
        let (caller, _bus) = caller(vec![profile("siliconflow", sf.clone(), &[])], 0.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = caller
            .call_with_resilience("siliconflow", &cancel, request_for)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
        assert_eq!(sf.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_call() {
        let sf = ScriptedProvider::hanging("siliconflow");
        let (caller, _bus) = caller(vec![profile("siliconflow", sf.clone(), &[])], 0.0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = caller
            .call_with_resilience("siliconflow", &cancel, request_for)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(sf.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retries() {
        let sf = ScriptedProvider::new("siliconflow", vec![Err(http(503)), Err(http(503))]);
        let (caller, _bus) = caller(vec![profile("siliconflow", sf.clone(), &[])], 0.0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = caller
            .call_with_resilience("siliconflow", &cancel, request_for)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
        assert_eq!(sf.call_count(), 1);
    }
}
