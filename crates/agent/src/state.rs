//! Conversation state and the per-request report.

use seqpilot_core::message::Message;
use seqpilot_core::tool::ToolResult;
use serde::Serialize;
use std::fmt;

/// Where a conversation is in its lifecycle.
///
/// `Idle → Running → {Completed, Aborted, RoundLimitReached, Failed}`. A
/// terminal phase stays visible until the next user message, which resets
/// it to `Idle` (and the round counter to zero) before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Idle,
    Running,
    Completed,
    Aborted,
    RoundLimitReached,
    Failed,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::RoundLimitReached => "round_limit_reached",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Aborted | Self::RoundLimitReached | Self::Failed
        )
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one conversation owns. The system prompt is not stored; it is
/// rebuilt every round.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    /// Id of the current (or last) request; increases by one per request
    pub request_id: u64,
    pub round: u32,
    pub phase: ConversationPhase,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            request_id: 0,
            round: 0,
            phase: ConversationPhase::Idle,
        }
    }

    /// Move a finished conversation back to `Idle`.
    pub fn reset_if_terminal(&mut self) {
        if self.phase != ConversationPhase::Idle {
            self.phase = ConversationPhase::Idle;
            self.round = 0;
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of one user request.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub request_id: u64,
    pub state: ConversationPhase,
    pub rounds: u32,
    /// Last assistant text with tool-call fragments removed
    pub final_text: Option<String>,
    /// Results of every dispatched call, including any discarded by an abort
    pub tool_results: Vec<ToolResult>,
    /// Provider that produced the last response
    pub provider: Option<String>,
    pub error: Option<String>,
    pub remedy: Option<String>,
}

impl TurnReport {
    pub(crate) fn new(request_id: u64) -> Self {
        Self {
            request_id,
            state: ConversationPhase::Running,
            rounds: 0,
            final_text: None,
            tool_results: Vec::new(),
            provider: None,
            error: None,
            remedy: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == ConversationPhase::Completed
    }
}
