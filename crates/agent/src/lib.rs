//! The seqpilot conversation loop.
//!
//! Each user request runs as a sequence of rounds:
//!
//! 1. **Prompt**: system prompt rebuilt from the live tool catalog
//! 2. **Call**: history sent through the retry/fallback layer
//! 3. **Parse**: tool calls extracted from the reply
//! 4. **Dispatch**: calls run in textual order, results folded back in
//! 5. **Decide**: only when a round has no tool calls, the completion
//!    detector decides whether to stop
//!
//! The request ends `Completed`, `Aborted`, `RoundLimitReached` or `Failed`.

pub mod completion;
pub mod controller;
pub mod prompt;
pub mod state;

pub use completion::{CompletionDecision, CompletionDetector};
pub use controller::{ABORT_MESSAGE, ConversationHandle, Orchestrator, SubmitError};
pub use prompt::build_system_prompt;
pub use state::{ConversationPhase, ConversationState, TurnReport};
