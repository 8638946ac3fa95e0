//! Task-completion detector.
//!
//! Scores a model response for "the request is finished" from weighted
//! lexical markers and a few structural signals, all taken from
//! [`CompletionConfig`]. A round that produced tool calls can never be
//! complete: its confidence is scaled down by the configured penalty and the
//! decision is forced to `false`.
//!
//! Callers must parse tool calls first and pass the count in; the detector
//! does not look for calls itself.

use seqpilot_config::CompletionConfig;
use seqpilot_tools::parser::has_dangling_fragment;

/// The detector's verdict for one response.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionDecision {
    pub complete: bool,
    /// In `[0, 1]`
    pub confidence: f32,
    /// Which signals fired, for debug logging
    pub signals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    config: CompletionConfig,
}

impl CompletionDetector {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Score `response`, given how many tool calls were parsed from it.
    pub fn evaluate(&self, response: &str, tool_call_count: usize) -> CompletionDecision {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return CompletionDecision {
                complete: false,
                confidence: 0.0,
                signals: vec!["empty response".into()],
            };
        }

        let normalized = trimmed.to_lowercase().replace('\u{2019}', "'");
        let mut score = 0.0f32;
        let mut signals = Vec::new();

        for marker in &self.config.markers {
            let phrase = marker.phrase.to_lowercase();
            if !phrase.is_empty() && contains_phrase(&normalized, &phrase) {
                score += marker.weight;
                signals.push(format!("marker '{}' ({:+.2})", marker.phrase, marker.weight));
            }
        }

        match last_meaningful_char(trimmed) {
            Some('?') => {
                score += self.config.question_weight;
                signals.push("asks the user".into());
            }
            Some('.') | Some('!') => {
                score += self.config.terminal_punctuation_weight;
                signals.push("terminal punctuation".into());
            }
            _ => {}
        }

        if !has_dangling_fragment(trimmed) {
            score += self.config.clean_ending_weight;
            signals.push("clean ending".into());
        }

        let mut confidence = score.clamp(0.0, 1.0);

        if tool_call_count > 0 {
            confidence *= 1.0 - self.config.tool_call_penalty;
            signals.push(format!("{tool_call_count} tool call(s) pending"));
            return CompletionDecision {
                complete: false,
                confidence,
                signals,
            };
        }

        CompletionDecision {
            complete: confidence > self.config.threshold,
            confidence,
            signals,
        }
    }
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::new(CompletionConfig::default())
    }
}

/// `phrase` occurs in `text` with non-alphanumeric characters (or the ends of
/// the text) on both sides.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let mut from = 0;
    while let Some(offset) = text[from..].find(phrase) {
        let start = from + offset;
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = start + phrase.chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Last character ignoring trailing markdown emphasis, quotes and brackets.
fn last_meaningful_char(text: &str) -> Option<char> {
    text.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '`' | '"' | '\'' | ')'))
        .chars()
        .next_back()
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqpilot_config::CompletionMarker;

    fn detector() -> CompletionDetector {
        CompletionDetector::default()
    }

    #[test]
    fn explicit_completion() {
        let d = detector().evaluate("Task completed successfully.", 0);
        assert!(d.complete);
        assert!((d.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tool_calls_always_win() {
        let text = r#"Task completed successfully. {"tool_name":"navigate","parameters":{}}"#;
        let d = detector().evaluate(text, 1);
        assert!(!d.complete);
        assert!(d.confidence <= 0.1 + f32::EPSILON);
    }

    #[test]
    fn continuation_language_is_not_completion() {
        let d = detector().evaluate("Let me look at the next region", 0);
        assert!(!d.complete);
        let d = detector().evaluate("I'll now check the GC content.", 0);
        assert!(!d.complete);
    }

    #[test]
    fn plain_answer_counts_as_done() {
        let d = detector().evaluate("The region chr1:100-200 contains two genes.", 0);
        assert!(d.complete, "{d:?}");
    }

    #[test]
    fn question_returns_control_to_user() {
        let d = detector().evaluate("Which chromosome should I open?", 0);
        assert!(d.complete);
        assert!(d.signals.iter().any(|s| s == "asks the user"));
    }

    #[test]
    fn dangling_fragment_blocks_completion() {
        let d = detector().evaluate("Done, calling {\"tool_name\": \"navigate\"", 0);
        assert!(!d.complete, "{d:?}");
    }

    #[test]
    fn empty_response_is_not_completion() {
        let d = detector().evaluate("   ", 0);
        assert!(!d.complete);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn markers_respect_word_boundaries() {
        assert!(contains_phrase("all done.", "done"));
        assert!(!contains_phrase("the edit was undone", "done"));
        assert!(!contains_phrase("abandoned", "done"));
        assert!(contains_phrase("i'll do it", "i'll"));
    }

    #[test]
    fn markers_are_configurable() {
        let config = CompletionConfig {
            markers: vec![CompletionMarker::new("analysis ready", 0.9)],
            terminal_punctuation_weight: 0.0,
            clean_ending_weight: 0.0,
            ..CompletionConfig::default()
        };
        let d = CompletionDetector::new(config.clone()).evaluate("Analysis ready", 0);
        assert!(d.complete);
        let d = CompletionDetector::new(config).evaluate("Task completed.", 0);
        assert!(!d.complete);
    }

    #[test]
    fn strict_threshold_is_still_reachable() {
        let config = CompletionConfig {
            threshold: 0.99,
            ..CompletionConfig::default()
        };
        let d = CompletionDetector::new(config).evaluate("Task completed successfully. All done.", 0);
        assert!(d.complete, "{d:?}");
    }

    #[test]
    fn trailing_markdown_is_ignored() {
        assert_eq!(last_meaningful_char("**All done.**"), Some('.'));
        assert_eq!(last_meaningful_char("(see above?)"), Some('?'));
    }
}
