//! Capture cadence control
//!
//! The AI embeds a small JSON control block in its free-text reply that
//! steers how aggressively the pipeline captures the screen afterwards.
//! This module extracts that block, strips it from the text shown to the
//! user, and folds the resulting directive into the session's
//! [`CaptureStrategy`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Structured control fields parsed from an AI reply
///
/// Falls back to the inert default when the reply carries no block or the
/// block fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlDirective {
    /// Whether the game is in an active phase warranting frequent capture
    pub active: bool,
    /// Whether a capture should happen immediately
    #[serde(default)]
    pub now: bool,
    /// Suggested active-phase capture interval in seconds
    #[serde(default, rename = "suggested_interval")]
    pub suggested_interval_seconds: Option<f32>,
}

/// Capture scheduling state for one listening session
///
/// Mutated only by [`apply`]; the capture scheduler reads it to pace its
/// ambient ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStrategy {
    /// Interval between captures while the game is active, in seconds
    pub active_interval_seconds: f32,
    /// Interval between captures while the game is idle, in seconds
    pub idle_interval_seconds: f32,
    /// Whether the AI currently considers the game active
    pub is_active: bool,
    /// One-shot flag requesting a capture on the next scheduler tick
    pub need_immediate_capture: bool,
}

impl Default for CaptureStrategy {
    fn default() -> Self {
        Self {
            active_interval_seconds: 5.0,
            idle_interval_seconds: 15.0,
            is_active: false,
            need_immediate_capture: false,
        }
    }
}

/// Result of parsing an AI reply
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// The extracted directive, or the inert default
    pub directive: ControlDirective,
    /// Reply text with the control block stripped; the full original text
    /// when no block was extracted
    pub display_text: String,
}

fn fenced_block_regex() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    FENCED.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block regex is valid")
    })
}

/// Extract the control directive from an AI reply
///
/// Looks for a fenced code block first, then for a bare embedded JSON
/// object. A candidate only counts if it parses and contains the `active`
/// key. On any failure the entire reply passes through unmodified - the
/// user never loses text to a half-parsed block.
pub fn parse_reply(reply: &str) -> ParsedReply {
    if let Some(captures) = fenced_block_regex().captures(reply) {
        let whole = captures.get(0).expect("match exists");
        let block = captures.get(1).expect("group 1 exists");
        if let Some(directive) = parse_directive(block.as_str()) {
            return ParsedReply {
                directive,
                display_text: strip_range(reply, whole.start(), whole.end()),
            };
        }
        tracing::debug!("Fenced block found but not a control directive, passing reply through");
        return ParsedReply {
            directive: ControlDirective::default(),
            display_text: reply.to_string(),
        };
    }

    if let Some((start, end)) = find_embedded_object(reply) {
        if let Some(directive) = parse_directive(&reply[start..end]) {
            return ParsedReply {
                directive,
                display_text: strip_range(reply, start, end),
            };
        }
    }

    ParsedReply {
        directive: ControlDirective::default(),
        display_text: reply.to_string(),
    }
}

/// Fold a directive into the strategy
///
/// A suggested interval overrides the active interval only - the idle
/// interval is never touched - and only takes effect while the directive
/// marks the game active.
pub fn apply(directive: &ControlDirective, strategy: &mut CaptureStrategy) {
    strategy.is_active = directive.active;
    strategy.need_immediate_capture = directive.now;

    if directive.active {
        if let Some(interval) = directive.suggested_interval_seconds {
            if interval.is_finite() && interval > 0.0 {
                tracing::debug!(
                    "Cadence: active interval {} -> {} seconds",
                    strategy.active_interval_seconds,
                    interval
                );
                strategy.active_interval_seconds = interval;
            } else {
                tracing::warn!("Cadence: ignoring non-positive suggested interval {interval}");
            }
        }
    }
}

/// Parse a candidate JSON object into a directive
///
/// Requires the `active` key; serde enforces that because the field has no
/// default.
fn parse_directive(block: &str) -> Option<ControlDirective> {
    serde_json::from_str::<ControlDirective>(block).ok()
}

/// Locate the first balanced `{…}` object in free text
///
/// A plain depth scan is enough here; replies that quote braces inside
/// strings use fenced blocks, which are handled before this path.
fn find_embedded_object(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth = 0usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove `[start, end)` from the text and tidy the seam
fn strip_range(text: &str, start: usize, end: usize) -> String {
    let mut stripped = String::with_capacity(text.len() - (end - start));
    stripped.push_str(&text[..start]);
    stripped.push_str(&text[end..]);
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_block() {
        let reply =
            "Great! ```json\n{\"active\":true,\"now\":true,\"suggested_interval\":2}\n```";
        let parsed = parse_reply(reply);

        assert_eq!(
            parsed.directive,
            ControlDirective {
                active: true,
                now: true,
                suggested_interval_seconds: Some(2.0),
            }
        );
        assert_eq!(parsed.display_text, "Great!");
    }

    #[test]
    fn test_parse_fallback_preserves_full_text() {
        let reply = "just chatting, nothing special";
        let parsed = parse_reply(reply);

        assert_eq!(parsed.directive, ControlDirective::default());
        assert_eq!(parsed.display_text, reply);
    }

    #[test]
    fn test_parse_fenced_without_language_tag() {
        let reply = "On it.\n```\n{\"active\": false}\n```\nWatch the left flank.";
        let parsed = parse_reply(reply);

        assert!(!parsed.directive.active);
        assert!(!parsed.directive.now);
        assert_eq!(parsed.display_text, "On it.\n\nWatch the left flank.");
    }

    #[test]
    fn test_parse_embedded_object() {
        let reply = "Boss phase! {\"active\": true, \"now\": false} Stay sharp.";
        let parsed = parse_reply(reply);

        assert!(parsed.directive.active);
        assert!(!parsed.directive.now);
        assert_eq!(parsed.display_text, "Boss phase!  Stay sharp.");
    }

    #[test]
    fn test_parse_block_without_active_key_passes_through() {
        let reply = "Stats: ```json\n{\"score\": 12}\n```";
        let parsed = parse_reply(reply);

        assert_eq!(parsed.directive, ControlDirective::default());
        assert_eq!(parsed.display_text, reply);
    }

    #[test]
    fn test_parse_malformed_block_passes_through() {
        let reply = "Hmm ```json\n{\"active\": tru\n``` rest of reply";
        let parsed = parse_reply(reply);

        assert_eq!(parsed.directive, ControlDirective::default());
        assert_eq!(parsed.display_text, reply);
    }

    #[test]
    fn test_apply_sets_flags() {
        let mut strategy = CaptureStrategy::default();
        let directive = ControlDirective {
            active: true,
            now: true,
            suggested_interval_seconds: None,
        };

        apply(&directive, &mut strategy);

        assert!(strategy.is_active);
        assert!(strategy.need_immediate_capture);
        assert_eq!(strategy.active_interval_seconds, 5.0);
    }

    #[test]
    fn test_apply_suggested_interval_overrides_active_only() {
        let mut strategy = CaptureStrategy::default();
        let directive = ControlDirective {
            active: true,
            now: false,
            suggested_interval_seconds: Some(2.0),
        };

        apply(&directive, &mut strategy);

        assert_eq!(strategy.active_interval_seconds, 2.0);
        assert_eq!(strategy.idle_interval_seconds, 15.0);
    }

    #[test]
    fn test_apply_suggested_interval_ignored_while_inactive() {
        let mut strategy = CaptureStrategy::default();
        let directive = ControlDirective {
            active: false,
            now: false,
            suggested_interval_seconds: Some(2.0),
        };

        apply(&directive, &mut strategy);

        assert!(!strategy.is_active);
        assert_eq!(strategy.active_interval_seconds, 5.0);
    }

    #[test]
    fn test_apply_rejects_non_positive_interval() {
        let mut strategy = CaptureStrategy::default();
        let directive = ControlDirective {
            active: true,
            now: false,
            suggested_interval_seconds: Some(0.0),
        };

        apply(&directive, &mut strategy);
        assert_eq!(strategy.active_interval_seconds, 5.0);
    }

    #[test]
    fn test_apply_deactivation_clears_active_flag() {
        let mut strategy = CaptureStrategy {
            is_active: true,
            need_immediate_capture: true,
            ..CaptureStrategy::default()
        };

        apply(&ControlDirective::default(), &mut strategy);

        assert!(!strategy.is_active);
        assert!(!strategy.need_immediate_capture);
    }
}
