//! Parsing of the agent's free-text output into a typed `RunResult`.
//!
//! This is the only place that knows the agent's text protocol:
//!
//! - `<promise>COMPLETE</promise>`: every item in the session is done
//! - `<promise>CONTINUE</promise>`: one item done, more remain
//! - `<promise>BLOCKED: reason</promise>`: cannot make progress
//!
//! Rate limits are recognized from the backend's error text.

use std::time::Duration;

use super::runner::RunResult;

const PROMISE_OPEN: &str = "<promise>";
const PROMISE_CLOSE: &str = "</promise>";

/// Phrases that mean "rate limited" when the process also failed.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "too many requests",
    "overloaded",
    "usage limit",
];

/// Marker that is unambiguous even when the process exited cleanly.
const RATE_LIMIT_ERROR: &str = "rate_limit_error";

/// Longest retry-after we honor; larger values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

const RETRY_PREFIXES: &[&str] = &["retry after", "retry-after:", "retry-after", "try again in"];

/// Parse agent output. `exit_success` is whether the process exited with 0.
pub fn parse_output(output: &str, exit_success: bool) -> RunResult {
    let mut result = RunResult::with_output(output);

    for promise in promises(output) {
        let upper = promise.to_ascii_uppercase();
        if upper == "COMPLETE" {
            result.complete = true;
        } else if upper == "CONTINUE" {
            result.continue_ = true;
        } else if upper.starts_with("BLOCKED") {
            let reason = promise["BLOCKED".len()..]
                .trim_start_matches([':', ' ', '-'])
                .trim();
            result.blocked = true;
            result.blocked_reason = Some(if reason.is_empty() {
                "no reason given".to_string()
            } else {
                reason.to_string()
            });
        }
    }

    let lower = output.to_lowercase();
    let has_marker = RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m));
    if lower.contains(RATE_LIMIT_ERROR) || (!exit_success && has_marker) {
        result.rate_limited = true;
        result.retry_after = parse_retry_after(&lower);
    }

    result
}

/// Contents of every `<promise>...</promise>` block, trimmed.
fn promises(output: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find(PROMISE_OPEN) {
        let after = &rest[start + PROMISE_OPEN.len()..];
        match after.find(PROMISE_CLOSE) {
            Some(end) => {
                found.push(after[..end].trim());
                rest = &after[end + PROMISE_CLOSE.len()..];
            }
            None => break,
        }
    }
    found
}

/// Find an explicit retry delay such as "retry after 30 seconds" or
/// "try again in 2m". Expects lowercased text.
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    for prefix in RETRY_PREFIXES {
        let mut search = text;
        while let Some(pos) = search.find(prefix) {
            let after = &search[pos + prefix.len()..];
            if let Some(duration) = parse_amount(after) {
                return Some(duration);
            }
            search = after;
        }
    }
    None
}

/// Parse a leading `<number> [unit]`, skipping whitespace.
fn parse_amount(text: &str) -> Option<Duration> {
    let text = text.trim_start();
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    // Too many digits for u64 is still a (very long) explicit delay
    let amount: u64 = digits.parse().unwrap_or(u64::MAX);
    let unit: String = text[digits.len()..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    let secs = match unit.as_str() {
        "m" | "min" | "mins" | "minute" | "minutes" => amount.saturating_mul(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => amount.saturating_mul(3600),
        // seconds, or no unit at all
        _ => amount,
    };
    if secs == 0 {
        return None;
    }
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}
