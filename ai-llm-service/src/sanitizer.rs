//! Sanitizes provider/transport error messages before user display.
//!
//! Raw LLM errors leak quotas, API-key fragments, and stack traces. This
//! module maps the common failure classes (rate limit, auth, unknown model,
//! token limit, connectivity, content filter) to short actionable prose and
//! redacts anything key-shaped from the rest.

/// Map a raw error message to a user-safe one.
pub fn sanitize_error_for_display(error_message: &str) -> String {
    if error_message.trim().is_empty() {
        return "An unexpected error occurred during processing.".to_string();
    }

    let lower = error_message.to_lowercase();

    if contains_any(
        &lower,
        &["quota", "rate limit", "rate_limit", "429", "too many requests"],
    ) {
        return "The AI provider is currently rate-limited or quota has been exceeded. \
                Please try again later or check the AI connection settings."
            .to_string();
    }

    if contains_any(
        &lower,
        &["401", "403", "unauthorized", "authentication", "api key", "apikey", "invalid key"],
    ) {
        return "AI provider authentication failed. \
                Please verify the AI connection configuration."
            .to_string();
    }

    if lower.contains("model")
        && contains_any(&lower, &["not found", "invalid", "does not exist", "unavailable"])
    {
        return "The configured AI model is not available. \
                Please update the AI connection settings."
            .to_string();
    }

    if lower.contains("token")
        && contains_any(&lower, &["limit", "too long", "maximum", "exceeded", "context"])
    {
        return "The PR content exceeds the AI model's token limit. \
                Consider breaking down large PRs or adjusting the token limitation setting."
            .to_string();
    }

    if contains_any(
        &lower,
        &["connection", "timeout", "network", "unreachable", "connection refused"],
    ) {
        return "Failed to connect to the AI provider. Please try again later.".to_string();
    }

    if contains_any(&lower, &["content filter", "safety", "blocked", "policy"]) {
        return "The AI provider's content filter blocked this request. \
                Please review the PR content or try a different model."
            .to_string();
    }

    // Stack traces and structured dumps never reach the user verbatim.
    let looks_technical = error_message.starts_with('{')
        || error_message.starts_with('[')
        || contains_any(error_message, &["Exception", "Traceback", "panicked at", "  at "]);
    if looks_technical || error_message.len() > 200 {
        return "An error occurred while processing your request. \
                Please check the job logs for more details."
            .to_string();
    }

    redact_secrets(error_message)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Remove API-key-shaped substrings from an otherwise safe message.
fn redact_secrets(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(idx) = rest.find("sk-") {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx + 3..];
        let key_len = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .count();
        if key_len >= 20 {
            out.push_str("[API_KEY_REDACTED]");
            rest = &tail[key_len..];
        } else {
            out.push_str("sk-");
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_mapped() {
        let msg = sanitize_error_for_display("HTTP 429: too many requests");
        assert!(msg.contains("rate-limited"));
    }

    #[test]
    fn auth_is_mapped() {
        let msg = sanitize_error_for_display("401 Unauthorized for url");
        assert!(msg.contains("authentication failed"));
    }

    #[test]
    fn keys_are_redacted() {
        let raw = "request with key sk-abcdefghijklmnopqrstuvwxyz123456 failed oddly";
        let msg = sanitize_error_for_display(raw);
        assert!(!msg.contains("sk-abcdef"));
        assert!(msg.contains("[API_KEY_REDACTED]"));
    }

    #[test]
    fn long_messages_are_replaced() {
        let raw = "x".repeat(300);
        let msg = sanitize_error_for_display(&raw);
        assert!(msg.contains("job logs"));
    }
}
