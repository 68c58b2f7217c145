pub mod request;
pub mod response;
pub mod stream;

use gemgate_protocol::gemini::UsageMetadata;
use gemgate_protocol::openai::CompletionUsage;

/// Markers wrapping upstream "thought" text when it is surfaced as content.
pub const THINKING_OPEN: &str = "<thinking>\n";
pub const THINKING_CLOSE: &str = "\n</thinking>\n\n";

pub(crate) fn map_usage(usage: &UsageMetadata) -> CompletionUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
    let completion_tokens = usage.candidates_token_count.unwrap_or(0);
    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt_tokens + completion_tokens),
    }
}

pub(crate) fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

pub(crate) fn now_unix_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
