use gemgate_protocol::gemini::{Candidate, GenerateContentResponse};
use gemgate_protocol::openai::{
    ChatCompletion, ChatCompletionChoice, ChatCompletionMessage,
};

use crate::{map_usage, new_completion_id, now_unix_secs, THINKING_CLOSE, THINKING_OPEN};

/// Maps a full (non-streaming) upstream response body to a single
/// chat-completion object.
pub fn build_completion(
    response: GenerateContentResponse,
    model: &str,
    thinking_as_content: bool,
) -> ChatCompletion {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| ChatCompletionChoice {
            index: candidate.index.unwrap_or(position as i64),
            message: ChatCompletionMessage {
                role: "assistant".to_string(),
                content: candidate_text(candidate, thinking_as_content),
            },
            finish_reason: Some(map_finish_reason(candidate)),
        })
        .collect();

    ChatCompletion {
        id: new_completion_id(),
        object: "chat.completion".to_string(),
        created: now_unix_secs(),
        model: model.to_string(),
        choices,
        usage: response.usage_metadata.as_ref().map(map_usage),
    }
}

fn candidate_text(candidate: &Candidate, thinking_as_content: bool) -> String {
    let mut out = String::new();
    let mut in_thought = false;
    let Some(content) = &candidate.content else {
        return out;
    };
    for part in &content.parts {
        let Some(text) = &part.text else { continue };
        if part.is_thought() {
            if !thinking_as_content {
                continue;
            }
            if !in_thought {
                out.push_str(THINKING_OPEN);
                in_thought = true;
            }
        } else if in_thought {
            out.push_str(THINKING_CLOSE);
            in_thought = false;
        }
        out.push_str(text);
    }
    if in_thought {
        out.push_str(THINKING_CLOSE);
    }
    out
}

fn map_finish_reason(candidate: &Candidate) -> String {
    match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => "length".to_string(),
        _ => "stop".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(value: serde_json::Value) -> GenerateContentResponse {
        GenerateContentResponse::from_envelope(value).unwrap()
    }

    #[test]
    fn builds_completion_with_usage() {
        let completion = build_completion(
            upstream(serde_json::json!({
                "response": {
                    "candidates": [{
                        "content": {"parts": [{"text": "hello"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {
                        "promptTokenCount": 4,
                        "candidatesTokenCount": 2,
                        "totalTokenCount": 6
                    }
                }
            })),
            "gemini-2.5-flash",
            true,
        );
        assert_eq!(completion.object, "chat.completion");
        assert_eq!(completion.choices[0].message.content, "hello");
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = completion.usage.unwrap();
        assert_eq!((usage.prompt_tokens, usage.completion_tokens, usage.total_tokens), (4, 2, 6));
    }

    #[test]
    fn thought_runs_are_wrapped_and_closed() {
        let completion = build_completion(
            upstream(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "step one", "thought": true},
                        {"text": "step two", "thought": true},
                        {"text": "answer"}
                    ]}
                }]
            })),
            "gemini-2.5-pro",
            true,
        );
        let content = &completion.choices[0].message.content;
        assert_eq!(
            content,
            &format!("{THINKING_OPEN}step onestep two{THINKING_CLOSE}answer")
        );
    }

    #[test]
    fn thoughts_dropped_when_disabled() {
        let completion = build_completion(
            upstream(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "hidden", "thought": true},
                        {"text": "visible"}
                    ]}
                }]
            })),
            "gemini-2.5-pro",
            false,
        );
        assert_eq!(completion.choices[0].message.content, "visible");
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let completion = build_completion(
            upstream(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "trunc"}]},
                    "finishReason": "MAX_TOKENS"
                }]
            })),
            "gemini-2.5-flash",
            true,
        );
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("length"));
    }
}
