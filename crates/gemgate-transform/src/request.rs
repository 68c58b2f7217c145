use serde_json::Value as JsonValue;

use gemgate_protocol::gemini::{Content, GenerateContentRequest, GenerationConfig, Part};
use gemgate_protocol::openai::ChatCompletionRequest;

/// Maps an inbound chat-completion request to the upstream `request` object.
///
/// Only plain text survives the mapping: system messages collapse into one
/// `systemInstruction`, assistant turns become `model` contents, everything
/// else is a `user` turn.
pub fn build_generate_request(request: &ChatCompletionRequest) -> GenerateContentRequest {
    let mut system_text = String::new();
    let mut contents = Vec::new();

    for message in &request.messages {
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        match message.role.as_str() {
            "system" | "developer" => {
                if !system_text.is_empty() {
                    system_text.push('\n');
                }
                system_text.push_str(&text);
            }
            role => {
                let upstream_role = if role == "assistant" { "model" } else { "user" };
                contents.push(Content {
                    role: Some(upstream_role.to_string()),
                    parts: vec![Part::text(text)],
                });
            }
        }
    }

    let system_instruction = (!system_text.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(system_text)],
    });

    GenerateContentRequest {
        contents,
        generation_config: build_generation_config(request),
        system_instruction,
    }
}

fn build_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    let stop_sequences = request.stop.as_ref().and_then(stop_sequences);
    if request.temperature.is_none()
        && request.top_p.is_none()
        && request.max_tokens.is_none()
        && stop_sequences.is_none()
    {
        return None;
    }
    Some(GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences,
    })
}

fn stop_sequences(stop: &JsonValue) -> Option<Vec<String>> {
    match stop {
        JsonValue::String(value) => Some(vec![value.clone()]),
        JsonValue::Array(values) => {
            let sequences: Vec<String> = values
                .iter()
                .filter_map(|value| value.as_str().map(|value| value.to_string()))
                .collect();
            (!sequences.is_empty()).then_some(sequences)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_messages_collapse_into_instruction() {
        let upstream = build_generate_request(&request(serde_json::json!({
            "model": "gemini-2.5-flash",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "system", "content": "be kind"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "bye"}
            ]
        })));

        let instruction = upstream.system_instruction.unwrap();
        assert_eq!(instruction.parts[0].text.as_deref(), Some("be brief\nbe kind"));
        let roles: Vec<_> = upstream
            .contents
            .iter()
            .map(|content| content.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn generation_parameters_are_mapped() {
        let upstream = build_generate_request(&request(serde_json::json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "top_p": 0.9,
            "max_tokens": 256,
            "stop": ["END"]
        })));
        let config = upstream.generation_config.unwrap();
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.max_output_tokens, Some(256));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn omits_config_when_no_parameters_set() {
        let upstream = build_generate_request(&request(serde_json::json!({
            "model": "gemini-2.5-flash",
            "messages": [{"role": "user", "content": "hi"}]
        })));
        assert!(upstream.generation_config.is_none());
        assert!(upstream.system_instruction.is_none());
    }
}
