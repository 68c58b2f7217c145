use bytes::Bytes;
use serde_json::Value as JsonValue;

use gemgate_protocol::gemini::GenerateContentResponse;
use gemgate_protocol::openai::{
    ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta,
};

use crate::{map_usage, new_completion_id, now_unix_secs, THINKING_CLOSE, THINKING_OPEN};

const DATA_PREFIX: &str = "data:";
const DONE_PAYLOAD: &str = "[DONE]";
const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Single-pass translator from the upstream event stream to caller-facing
/// chat-completion chunks.
///
/// State is one accumulation buffer for partial lines plus the
/// thinking-segment flag, both scoped to one session. The buffer is raw
/// bytes so an upstream chunk boundary may fall anywhere — mid-line,
/// mid-event, even mid-codepoint — without losing or duplicating text, and
/// the emitted thinking markers are balanced however the stream is cut.
pub struct StreamTranslator {
    id: String,
    model: String,
    created: i64,
    thinking_as_content: bool,
    buffer: Vec<u8>,
    in_thought: bool,
    role_sent: bool,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>, thinking_as_content: bool) -> Self {
        Self {
            id: new_completion_id(),
            model: model.into(),
            created: now_unix_secs(),
            thinking_as_content,
            buffer: Vec::new(),
            in_thought: false,
            role_sent: false,
        }
    }

    /// Feeds one upstream chunk, returning the caller-facing frames ready
    /// to emit. The trailing partial line stays buffered.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..pos], &mut out);
        }
        out
    }

    /// Ends the session: flushes a final unterminated line, closes an open
    /// thinking segment, and always emits the terminator last.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out);
        }
        if self.in_thought {
            self.in_thought = false;
            let frame = self.text_frame(THINKING_CLOSE.to_string());
            out.push(frame);
        }
        out.push(Bytes::from_static(DONE_FRAME));
        out
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<Bytes>) {
        let line = match line {
            [head @ .., b'\r'] => head,
            other => other,
        };
        // Complete lines are valid UTF-8 whenever the stream is; a line
        // that is not gets dropped with the other malformed payloads.
        let Ok(line) = std::str::from_utf8(line) else {
            return;
        };
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload == DONE_PAYLOAD {
            out.push(Bytes::from_static(DONE_FRAME));
            return;
        }
        let Ok(value) = serde_json::from_str::<JsonValue>(payload) else {
            return;
        };
        let Some(response) = GenerateContentResponse::from_envelope(value) else {
            return;
        };
        self.translate_event(&response, out);
    }

    fn translate_event(&mut self, response: &GenerateContentResponse, out: &mut Vec<Bytes>) {
        let mut abnormal_finish = false;
        for candidate in &response.candidates {
            if candidate.finished_abnormally() {
                abnormal_finish = true;
            }
            let Some(content) = &candidate.content else {
                continue;
            };
            for part in &content.parts {
                let Some(text) = &part.text else { continue };
                let mut piece = String::new();
                if part.is_thought() {
                    if !self.thinking_as_content {
                        continue;
                    }
                    if !self.in_thought {
                        piece.push_str(THINKING_OPEN);
                        self.in_thought = true;
                    }
                } else if self.in_thought {
                    piece.push_str(THINKING_CLOSE);
                    self.in_thought = false;
                }
                piece.push_str(text);
                let frame = self.text_frame(piece);
                out.push(frame);
            }
        }

        if response.usage_metadata.is_some() || abnormal_finish {
            let chunk = ChatCompletionChunk {
                id: self.id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: vec![ChatCompletionChunkChoice {
                    index: 0,
                    delta: ChatCompletionDelta::default(),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: response.usage_metadata.as_ref().map(map_usage),
            };
            out.push(sse_frame(&chunk));
        }
    }

    fn text_frame(&mut self, content: String) -> Bytes {
        let role = if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant".to_string())
        };
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role,
                    content: Some(content),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        sse_frame(&chunk)
    }
}

fn sse_frame(chunk: &ChatCompletionChunk) -> Bytes {
    // Serialization of these chunk types cannot fail.
    let payload = serde_json::to_vec(chunk).unwrap_or_default();
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\n\n");
    Bytes::from(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collected {
        content: String,
        finish_reasons: Vec<String>,
        usage_totals: Vec<u32>,
        done_frames: usize,
    }

    fn collect(frames: &[Bytes]) -> Collected {
        let mut collected = Collected {
            content: String::new(),
            finish_reasons: Vec::new(),
            usage_totals: Vec::new(),
            done_frames: 0,
        };
        for frame in frames {
            let text = std::str::from_utf8(frame).unwrap();
            let payload = text
                .strip_prefix("data: ")
                .unwrap()
                .trim_end_matches('\n');
            if payload == "[DONE]" {
                collected.done_frames += 1;
                continue;
            }
            let chunk: ChatCompletionChunk = serde_json::from_str(payload).unwrap();
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    collected.content.push_str(content);
                }
                if let Some(reason) = &choice.finish_reason {
                    collected.finish_reasons.push(reason.clone());
                }
            }
            if let Some(usage) = &chunk.usage {
                collected.usage_totals.push(usage.total_tokens);
            }
        }
        collected
    }

    fn run_session(input: &[u8], splits: &[usize]) -> Vec<Bytes> {
        let mut translator = StreamTranslator::new("gemini-2.5-pro", true);
        let mut frames = Vec::new();
        let mut rest = input;
        for split in splits {
            let (head, tail) = rest.split_at(*split);
            frames.extend(translator.push_chunk(head));
            rest = tail;
        }
        frames.extend(translator.push_chunk(rest));
        frames.extend(translator.finish());
        frames
    }

    fn sample_input() -> Vec<u8> {
        let mut input = Vec::new();
        input.extend_from_slice(
            r#"data: {"response":{"candidates":[{"content":{"parts":[{"text":"weigh évaluation","thought":true}]}}]}}"#.as_bytes(),
        );
        input.push(b'\n');
        input.extend_from_slice(
            // Multi-byte text so splits can land mid-codepoint.
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"caf\u{e9} \u{1f680}\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":5,\"totalTokenCount\":12}}\n"
                .as_bytes(),
        );
        input
    }

    #[test]
    fn chunk_boundary_invariance() {
        let input = sample_input();
        let reference = collect(&run_session(&input, &[]));
        assert!(reference.content.contains("café 🚀"));

        for split in 1..input.len() {
            let collected = collect(&run_session(&input, &[split]));
            assert_eq!(collected.content, reference.content, "split at byte {split}");
            assert_eq!(collected.finish_reasons, reference.finish_reasons);
            assert_eq!(collected.usage_totals, reference.usage_totals);
            assert_eq!(collected.done_frames, 1);
        }
    }

    #[test]
    fn markers_are_balanced_when_cut_mid_thought() {
        let mut translator = StreamTranslator::new("m", true);
        let mut frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"half a thought\",\"thought\":true}]}}]}\n",
        );
        // The upstream connection dies here, mid-segment.
        frames.extend(translator.finish());

        let collected = collect(&frames);
        let opens = collected.content.matches(THINKING_OPEN).count();
        let closes = collected.content.matches(THINKING_CLOSE).count();
        assert_eq!(opens, 1);
        assert_eq!(closes, 1);
        // The closing marker precedes the terminator.
        let last = std::str::from_utf8(frames.last().unwrap()).unwrap();
        assert_eq!(last, "data: [DONE]\n\n");
        let closing = std::str::from_utf8(&frames[frames.len() - 2]).unwrap();
        assert!(closing.contains("</thinking>"));
    }

    #[test]
    fn thought_and_answer_in_one_event_open_then_close() {
        let mut translator = StreamTranslator::new("m", true);
        let frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"plan\",\"thought\":true},{\"text\":\"answer\"}]}}]}\n",
        );
        assert_eq!(frames.len(), 2);
        let first = collect(&frames[..1]);
        let second = collect(&frames[1..]);
        assert_eq!(first.content, format!("{THINKING_OPEN}plan"));
        assert_eq!(second.content, format!("{THINKING_CLOSE}answer"));
    }

    #[test]
    fn consecutive_thoughts_share_one_segment() {
        let mut translator = StreamTranslator::new("m", true);
        let mut frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\",\"thought\":true}]}}]}\n",
        );
        frames.extend(translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\",\"thought\":true}]}}]}\n",
        ));
        frames.extend(translator.finish());
        let collected = collect(&frames);
        assert_eq!(
            collected.content,
            format!("{THINKING_OPEN}ab{THINKING_CLOSE}")
        );
    }

    #[test]
    fn thoughts_dropped_when_mode_disabled() {
        let mut translator = StreamTranslator::new("m", false);
        let mut frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"secret\",\"thought\":true},{\"text\":\"public\"}]}}]}\n",
        );
        frames.extend(translator.finish());
        let collected = collect(&frames);
        assert_eq!(collected.content, "public");
    }

    #[test]
    fn usage_event_emits_terminal_chunk() {
        let mut translator = StreamTranslator::new("m", true);
        let frames = translator.push_chunk(
            b"data: {\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":2,\"totalTokenCount\":5}}\n",
        );
        let collected = collect(&frames);
        assert_eq!(collected.finish_reasons, vec!["stop".to_string()]);
        assert_eq!(collected.usage_totals, vec![5]);
    }

    #[test]
    fn abnormal_finish_emits_terminal_without_usage() {
        let mut translator = StreamTranslator::new("m", true);
        let frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]},\"finishReason\":\"SAFETY\"}]}\n",
        );
        let collected = collect(&frames);
        assert_eq!(collected.finish_reasons, vec!["stop".to_string()]);
        assert!(collected.usage_totals.is_empty());
    }

    #[test]
    fn done_payload_passes_through_verbatim() {
        let mut translator = StreamTranslator::new("m", true);
        let frames = translator.push_chunk(b"data: [DONE]\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], DONE_FRAME);
    }

    #[test]
    fn malformed_and_foreign_lines_are_skipped() {
        let mut translator = StreamTranslator::new("m", true);
        let mut frames = translator.push_chunk(b"data: {\"candidates\":[{\"content\n");
        frames.extend(translator.push_chunk(b": comment line\n"));
        frames.extend(translator.push_chunk(b"event: ping\n"));
        assert!(frames.is_empty());
        // The session keeps translating after the bad lines.
        frames.extend(translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]}}]}\n",
        ));
        assert_eq!(collect(&frames).content, "ok");
    }

    #[test]
    fn unterminated_final_line_is_flushed_on_finish() {
        let mut translator = StreamTranslator::new("m", true);
        let mut frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tail\"}]}}]}",
        );
        assert!(frames.is_empty());
        frames.extend(translator.finish());
        let collected = collect(&frames);
        assert_eq!(collected.content, "tail");
        assert_eq!(collected.done_frames, 1);
    }

    #[test]
    fn role_is_sent_exactly_once() {
        let mut translator = StreamTranslator::new("m", true);
        let mut frames = translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n",
        );
        frames.extend(translator.push_chunk(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]}}]}\n",
        ));
        let roles: Vec<Option<String>> = frames
            .iter()
            .map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                let chunk: ChatCompletionChunk =
                    serde_json::from_str(text.strip_prefix("data: ").unwrap().trim_end()).unwrap();
                chunk.choices[0].delta.role.clone()
            })
            .collect();
        assert_eq!(roles, vec![Some("assistant".to_string()), None]);
    }
}
