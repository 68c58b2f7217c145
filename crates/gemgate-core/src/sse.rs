use bytes::Bytes;
use tokio::sync::mpsc;

use gemgate_transform::stream::StreamTranslator;

/// Bridges the raw upstream event stream to caller-facing frames. The
/// translator runs in its own task so backpressure from the caller never
/// blocks the upstream read loop beyond the channel depth.
pub fn translate_stream(
    mut upstream: mpsc::Receiver<Bytes>,
    model: &str,
    thinking_as_content: bool,
) -> mpsc::Receiver<Bytes> {
    let mut translator = StreamTranslator::new(model, thinking_as_content);
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        while let Some(chunk) = upstream.recv().await {
            for frame in translator.push_chunk(&chunk) {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }
        // Upstream closed, cleanly or not; the translator balances any open
        // thinking segment and appends the terminator.
        for frame in translator.finish() {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn bridged_stream_ends_with_terminator() {
        let (tx, upstream) = mpsc::channel(4);
        let rx = translate_stream(upstream, "gemini-2.5-flash", true);

        tx.send(Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hi\"}]}}]}\n",
        ))
        .await
        .unwrap();
        drop(tx);

        let frames = collect(rx).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"content\":\"hi\""));
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn truncated_upstream_still_closes_thinking_segment() {
        let (tx, upstream) = mpsc::channel(4);
        let rx = translate_stream(upstream, "gemini-2.5-pro", true);

        tx.send(Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hm\",\"thought\":true}]}}]}\n",
        ))
        .await
        .unwrap();
        drop(tx);

        let frames = collect(rx).await;
        let joined = frames.join("");
        assert!(joined.contains("<thinking>"));
        assert!(joined.contains("</thinking>"));
        assert!(frames.last().unwrap().contains("[DONE]"));
    }
}
