use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use gemgate_pool::client::shared_client;

pub type Headers = Vec<(String, String)>;

/// A stream that goes quiet this long is considered dead upstream.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct UpstreamCall {
    pub url: String,
    pub access_token: String,
    pub body: Bytes,
    pub streaming: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Full(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct UpstreamReply {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, thiserror::Error)]
#[error("upstream transport error: {0}")]
pub struct TransportError(pub String);

/// The wire seam of the dispatcher. Tests substitute a scripted
/// implementation; the process uses [`HttpUpstream`].
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, call: UpstreamCall) -> Result<UpstreamReply, TransportError>;
}

pub struct HttpUpstream {
    client: Arc<wreq::Client>,
}

impl HttpUpstream {
    pub fn new(proxy: Option<&str>) -> Result<Self, wreq::Error> {
        Ok(Self {
            client: shared_client(proxy)?,
        })
    }
}

#[async_trait]
impl UpstreamTransport for HttpUpstream {
    async fn send(&self, call: UpstreamCall) -> Result<UpstreamReply, TransportError> {
        let response = self
            .client
            .request(wreq::Method::POST, &call.url)
            .header("authorization", format!("Bearer {}", call.access_token))
            .header("content-type", "application/json")
            .body(call.body)
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_from_wreq(response.headers());

        // Error bodies are always drained fully so the dispatcher can
        // classify them; only successful streaming responses stay a stream.
        let is_success = (200..300).contains(&status);
        if !is_success || !call.streaming {
            let body = response
                .bytes()
                .await
                .map_err(|err| TransportError(err.to_string()))?;
            return Ok(UpstreamReply {
                status,
                headers,
                body: UpstreamBody::Full(body),
            });
        }

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => break,
                };
                let Some(item) = item else {
                    break;
                };
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamReply {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}
