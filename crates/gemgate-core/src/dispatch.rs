use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use gemgate_pool::{AccountPool, ModelClass, Selection};
use gemgate_protocol::gemini::GenerateContentRequest;

use crate::error::{AccountRef, GatewayError};
use crate::transport::{Headers, UpstreamBody, UpstreamCall, UpstreamReply, UpstreamTransport};

#[derive(Debug)]
pub struct DispatchReply {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
    pub account: AccountRef,
}

/// Sends one request through the pool, handling the two recoverable
/// upstream verdicts: a rate-limit answer fails over to the next account
/// once, an auth rejection re-refreshes the same account once. Everything
/// else, success or not, is passed through as-is.
pub struct Dispatcher {
    pool: Arc<AccountPool>,
    transport: Arc<dyn UpstreamTransport>,
    base_url: String,
}

impl Dispatcher {
    pub fn new(pool: Arc<AccountPool>, transport: Arc<dyn UpstreamTransport>, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            transport,
            base_url: base_url.into(),
        }
    }

    pub async fn dispatch(
        &self,
        model: &str,
        request: &GenerateContentRequest,
        streaming: bool,
    ) -> Result<DispatchReply, GatewayError> {
        let class = ModelClass::of(model);
        let selection = self
            .pool
            .select_account(class)
            .await
            .map_err(GatewayError::select)?;
        let url = self.endpoint(streaming);

        let reply = self.call(&url, &selection, model, request, streaming).await?;
        match reply.status {
            429 | 503 => {
                warn!(
                    account = selection.index,
                    status = reply.status,
                    "upstream rate limited, failing over"
                );
                let prior = account_ref(&selection);
                self.pool.report_limit(selection.index, class).await;
                let next = match self.pool.select_account(class).await {
                    Ok(next) => next,
                    Err(source) => {
                        return Err(GatewayError::Select {
                            source,
                            prior_account: Some(prior),
                        });
                    }
                };
                info!(from = prior.index, to = next.index, "retrying on next account");
                // A second rejection passes through untouched; one failover
                // hop bounds worst-case latency.
                let retry = self.call(&url, &next, model, request, streaming).await?;
                Ok(finalize(retry, &next))
            }
            401 => {
                warn!(account = selection.index, "upstream rejected token, re-refreshing");
                self.pool.invalidate_token(selection.index).await;
                match self.pool.token_for(selection.index).await {
                    Some(access_token) => {
                        let refreshed = Selection {
                            access_token,
                            ..selection.clone()
                        };
                        let retry = self.call(&url, &refreshed, model, request, streaming).await?;
                        Ok(finalize(retry, &refreshed))
                    }
                    // The original 401 stands when no fresh token appears.
                    None => Ok(finalize(reply, &selection)),
                }
            }
            _ => Ok(finalize(reply, &selection)),
        }
    }

    async fn call(
        &self,
        url: &str,
        selection: &Selection,
        model: &str,
        request: &GenerateContentRequest,
        streaming: bool,
    ) -> Result<UpstreamReply, GatewayError> {
        let call = UpstreamCall {
            url: url.to_string(),
            access_token: selection.access_token.clone(),
            body: encode_body(model, &selection.project_id, request),
            streaming,
        };
        Ok(self.transport.send(call).await?)
    }

    fn endpoint(&self, streaming: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        if streaming {
            format!("{base}/v1internal:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1internal:generateContent")
        }
    }
}

fn account_ref(selection: &Selection) -> AccountRef {
    AccountRef {
        index: selection.index,
        project_id: selection.project_id.clone(),
    }
}

fn finalize(mut reply: UpstreamReply, selection: &Selection) -> DispatchReply {
    reply.headers.push((
        "x-gemgate-account-index".to_string(),
        selection.index.to_string(),
    ));
    if !selection.project_id.is_empty() {
        reply
            .headers
            .push(("x-gemgate-project".to_string(), selection.project_id.clone()));
    }
    DispatchReply {
        status: reply.status,
        headers: reply.headers,
        body: reply.body,
        account: account_ref(selection),
    }
}

/// The upstream envelope: the caller's request nested under `request`,
/// alongside the upstream model name and billing project.
fn encode_body(model: &str, project_id: &str, request: &GenerateContentRequest) -> Bytes {
    let payload = serde_json::json!({
        "model": model,
        "project": project_id,
        "request": request,
    });
    // Serialization of these request types cannot fail.
    Bytes::from(serde_json::to_vec(&payload).unwrap_or_default())
}
