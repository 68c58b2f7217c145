use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use gemgate_common::is_placeholder;
use gemgate_core::{catalog, sse, Gateway, GatewayError, UpstreamBody};
use gemgate_protocol::gemini::GenerateContentResponse;
use gemgate_protocol::openai::ChatCompletionRequest;
use gemgate_transform::request::build_generate_request;
use gemgate_transform::response::build_completion;

pub fn gateway_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/status", get(status))
        .route("/config/check", get(config_check))
        .layer(middleware::from_fn_with_state(gateway.clone(), require_api_key))
        .with_state(gateway)
}

async fn require_api_key(
    State(gateway): State<Gateway>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = gateway.config.api_key.as_deref() else {
        return next.run(req).await;
    };
    let presented = bearer_token(req.headers());
    // Keys are compared by hash so the configured secret never sits next to
    // attacker-controlled strings in a comparison.
    let authorized = presented
        .map(|key| blake3::hash(key.as_bytes()) == blake3::hash(expected.as_bytes()))
        .unwrap_or(false);
    if !authorized {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid api key",
        );
    }
    next.run(req).await
}

async fn chat_completions(
    State(gateway): State<Gateway>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let requested_model = request.model.clone();
    let upstream_model = catalog::resolve_model(&requested_model).to_string();
    let upstream_request = build_generate_request(&request);
    let thinking = gateway.config.thinking_as_content;

    let reply = match gateway
        .dispatcher
        .dispatch(&upstream_model, &upstream_request, request.stream)
        .await
    {
        Ok(reply) => reply,
        Err(error) => return gateway_error_response(&error),
    };

    if !(200..300).contains(&reply.status) {
        return passthrough_response(reply.status, reply.headers, reply.body);
    }

    if request.stream {
        let upstream = match reply.body {
            UpstreamBody::Stream(rx) => rx,
            // A success that arrived fully buffered still translates; feed
            // it through as one chunk.
            UpstreamBody::Full(bytes) => {
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let _ = tx.try_send(bytes);
                rx
            }
        };
        let translated = sse::translate_stream(upstream, &requested_model, thinking);
        let stream = ReceiverStream::new(translated).map(Ok::<_, Infallible>);
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(headers) = response.headers_mut() {
            append_diagnostic_headers(headers, &reply.headers);
        }
        return response
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let UpstreamBody::Full(bytes) = reply.body else {
        return error_response(
            StatusCode::BAD_GATEWAY,
            "upstream_decode",
            "unexpected streaming body",
        );
    };
    let decoded = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(GenerateContentResponse::from_envelope);
    let Some(upstream_response) = decoded else {
        warn!("upstream success body did not decode");
        return error_response(
            StatusCode::BAD_GATEWAY,
            "upstream_decode",
            "upstream response body malformed",
        );
    };

    let completion = build_completion(upstream_response, &requested_model, thinking);
    let mut response = (StatusCode::OK, Json(completion)).into_response();
    append_diagnostic_headers(response.headers_mut(), &reply.headers);
    response
}

async fn list_models(State(_gateway): State<Gateway>) -> Response {
    let data: Vec<serde_json::Value> = catalog::known_models()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "owned_by": "gemgate",
            })
        })
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}

async fn status(State(gateway): State<Gateway>) -> Response {
    Json(gateway.pool.status().await).into_response()
}

async fn config_check(State(gateway): State<Gateway>) -> Response {
    let config = &gateway.config;
    let client_configured =
        !is_placeholder(&config.oauth_client_id) && !is_placeholder(&config.oauth_client_secret);
    Json(serde_json::json!({
        "oauth_client_configured": client_configured,
        "accounts": gateway.pool.len(),
        "accounts_missing_refresh_token": gateway.pool.accounts_missing_refresh_token(),
    }))
    .into_response()
}

fn gateway_error_response(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(error.body())).into_response();
    if let GatewayError::Select {
        prior_account: Some(account),
        ..
    } = error
    {
        if let Ok(value) = HeaderValue::from_str(&account.index.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-gemgate-account-index"), value);
        }
    }
    response
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "type": kind, "message": message }
        })),
    )
        .into_response()
}

/// Upstream rejections keep their status, headers, and body so callers see
/// exactly what the upstream said.
fn passthrough_response(
    status: u16,
    headers: gemgate_core::Headers,
    body: UpstreamBody,
) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(out) = builder.headers_mut() {
        for (name, value) in &headers {
            if is_hop_by_hop_or_framing_header(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                out.append(name, value);
            }
        }
    }
    let body = match body {
        UpstreamBody::Full(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        }
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn append_diagnostic_headers(out: &mut HeaderMap, upstream: &gemgate_core::Headers) {
    for (name, value) in upstream {
        if !name.starts_with("x-gemgate-") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out.insert(name, value);
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let value = value.trim();
    let prefix = "Bearer ";
    if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = value[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token);
        }
    }
    None
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction_is_case_insensitive_and_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer   sk-test  "),
        );
        assert_eq!(bearer_token(&headers), Some("sk-test"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn framing_headers_are_dropped_on_passthrough() {
        assert!(is_hop_by_hop_or_framing_header("Content-Length"));
        assert!(is_hop_by_hop_or_framing_header("transfer-encoding"));
        assert!(!is_hop_by_hop_or_framing_header("x-gemgate-account-index"));
        assert!(!is_hop_by_hop_or_framing_header("content-type"));
    }

    #[test]
    fn diagnostic_headers_are_the_only_ones_copied() {
        let upstream = vec![
            ("x-gemgate-account-index".to_string(), "2".to_string()),
            ("x-gemgate-project".to_string(), "proj".to_string()),
            ("server".to_string(), "upstream".to_string()),
        ];
        let mut out = HeaderMap::new();
        append_diagnostic_headers(&mut out, &upstream);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("x-gemgate-account-index").unwrap(), "2");
        assert!(out.get("server").is_none());
    }
}
