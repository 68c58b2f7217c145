use std::sync::{Arc, OnceLock};
use std::time::Duration;

use wreq::Proxy;

struct SharedClient {
    proxy: Option<String>,
    client: Arc<wreq::Client>,
}

static SHARED_CLIENT: OnceLock<SharedClient> = OnceLock::new();

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Process-wide upstream HTTP client. Only a single egress proxy is
/// supported; a later call with a different proxy is a configuration error.
pub fn shared_client(proxy: Option<&str>) -> Result<Arc<wreq::Client>, wreq::Error> {
    let proxy_owned = proxy.map(|value| value.to_string());
    if let Some(shared) = SHARED_CLIENT.get() {
        if shared.proxy != proxy_owned {
            tracing::warn!(
                requested = %proxy_owned.as_deref().unwrap_or(""),
                "egress proxy mismatch, reusing the first configured client"
            );
        }
        return Ok(shared.client.clone());
    }

    let mut builder = wreq::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    if let Some(proxy_url) = proxy {
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }
    let client = builder.build()?;
    let shared = SharedClient {
        proxy: proxy_owned,
        client: Arc::new(client),
    };
    let _ = SHARED_CLIENT.set(shared);
    Ok(SHARED_CLIENT
        .get()
        .expect("shared client must be set")
        .client
        .clone())
}
