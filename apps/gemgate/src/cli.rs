use clap::Parser;

use gemgate_common::GatewayConfig;

#[derive(Parser)]
#[command(name = "gemgate")]
pub(crate) struct Cli {
    #[arg(long, env = "GEMGATE_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "GEMGATE_PORT", default_value_t = 8045)]
    pub(crate) port: u16,
    /// Inbound gateway key; unset means no inbound auth.
    #[arg(long, env = "GEMGATE_API_KEY")]
    pub(crate) api_key: Option<String>,
    /// Path of the JSON credential-pool file.
    #[arg(long, env = "GEMGATE_CREDENTIALS", default_value = "credentials.json")]
    pub(crate) credentials: String,
    #[arg(long, env = "GEMGATE_DSN", default_value = "sqlite://gemgate.db?mode=rwc")]
    pub(crate) dsn: String,
    #[arg(
        long,
        env = "GEMGATE_UPSTREAM_BASE_URL",
        default_value = "https://cloudcode-pa.googleapis.com"
    )]
    pub(crate) upstream_base_url: String,
    #[arg(long, env = "GEMGATE_OAUTH_CLIENT_ID")]
    pub(crate) oauth_client_id: Option<String>,
    #[arg(long, env = "GEMGATE_OAUTH_CLIENT_SECRET")]
    pub(crate) oauth_client_secret: Option<String>,
    #[arg(long, env = "GEMGATE_OAUTH_TOKEN_URL")]
    pub(crate) oauth_token_url: Option<String>,
    /// Surface upstream "thought" parts to callers, wrapped in markers.
    #[arg(long, env = "GEMGATE_THINKING_AS_CONTENT", default_value_t = true)]
    pub(crate) thinking_as_content: bool,
    /// Outbound proxy for upstream and token-endpoint egress.
    #[arg(long, env = "GEMGATE_PROXY")]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn into_config(self, oauth: &gemgate_pool::OAuthConfig) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            api_key: self.api_key.filter(|key| !key.trim().is_empty()),
            credentials_path: self.credentials,
            dsn: self.dsn,
            upstream_base_url: self.upstream_base_url,
            oauth_client_id: oauth.client_id.clone(),
            oauth_client_secret: oauth.client_secret.clone(),
            oauth_token_url: oauth.token_url.clone(),
            thinking_as_content: self.thinking_as_content,
            proxy: self.proxy,
        }
    }
}
