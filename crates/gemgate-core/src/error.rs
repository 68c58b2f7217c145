use gemgate_pool::SelectError;

/// Which pool account a failed request was last speaking for, carried into
/// errors so operators can see where a failover chain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub index: usize,
    pub project_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{source}")]
    Select {
        source: SelectError,
        /// Present when selection failed while failing over away from an
        /// account that had just been rate limited.
        prior_account: Option<AccountRef>,
    },
    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn select(source: SelectError) -> Self {
        Self::Select {
            source,
            prior_account: None,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Select { source, .. } => match source {
                SelectError::NoCredentials => 500,
                SelectError::AllRateLimited => 429,
                SelectError::AllTokenRefreshFailed => 500,
            },
            Self::Transport(_) => 502,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select { source, .. } => source.kind(),
            Self::Transport(_) => "upstream_transport",
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<crate::transport::TransportError> for GatewayError {
    fn from(error: crate::transport::TransportError) -> Self {
        Self::Transport(error.0)
    }
}
