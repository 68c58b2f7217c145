pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod sse;
pub mod transport;

use std::sync::Arc;

use gemgate_common::GatewayConfig;
use gemgate_pool::AccountPool;

pub use dispatch::{DispatchReply, Dispatcher};
pub use error::{AccountRef, GatewayError};
pub use transport::{
    Headers, HttpUpstream, TransportError, UpstreamBody, UpstreamCall, UpstreamReply,
    UpstreamTransport,
};

/// Everything the HTTP surface needs, assembled once at startup.
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub pool: Arc<AccountPool>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, pool: Arc<AccountPool>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            dispatcher,
        }
    }
}
