//! Tether client core.
//!
//! Keeps an authenticated chat session valid across concurrent requests and
//! reconciles the realtime message stream with REST-fetched state.
//!
//! - [`SessionStore`]: the one current session, persisted through a
//!   [`CredentialStorage`]
//! - [`RefreshCoordinator`]: single-flight token renewal
//! - [`AuthenticatedClient`]: bearer attach, 401 → renew → replay once
//! - [`RealtimeChannel`]: live connection plus scoped event subscriptions
//! - [`ConversationCache`]: conversation list and histories as snapshots
//! - [`SyncEngine`]: wires the above to the session lifecycle

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod grouping;
pub mod merge;
pub mod pipeline;
pub mod realtime;
pub mod refresh;
pub mod runtime;
pub mod session;
pub mod token;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::ChatApi;
pub use cache::{CacheChange, CacheSnapshot, ConversationCache};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use grouping::{group_by_date, DateGroup};
pub use merge::{CacheState, LiveOutcome};
pub use pipeline::AuthenticatedClient;
pub use realtime::{ChannelConnector, ChannelStatus, Connection, RealtimeChannel, Subscription};
pub use refresh::{AuthEvent, RefreshCoordinator, RefreshPhase};
pub use runtime::{ReconnectPolicy, SyncEngine};
pub use session::{CredentialStorage, FileStorage, MemoryStorage, Session, SessionStore};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use websocket::WebSocketConnector;

use std::sync::Arc;

/// Everything a shell needs, built from one [`ClientConfig`].
#[derive(Clone)]
pub struct Client {
    pub config: ClientConfig,
    pub api: ChatApi,
    pub channel: RealtimeChannel,
}

impl Client {
    /// Real transports and file-backed credentials under `config.data_dir`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let storage = Arc::new(FileStorage::new(config.credentials_path()));
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.clone())?);
        let connector = Arc::new(WebSocketConnector::new(config.realtime_url.clone()));
        Ok(Self::with_parts(config, storage, transport, connector))
    }

    pub fn with_parts(
        config: ClientConfig,
        storage: Arc<dyn CredentialStorage>,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let store = SessionStore::new(storage);
        let coordinator =
            RefreshCoordinator::new(store, transport.clone(), config.refresh_path.clone());
        let api = ChatApi::new(
            AuthenticatedClient::new(coordinator, transport),
            config.sign_in_path.clone(),
        );
        Self {
            config,
            api,
            channel: RealtimeChannel::new(connector),
        }
    }

    pub fn store(&self) -> &SessionStore {
        self.api.store()
    }

    /// Load persisted credentials, if any.
    pub fn restore(&self) -> Result<Option<Session>> {
        self.store().restore()
    }

    pub fn start_sync(&self) -> Result<SyncEngine> {
        SyncEngine::start(self.api.clone(), self.channel.clone())
    }
}
