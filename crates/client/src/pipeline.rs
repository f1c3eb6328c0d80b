//! Authenticated request pipeline.
//!
//! Attaches the current bearer to every request. A 401 suspends the request,
//! asks the [`RefreshCoordinator`] for a new token, and replays the identical
//! request exactly once.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::refresh::RefreshCoordinator;
use crate::session::SessionStore;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

#[derive(Clone)]
pub struct AuthenticatedClient {
    coordinator: RefreshCoordinator,
    transport: Arc<dyn HttpTransport>,
}

impl AuthenticatedClient {
    pub fn new(coordinator: RefreshCoordinator, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            coordinator,
            transport,
        }
    }

    pub fn store(&self) -> &SessionStore {
        self.coordinator.store()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Raw transport, for calls that must not carry the session bearer.
    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Send with credentials. Any non-401 response is returned as-is.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let Some(token) = self.store().access_token() else {
            return Err(ClientError::SessionTerminated);
        };

        let response = self
            .transport
            .execute(request.clone().with_bearer(&token))
            .await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if request.endpoint() == self.coordinator.refresh_path() {
            warn!(
                component = "pipeline",
                event = "pipeline.refresh_endpoint_unauthorized",
                "Renewal endpoint rejected the request"
            );
            return Err(ClientError::AuthExpired);
        }

        debug!(
            component = "pipeline",
            event = "pipeline.unauthorized",
            method = %request.method,
            path = %request.endpoint(),
            "401 received, waiting for token renewal"
        );
        let renewed = self.coordinator.request_refresh(Some(&token)).await?;

        let replay = self
            .transport
            .execute(request.clone().with_bearer(&renewed))
            .await?;
        if replay.is_unauthorized() {
            warn!(
                component = "pipeline",
                event = "pipeline.replay_unauthorized",
                method = %request.method,
                path = %request.endpoint(),
                "Replay rejected after renewal"
            );
            return Err(ClientError::AuthExpired);
        }
        debug!(
            component = "pipeline",
            event = "pipeline.replayed",
            status = replay.status,
            path = %request.endpoint(),
            "Request replayed with renewed token"
        );
        Ok(replay)
    }

    /// Send, require a 2xx, and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        self.send(request).await?.error_for_status()?.json()
    }

    /// Send and require a 2xx, ignoring the body.
    pub async fn send_ok(&self, request: HttpRequest) -> Result<()> {
        self.send(request).await?.error_for_status()?;
        Ok(())
    }
}
