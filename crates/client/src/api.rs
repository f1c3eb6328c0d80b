//! Chat REST endpoints on top of the authenticated pipeline.

use tether_protocol::rest::{ConversationDto, MessageDto, SignInRequest, SignInResponse};
use tether_protocol::{Conversation, Message, Profile};
use tracing::info;

use crate::error::{ClientError, Result};
use crate::pipeline::AuthenticatedClient;
use crate::session::{Session, SessionStore};
use crate::transport::HttpRequest;

#[derive(Clone)]
pub struct ChatApi {
    client: AuthenticatedClient,
    sign_in_path: String,
}

impl ChatApi {
    pub fn new(client: AuthenticatedClient, sign_in_path: impl Into<String>) -> Self {
        Self {
            client,
            sign_in_path: sign_in_path.into(),
        }
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn store(&self) -> &SessionStore {
        self.client.store()
    }

    /// Exchange credentials for a session and make it current.
    ///
    /// Goes straight to the transport: there is no bearer to attach yet and a
    /// 401 here means bad credentials, not an expired token.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Profile> {
        let request = HttpRequest::post(self.sign_in_path.clone()).json(&SignInRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let body: SignInResponse = self
            .client
            .transport()
            .execute(request)
            .await?
            .error_for_status()?
            .json()?;

        let session = Session::from_tokens(body.access_token, body.refresh_token)?;
        let profile = match body.user {
            Some(user) => Profile::from(user),
            None => Profile {
                id: session
                    .user_id()
                    .ok_or_else(|| ClientError::InvalidToken("token has no subject".into()))?,
                ..Profile::default()
            },
        };
        self.store().set(session);
        info!(
            component = "api",
            event = "auth.signed_in",
            user_id = %profile.id,
            "Signed in"
        );
        Ok(profile)
    }

    pub fn sign_out(&self) {
        self.store().clear();
        info!(component = "api", event = "auth.signed_out", "Signed out");
    }

    /// Id of the signed-in user, read from the access token subject.
    pub fn viewer_id(&self) -> Result<String> {
        let session = self.store().get().ok_or(ClientError::SessionTerminated)?;
        session
            .user_id()
            .ok_or_else(|| ClientError::InvalidToken("token has no subject".into()))
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let viewer = self.viewer_id()?;
        let dtos: Vec<ConversationDto> = self.client.send_json(HttpRequest::get("/chats")).await?;
        Ok(dtos
            .into_iter()
            .map(|dto| dto.into_conversation(&viewer))
            .collect())
    }

    /// Full history with `peer`, oldest first. Messages carry `peer` as their
    /// conversation id until the cache stamps the real one.
    pub async fn fetch_history(&self, peer: &str) -> Result<Vec<Message>> {
        let viewer = self.viewer_id()?;
        let dtos: Vec<MessageDto> = self
            .client
            .send_json(HttpRequest::get(format!("/chats/{peer}/messages")))
            .await?;
        let mut messages: Vec<Message> = dtos
            .into_iter()
            .map(|dto| dto.into_message(&viewer, peer))
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    pub async fn mark_read(&self, peer: &str) -> Result<()> {
        self.client
            .send_ok(HttpRequest::patch(format!("/chats/{peer}/read")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshCoordinator;
    use crate::test_support::{future_token, json_response, FakeTransport, REFRESH_PATH};
    use crate::transport::HttpResponse;
    use serde_json::json;
    use std::sync::Arc;
    use tether_protocol::Direction;

    fn api() -> (ChatApi, Arc<FakeTransport>) {
        let transport = FakeTransport::new();
        let coordinator =
            RefreshCoordinator::new(SessionStore::in_memory(), transport.clone(), REFRESH_PATH);
        let client = AuthenticatedClient::new(coordinator, transport.clone());
        (ChatApi::new(client, "/auth/sign-in"), transport)
    }

    #[tokio::test]
    async fn sign_in_stores_session_without_bearer() {
        let (api, transport) = api();
        let access = future_token("me");
        transport.on(
            "/auth/sign-in",
            json_response(
                200,
                json!({"accessToken": access, "refreshToken": "r-1", "user": {"id": "me", "name": "Me"}}),
            ),
        );

        let profile = api.sign_in("me@example.com", "hunter2").await.expect("sign in");
        assert_eq!(profile.display_name.as_deref(), Some("Me"));
        assert_eq!(api.store().access_token(), Some(access));
        assert_eq!(api.viewer_id().expect("viewer"), "me");

        let sent = transport.requests_to("/auth/sign-in");
        assert!(sent[0].header_value("authorization").is_none());
        assert_eq!(sent[0].body.as_ref().expect("body")["email"], "me@example.com");
    }

    #[tokio::test]
    async fn bad_credentials_do_not_create_a_session() {
        let (api, transport) = api();
        transport.on(
            "/auth/sign-in",
            json_response(401, json!({"message": "invalid email or password"})),
        );

        let err = api.sign_in("me@example.com", "nope").await.expect_err("401");
        assert!(matches!(err, ClientError::Endpoint { status: 401, .. }));
        assert!(!api.store().is_signed_in());
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn history_resolves_direction_and_sorts() {
        let (api, transport) = api();
        api.store()
            .set(Session::from_tokens(future_token("me"), "r").expect("session"));
        transport.on(
            "/chats/alice/messages",
            json_response(
                200,
                json!([
                    {"id":"m-2","fromUserId":"me","toUserId":"alice","message":"yo","createdAt":"2024-01-15T10:05:00Z","hasRead":true},
                    {"id":"m-1","fromUserId":"alice","toUserId":"me","message":"hey","createdAt":"2024-01-15T10:00:00Z"}
                ]),
            ),
        );

        let history = api.fetch_history("alice").await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "m-1");
        assert_eq!(history[0].direction, Direction::Inbound);
        assert_eq!(history[1].direction, Direction::Outbound);
        assert_eq!(history[1].conversation_id, "alice");
    }

    #[tokio::test]
    async fn list_requires_session() {
        let (api, transport) = api();
        assert!(matches!(
            api.list_conversations().await,
            Err(ClientError::SessionTerminated)
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn mark_read_patches_conversation() {
        let (api, transport) = api();
        api.store()
            .set(Session::from_tokens(future_token("me"), "r").expect("session"));
        transport.on("/chats/alice/read", HttpResponse::new(204, Vec::new()));

        api.mark_read("alice").await.expect("mark read");
        let sent = transport.requests_to("/chats/alice/read");
        assert_eq!(sent[0].method, reqwest::Method::PATCH);
    }
}
