//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tether_protocol::NewMessage;
use tokio::sync::mpsc;

use crate::error::{ClientError, Result};
use crate::realtime::{ChannelConnector, Connection};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, AUTHORIZATION};

pub(crate) const REFRESH_PATH: &str = "/auth/refresh";

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Unsigned JWT with the given subject and expiry. Every call is unique.
pub(crate) fn mint_token(sub: &str, exp: i64) -> String {
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let payload = json!({ "sub": sub, "exp": exp, "jti": nonce });
    format!(
        "e30.{}.sig",
        URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes())
    )
}

/// Token valid for the next hour.
pub(crate) fn future_token(sub: &str) -> String {
    mint_token(sub, Utc::now().timestamp() + 3600)
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

pub(crate) fn refresh_ok(access: &str, refresh: Option<&str>) -> HttpResponse {
    let mut body = json!({ "accessToken": access });
    if let Some(refresh) = refresh {
        body["refreshToken"] = json!(refresh);
    }
    json_response(200, body)
}

pub(crate) fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("timestamp")
        .with_timezone(&Utc)
}

pub(crate) fn live(id: &str, from: &str, to: &str, text: &str, created_at: &str) -> NewMessage {
    NewMessage {
        id: id.to_string(),
        from_user_id: from.to_string(),
        to_user_id: to.to_string(),
        message: text.to_string(),
        created_at: at(created_at),
        has_read: false,
    }
}

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

type Responder = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

#[derive(Clone)]
struct Route {
    delay: Option<Duration>,
    respond: Responder,
}

/// Scripted [`HttpTransport`]. Routes match on the path without its query.
///
/// With [`FakeTransport::accept_only`] set, every non-renewal request whose
/// bearer differs from the accepted token gets a 401 before routing.
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    accepted: Mutex<Option<String>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            accepted: Mutex::new(None),
        })
    }

    pub(crate) fn on(&self, path: &str, response: HttpResponse) {
        self.on_with(path, None, move |_| Ok(response.clone()));
    }

    pub(crate) fn on_with<F>(&self, path: &str, delay: Option<Duration>, respond: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        self.routes.lock().expect("routes").insert(
            path.to_string(),
            Route {
                delay,
                respond: Arc::new(respond),
            },
        );
    }

    pub(crate) fn on_refresh(&self, response: HttpResponse) {
        self.on(REFRESH_PATH, response);
    }

    pub(crate) fn on_refresh_delayed(&self, delay: Duration, response: HttpResponse) {
        self.on_with(REFRESH_PATH, Some(delay), move |_| Ok(response.clone()));
    }

    pub(crate) fn fail_network(&self, path: &str) {
        self.on_with(path, None, |_| {
            Err(ClientError::Network("connection refused".into()))
        });
    }

    pub(crate) fn accept_only(&self, token: &str) {
        *self.accepted.lock().expect("accepted") = Some(token.to_string());
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint() == path)
            .collect()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.requests_to(REFRESH_PATH).len()
    }

    fn rejects(&self, request: &HttpRequest) -> bool {
        if request.endpoint() == REFRESH_PATH {
            return false;
        }
        match self.accepted.lock().expect("accepted").as_deref() {
            Some(token) => {
                let expected = format!("Bearer {token}");
                request.header_value(AUTHORIZATION) != Some(expected.as_str())
            }
            None => false,
        }
    }
}

impl HttpTransport for FakeTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        async move {
            self.requests.lock().expect("requests").push(request.clone());
            if self.rejects(&request) {
                return Ok(HttpResponse::new(401, r#"{"error":"Unauthorized"}"#));
            }
            let route = self
                .routes
                .lock()
                .expect("routes")
                .get(request.endpoint())
                .cloned();
            let Some(route) = route else {
                return Ok(HttpResponse::new(404, r#"{"error":"Not Found"}"#));
            };
            if let Some(delay) = route.delay {
                tokio::time::sleep(delay).await;
            }
            (route.respond)(&request)
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

/// Server end of a fake realtime connection.
pub(crate) struct FakeLink {
    pub(crate) credential: String,
    pub(crate) to_client: mpsc::Sender<String>,
    pub(crate) from_client: mpsc::Receiver<String>,
}

impl FakeLink {
    pub(crate) async fn push(&self, frame: &str) {
        self.to_client
            .send(frame.to_string())
            .await
            .expect("client reader alive");
    }

    pub(crate) async fn recv_json(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), self.from_client.recv())
            .await
            .expect("frame within timeout")
            .expect("client writer alive");
        serde_json::from_str(&frame).expect("client frame is JSON")
    }
}

pub(crate) struct FakeConnector {
    links_tx: mpsc::UnboundedSender<FakeLink>,
    links_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeLink>>,
    connects: AtomicUsize,
    failing: AtomicBool,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            links_tx,
            links_rx: tokio::sync::Mutex::new(links_rx),
            connects: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub(crate) fn fail_connections(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) async fn next_link(&self) -> FakeLink {
        let mut rx = self.links_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("connection within timeout")
            .expect("connector alive")
    }
}

impl ChannelConnector for FakeConnector {
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Connection>> {
        let credential = credential.to_string();
        async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ClientError::Network("handshake refused".into()));
            }
            let (to_client, inbound) = mpsc::channel(32);
            let (outbound, from_client) = mpsc::channel(32);
            let _ = self.links_tx.send(FakeLink {
                credential,
                to_client,
                from_client,
            });
            Ok(Connection { outbound, inbound })
        }
        .boxed()
    }
}
