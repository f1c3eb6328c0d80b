//! Session store, the single owner of the signed-in user's credentials.
//!
//! Reads are lock-free through `ArcSwapOption`. Every write is mirrored to a
//! [`CredentialStorage`] and announced on a `watch` channel carrying the
//! current access token, which the realtime lifecycle follows.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as IoWrite};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::token::{decode_claims, retention_days};

/// Access + refresh credentials of the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Build a session, reading the expiry from the access token's `exp` claim.
    pub fn from_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token: refresh_token.into(),
            expires_at: claims.expires_at,
        })
    }

    /// Subject (`sub`) of the access token, when it carries one.
    pub fn user_id(&self) -> Option<String> {
        decode_claims(&self.access_token).ok()?.subject
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// Durable storage
// ---------------------------------------------------------------------------

/// Durable home for credentials between process runs.
pub trait CredentialStorage: Send + Sync {
    /// Persist the session, keeping it for `retain_days` whole days.
    fn save(&self, session: &Session, retain_days: i64) -> Result<()>;
    /// Load a previously saved session that has not outlived its retention.
    fn load(&self) -> Result<Option<Session>>;
    fn remove(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(flatten)]
    session: Session,
    keep_until: DateTime<Utc>,
}

impl StoredCredentials {
    fn new(session: &Session, retain_days: i64) -> Self {
        Self {
            session: session.clone(),
            keep_until: Utc::now() + Duration::days(retain_days),
        }
    }

    fn into_live(self, now: DateTime<Utc>) -> Option<Session> {
        (self.keep_until > now).then_some(self.session)
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    slot: ArcSwapOption<StoredCredentials>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn save(&self, session: &Session, retain_days: i64) -> Result<()> {
        self.slot
            .store(Some(Arc::new(StoredCredentials::new(session, retain_days))));
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>> {
        Ok(self
            .slot
            .load_full()
            .and_then(|stored| stored.as_ref().clone().into_live(Utc::now())))
    }

    fn remove(&self) -> Result<()> {
        self.slot.store(None);
        Ok(())
    }
}

/// JSON file storage, written owner-only.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStorage for FileStorage {
    fn save(&self, session: &Session, retain_days: i64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&StoredCredentials::new(session, retain_days))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredCredentials = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Storage(format!("corrupt credentials file: {e}")))?;
        match stored.into_live(Utc::now()) {
            Some(session) => Ok(Some(session)),
            None => {
                self.remove()?;
                Ok(None)
            }
        }
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Holder of the one current [`Session`]. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: ArcSwapOption<Session>,
    storage: Arc<dyn CredentialStorage>,
    token_tx: watch::Sender<Option<String>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                current: ArcSwapOption::empty(),
                storage,
                token_tx,
            }),
        }
    }

    /// Store backed by [`MemoryStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Load a persisted session, if any, and make it current.
    pub fn restore(&self) -> Result<Option<Session>> {
        let loaded = self.inner.storage.load()?;
        if let Some(session) = &loaded {
            info!(
                component = "session",
                event = "session.restored",
                expires_at = %session.expires_at,
                "Restored persisted session"
            );
            self.install(Some(session.clone()));
        }
        Ok(loaded)
    }

    pub fn get(&self) -> Option<Session> {
        self.inner.current.load_full().map(|s| s.as_ref().clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .current
            .load()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.current.load().is_some()
    }

    /// Replace the current session and persist it.
    ///
    /// A storage failure is logged; the in-memory session still takes effect.
    pub fn set(&self, session: Session) {
        let days = retention_days(session.expires_at, Utc::now());
        if let Err(e) = self.inner.storage.save(&session, days) {
            warn!(
                component = "session",
                event = "session.persist_failed",
                error = %e,
                "Failed to persist credentials"
            );
        }
        debug!(
            component = "session",
            event = "session.set",
            retain_days = days,
            expires_at = %session.expires_at,
            "Session updated"
        );
        self.install(Some(session));
    }

    /// Drop the current session and its persisted copy.
    pub fn clear(&self) {
        if let Err(e) = self.inner.storage.remove() {
            warn!(
                component = "session",
                event = "session.remove_failed",
                error = %e,
                "Failed to remove persisted credentials"
            );
        }
        if self.inner.current.load().is_some() {
            info!(
                component = "session",
                event = "session.cleared",
                "Session cleared"
            );
        }
        self.install(None);
    }

    /// Watch the current access token. `None` means signed out.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.token_tx.subscribe()
    }

    fn install(&self, session: Option<Session>) {
        let token = session.as_ref().map(|s| s.access_token.clone());
        self.inner.current.store(session.map(Arc::new));
        self.inner.token_tx.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{future_token, mint_token};

    fn session(sub: &str) -> Session {
        Session::from_tokens(future_token(sub), format!("refresh-{sub}")).expect("session")
    }

    #[test]
    fn from_tokens_reads_expiry_claim() {
        let s = Session::from_tokens(mint_token("u", 1_705_312_800), "r").expect("session");
        assert_eq!(s.expires_at.timestamp(), 1_705_312_800);
        assert_eq!(s.user_id().as_deref(), Some("u"));
    }

    #[test]
    fn set_get_clear() {
        let store = SessionStore::in_memory();
        assert!(store.get().is_none());

        let s = session("alice");
        store.set(s.clone());
        assert_eq!(store.get(), Some(s.clone()));
        assert_eq!(store.access_token(), Some(s.access_token));

        store.clear();
        assert!(store.get().is_none());
        assert!(!store.is_signed_in());
    }

    #[test]
    fn watch_reports_token_changes_only() {
        let store = SessionStore::in_memory();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().expect("open"));

        let s = session("alice");
        store.set(s.clone());
        assert!(rx.has_changed().expect("open"));
        assert_eq!(rx.borrow_and_update().clone(), Some(s.access_token.clone()));

        store.set(s);
        assert!(!rx.has_changed().expect("open"));

        store.clear();
        assert!(rx.has_changed().expect("open"));
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[test]
    fn restore_picks_up_persisted_session() {
        let storage = Arc::new(MemoryStorage::new());
        let first = SessionStore::new(storage.clone());
        let s = session("bob");
        first.set(s.clone());

        let second = SessionStore::new(storage);
        assert_eq!(second.restore().expect("restore"), Some(s.clone()));
        assert_eq!(second.get(), Some(s));
    }

    #[test]
    fn clear_removes_persisted_copy() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        store.set(session("carol"));
        store.clear();
        assert!(storage.load().expect("load").is_none());
    }

    #[test]
    fn expired_token_is_not_retained() {
        let storage = MemoryStorage::new();
        let s = Session::from_tokens(mint_token("old", 1_000), "r").expect("session");
        storage
            .save(&s, retention_days(s.expires_at, Utc::now()))
            .expect("save");
        assert!(storage.load().expect("load").is_none());
    }

    #[test]
    fn file_storage_round_trip_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("nested").join("credentials.json"));
        assert!(storage.load().expect("load empty").is_none());

        let s = session("dave");
        storage.save(&s, 3).expect("save");
        assert_eq!(storage.load().expect("load"), Some(s));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(storage.path()).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        storage.remove().expect("remove");
        storage.remove().expect("remove twice");
        assert!(storage.load().expect("load removed").is_none());
    }

    #[test]
    fn file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        fs::write(&path, b"{not json").expect("write");
        let storage = FileStorage::new(path);
        assert!(matches!(storage.load(), Err(ClientError::Storage(_))));
    }
}
