use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::oauth::{AuthServer, TokenGrant};
use crate::ToolError;

/// Tokens this close to expiry are treated as expired so a credential handed
/// to an adapter cannot lapse mid-call.
const EXPIRY_SKEW_SECS: i64 = 60;

pub(crate) const DEFAULT_IDENTITY: &str = "user";

pub(crate) fn google_scopes() -> String {
    crate::env_optional("GOOGLE_SCOPES").unwrap_or_else(|| {
        [
            "https://www.googleapis.com/auth/gmail.send",
            "https://www.googleapis.com/auth/gmail.readonly",
            "https://www.googleapis.com/auth/gmail.modify",
            "https://www.googleapis.com/auth/calendar",
            "https://www.googleapis.com/auth/calendar.events",
        ]
        .join(" ")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum CredentialState {
    Unauthorized,
    Pending,
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Credential {
    pub(crate) identity: String,
    /// Space-joined scope set, matching the OAuth wire form.
    pub(crate) scopes: String,
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
    pub(crate) expires_at: i64,
    pub(crate) state: CredentialState,
}

impl Credential {
    pub(crate) fn is_expired(&self, now: i64) -> bool {
        now + EXPIRY_SKEW_SECS >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingAuthorization {
    pub(crate) identity: String,
    pub(crate) scopes: String,
    pub(crate) url: String,
    pub(crate) issued_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    credentials: HashMap<String, Credential>,
    #[serde(default)]
    pending: HashMap<String, PendingAuthorization>,
}

fn record_key(identity: &str, scopes: &str) -> String {
    format!("{identity}|{scopes}")
}

fn load_credential_file(path: &Path) -> CredentialFile {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
        Err(_) => CredentialFile::default(),
    }
}

fn save_credential_file(path: &Path, file: &CredentialFile) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("create {}: {e}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(file).map_err(|e| format!("encode: {e}"))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| format!("write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| format!("rename {}: {e}", path.display()))?;
    Ok(())
}

/// Persisted OAuth credentials keyed by identity + scope set, with
/// refresh-or-demote on read and single-flight refresh per key.
pub(crate) struct CredentialStore {
    path: PathBuf,
    auth: Arc<dyn AuthServer>,
    default_scopes: String,
    state: Mutex<CredentialFile>,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub(crate) fn open(
        workspace: &Path,
        auth: Arc<dyn AuthServer>,
        default_scopes: String,
    ) -> Self {
        let path = workspace.join("credentials.json");
        let state = load_credential_file(&path);
        CredentialStore {
            path,
            auth,
            default_scopes,
            state: Mutex::new(state),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn default_scopes(&self) -> &str {
        &self.default_scopes
    }

    pub(crate) fn authorization_url(&self, scopes: &str) -> String {
        self.auth.authorization_url(scopes)
    }

    fn flight_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn persist(&self, file: &CredentialFile) {
        if let Err(e) = save_credential_file(&self.path, file) {
            eprintln!("[credentials] persist failed: {e}");
        }
    }

    pub(crate) fn get_credential(&self, scopes: &str) -> Result<Credential, ToolError> {
        self.get_credential_for(DEFAULT_IDENTITY, scopes)
    }

    pub(crate) fn get_credential_for(
        &self,
        identity: &str,
        scopes: &str,
    ) -> Result<Credential, ToolError> {
        let key = record_key(identity, scopes);
        let now = Utc::now().timestamp();

        // Fast path: active and not about to expire.
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cred) = state.credentials.get(&key) {
                if cred.state == CredentialState::Active && !cred.is_expired(now) {
                    return Ok(cred.clone());
                }
            }
        }

        // Slow path under the per-key flight lock: exactly one caller
        // refreshes or issues the authorization URL; the rest reuse its
        // outcome.
        let flight = self.flight_lock(&key);
        let _guard = flight.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().timestamp();

        let existing = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cred) = state.credentials.get(&key) {
                if cred.state == CredentialState::Active && !cred.is_expired(now) {
                    return Ok(cred.clone());
                }
            }
            if let Some(pending) = state.pending.get(&key) {
                return Err(ToolError::AuthorizationRequired {
                    url: pending.url.clone(),
                });
            }
            let existing = state.credentials.get(&key).cloned();
            if let Some(cred) = &existing {
                if cred.state == CredentialState::Active && cred.is_expired(now) {
                    if let Some(stored) = state.credentials.get_mut(&key) {
                        stored.state = CredentialState::Expired;
                    }
                }
            }
            existing
        };

        if let Some(cred) = existing {
            if let Some(refresh_token) = cred.refresh_token.clone() {
                match self.auth.refresh(&refresh_token) {
                    Ok(grant) => {
                        let refreshed = self.store_grant(identity, scopes, grant, Some(cred));
                        return Ok(refreshed);
                    }
                    Err(e) => {
                        eprintln!("[credentials] refresh failed for {key}: {e}");
                        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(stored) = state.credentials.get_mut(&key) {
                            stored.state = CredentialState::Unauthorized;
                        }
                        self.persist(&state);
                    }
                }
            }
        }

        // No usable credential: issue and persist one authorization URL so
        // every waiting caller relays the same link.
        let url = self.auth.authorization_url(scopes);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.insert(
            key.clone(),
            PendingAuthorization {
                identity: identity.to_string(),
                scopes: scopes.to_string(),
                url: url.clone(),
                issued_at: now,
            },
        );
        if let Some(stored) = state.credentials.get_mut(&key) {
            stored.state = CredentialState::Pending;
        }
        self.persist(&state);
        Err(ToolError::AuthorizationRequired { url })
    }

    /// Exchange an authorization code and persist the resulting credential
    /// as active, overwriting any prior record for the identity/scope set.
    pub(crate) fn complete_authorization(&self, code: &str) -> Result<Credential, String> {
        self.complete_authorization_for(DEFAULT_IDENTITY, code)
    }

    pub(crate) fn complete_authorization_for(
        &self,
        identity: &str,
        code: &str,
    ) -> Result<Credential, String> {
        let grant = self.auth.exchange_code(code)?;
        let scopes = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .pending
                .values()
                .find(|p| p.identity == identity)
                .map(|p| p.scopes.clone())
                .unwrap_or_else(|| self.default_scopes.clone())
        };
        Ok(self.store_grant(identity, &scopes, grant, None))
    }

    fn store_grant(
        &self,
        identity: &str,
        scopes: &str,
        grant: TokenGrant,
        previous: Option<Credential>,
    ) -> Credential {
        let key = record_key(identity, scopes);
        let now = Utc::now().timestamp();
        // A refresh response may omit the refresh token; keep the stored one.
        let refresh_token = grant
            .refresh_token
            .or_else(|| previous.and_then(|c| c.refresh_token));
        let cred = Credential {
            identity: identity.to_string(),
            scopes: scopes.to_string(),
            access_token: grant.access_token,
            refresh_token,
            expires_at: now + grant.expires_in_secs,
            state: CredentialState::Active,
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.credentials.insert(key.clone(), cred.clone());
        state.pending.remove(&key);
        self.persist(&state);
        cred
    }

    #[cfg(test)]
    pub(crate) fn seed_credential(&self, cred: Credential) {
        let key = record_key(&cred.identity, &cred.scopes);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.credentials.insert(key, cred);
        self.persist(&state);
    }

    #[cfg(test)]
    pub(crate) fn active_credentials_for(&self, identity: &str) -> Vec<Credential> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .credentials
            .values()
            .filter(|c| c.identity == identity && c.state == CredentialState::Active)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct StubAuthServer {
        url_issues: AtomicUsize,
        refresh_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
        refresh_fails: bool,
    }

    impl StubAuthServer {
        fn new(refresh_fails: bool) -> Self {
            StubAuthServer {
                url_issues: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                refresh_fails,
            }
        }
    }

    impl AuthServer for StubAuthServer {
        fn authorization_url(&self, scopes: &str) -> String {
            let n = self.url_issues.fetch_add(1, Ordering::SeqCst);
            format!("https://auth.example/authorize?issue={n}&scope={scopes}")
        }

        fn exchange_code(&self, code: &str) -> Result<TokenGrant, String> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenGrant {
                access_token: format!("access-{code}"),
                refresh_token: Some(format!("refresh-{code}")),
                expires_in_secs: 3600,
            })
        }

        fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, String> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_fails {
                return Err("invalid_grant".to_string());
            }
            Ok(TokenGrant {
                access_token: format!("refreshed-{refresh_token}"),
                refresh_token: None,
                expires_in_secs: 3600,
            })
        }
    }

    fn temp_workspace(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("concierge-{tag}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn store_with(auth: Arc<StubAuthServer>, tag: &str) -> CredentialStore {
        CredentialStore::open(&temp_workspace(tag), auth, "scope.a scope.b".to_string())
    }

    fn expired_credential(scopes: &str) -> Credential {
        Credential {
            identity: DEFAULT_IDENTITY.to_string(),
            scopes: scopes.to_string(),
            access_token: "stale".to_string(),
            refresh_token: Some("rt-old".to_string()),
            expires_at: Utc::now().timestamp() - 10,
            state: CredentialState::Active,
        }
    }

    #[test]
    fn unauthorized_returns_typed_url() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = store_with(auth.clone(), "unauth");
        match store.get_credential("scope.a") {
            Err(ToolError::AuthorizationRequired { url }) => {
                assert!(url.contains("scope.a"));
            }
            other => panic!("expected AuthorizationRequired, got {other:?}"),
        }
        assert_eq!(auth.url_issues.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_token_is_refreshed_before_return() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = store_with(auth.clone(), "refresh");
        store.seed_credential(expired_credential("scope.a"));

        let cred = store.get_credential("scope.a").unwrap();
        assert_eq!(cred.access_token, "refreshed-rt-old");
        assert!(!cred.is_expired(Utc::now().timestamp()));
        // Refresh response had no refresh_token; the old one must survive.
        assert_eq!(cred.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn returned_credential_never_expired() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = store_with(auth.clone(), "noexpired");
        store.seed_credential(expired_credential("scope.a"));
        for _ in 0..3 {
            let cred = store.get_credential("scope.a").unwrap();
            assert!(!cred.is_expired(Utc::now().timestamp()));
        }
    }

    #[test]
    fn refresh_failure_demotes_and_issues_url() {
        let auth = Arc::new(StubAuthServer::new(true));
        let store = store_with(auth.clone(), "demote");
        store.seed_credential(expired_credential("scope.a"));

        match store.get_credential("scope.a") {
            Err(ToolError::AuthorizationRequired { .. }) => {}
            other => panic!("expected AuthorizationRequired, got {other:?}"),
        }
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        // Later calls reuse the pending URL without new refresh attempts.
        let first = store.get_credential("scope.a");
        let second = store.get_credential("scope.a");
        assert_eq!(first, second);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_unauthorized_callers_share_one_url() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = Arc::new(store_with(auth.clone(), "singleflight"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                match store.get_credential("scope.a") {
                    Err(ToolError::AuthorizationRequired { url }) => url,
                    other => panic!("expected AuthorizationRequired, got {other:?}"),
                }
            }));
        }
        let urls: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(urls.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(auth.url_issues.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn complete_authorization_is_idempotent_in_effect() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = store_with(auth.clone(), "idem");
        let _ = store.get_credential("scope.a scope.b");

        let first = store.complete_authorization("code-1").unwrap();
        assert_eq!(first.state, CredentialState::Active);
        let second = store.complete_authorization("code-2").unwrap();
        assert_eq!(second.access_token, "access-code-2");

        let active = store.active_credentials_for(DEFAULT_IDENTITY);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].access_token, "access-code-2");
    }

    #[test]
    fn authorization_completes_the_pending_turn() {
        let auth = Arc::new(StubAuthServer::new(false));
        let store = store_with(auth.clone(), "roundtrip");
        assert!(store.get_credential("scope.a scope.b").is_err());
        store.complete_authorization("code-9").unwrap();
        let cred = store.get_credential("scope.a scope.b").unwrap();
        assert_eq!(cred.access_token, "access-code-9");
    }

    #[test]
    fn persistence_survives_reopen_without_torn_state() {
        let auth = Arc::new(StubAuthServer::new(false));
        let ws = temp_workspace("persist");
        {
            let store =
                CredentialStore::open(&ws, auth.clone(), "scope.a scope.b".to_string());
            let _ = store.get_credential("scope.a scope.b");
            store.complete_authorization("code-7").unwrap();
        }
        assert!(!ws.join("credentials.json.tmp").exists());
        let reopened = CredentialStore::open(&ws, auth, "scope.a scope.b".to_string());
        let cred = reopened.get_credential("scope.a scope.b").unwrap();
        assert_eq!(cred.access_token, "access-code-7");
    }
}
