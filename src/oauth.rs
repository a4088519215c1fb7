use std::time::Duration;

use url::form_urlencoded;

use crate::env_required;

const TOKEN_TIMEOUT_SECS: u64 = 30;
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens returned by the authorization server for a code exchange or a
/// refresh exchange.
#[derive(Debug, Clone)]
pub(crate) struct TokenGrant {
    pub(crate) access_token: String,
    pub(crate) refresh_token: Option<String>,
    pub(crate) expires_in_secs: i64,
}

/// The external authorization server. A trait seam so the credential store
/// can be tested without Google.
pub(crate) trait AuthServer: Send + Sync {
    fn authorization_url(&self, scopes: &str) -> String;
    fn exchange_code(&self, code: &str) -> Result<TokenGrant, String>;
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, String>;
}

pub(crate) fn build_oauth_redirect(base: &str) -> String {
    format!("{}/oauth/google/callback", base.trim_end_matches('/'))
}

pub(crate) fn build_google_auth_url(client_id: &str, redirect_uri: &str, scope: &str) -> String {
    format!(
        "{GOOGLE_AUTH_URL}?response_type=code&client_id={}&redirect_uri={}&scope={}&access_type=offline&prompt=consent",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope)
    )
}

pub(crate) struct GoogleAuthServer {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleAuthServer {
    pub(crate) fn from_env(redirect_base: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(GoogleAuthServer {
            client_id: env_required("GOOGLE_CLIENT_ID")?,
            client_secret: env_required("GOOGLE_CLIENT_SECRET")?,
            redirect_uri: build_oauth_redirect(redirect_base),
        })
    }

    fn token_request(&self, payload: &str) -> Result<TokenGrant, String> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .timeout_read(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .timeout_write(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .build();
        let response = agent
            .post(GOOGLE_TOKEN_URL)
            .set("content-type", "application/x-www-form-urlencoded")
            .send_string(payload);
        let token: serde_json::Value = match response {
            Ok(resp) => resp.into_json().map_err(|e| format!("token decode: {e}"))?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(format!("token error {code}: {text}"));
            }
            Err(err) => return Err(format!("token request failed: {err}")),
        };
        parse_token_grant(&token)
    }
}

pub(crate) fn parse_token_grant(token: &serde_json::Value) -> Result<TokenGrant, String> {
    let access_token = token
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or("token response missing access_token")?
        .to_string();
    let refresh_token = token
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let expires_in_secs = token
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .unwrap_or(3600);
    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_in_secs,
    })
}

impl AuthServer for GoogleAuthServer {
    fn authorization_url(&self, scopes: &str) -> String {
        build_google_auth_url(&self.client_id, &self.redirect_uri, scopes)
    }

    fn exchange_code(&self, code: &str) -> Result<TokenGrant, String> {
        let payload = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", &self.redirect_uri)
            .finish();
        self.token_request(&payload)
    }

    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, String> {
        let payload = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", refresh_token)
            .finish();
        self.token_request(&payload)
    }
}
