use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::dispatcher::{Dispatcher, RequestDescriptor};
use crate::api::RefreshError;

/// Refresh endpoint, relative to the API prefix
pub const REFRESH_PATH: &str = "/auth/refresh/";

/// Credentials issued by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RefreshRequest {
    pub refresh: String,
}

impl TokenPair {
    /// Read a token pair from an auth response body.
    ///
    /// The backend sometimes wraps the payload as `{"data": {...}}`; one
    /// level of that envelope is unwrapped. Returns `None` when no non-empty
    /// `access` field is found.
    pub fn from_response(body: &Value) -> Option<Self> {
        let payload = match body.get("data") {
            Some(inner) if inner.get("access").is_some() => inner,
            _ => body,
        };
        let access = payload.get("access")?.as_str()?.to_string();
        if access.is_empty() {
            return None;
        }
        let refresh = payload
            .get("refresh")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Some(Self { access, refresh })
    }
}

/// Exchanges a refresh credential for a new access credential.
#[derive(Clone)]
pub struct CredentialRefresher {
    dispatcher: Dispatcher,
}

impl CredentialRefresher {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// One refresh call. Never retried; any failure is a `RefreshError`.
    pub async fn refresh(&self, refresh_credential: &str) -> Result<TokenPair, RefreshError> {
        if refresh_credential.is_empty() {
            return Err(RefreshError::MissingCredential);
        }

        let body = json!(RefreshRequest {
            refresh: refresh_credential.to_string(),
        });
        let request = RequestDescriptor::new(Method::POST, REFRESH_PATH).with_body(body);

        debug!("Requesting new access credential");
        let response = self
            .dispatcher
            .dispatch(&request, None)
            .await
            .map_err(RefreshError::Request)?;

        TokenPair::from_response(&response).ok_or_else(|| {
            warn!("Refresh response did not contain an access credential");
            RefreshError::MissingAccess
        })
    }
}
