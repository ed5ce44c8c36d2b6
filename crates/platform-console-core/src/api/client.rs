//! API client for the large-model platform backend.
//!
//! `ApiClient::send` is the single entry point used by every resource
//! client. It attaches the session's access credential, and hands 401
//! responses to the refresh gate so callers only ever see the retried
//! result or a terminal failure.

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::dispatcher::{Dispatcher, RequestDescriptor};
use super::gate::RefreshGate;
use super::notify::{Notifier, TracingNotifier};
use super::{ApiError, RefreshError};
use crate::auth::{CredentialRefresher, SessionState, TokenPair};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login/";
const REGISTER_PATH: &str = "/auth/register/";
const LOGOUT_PATH: &str = "/auth/logout/";
const PROFILE_PATH: &str = "/auth/profile/";

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Password confirmation, checked by the server
    pub password2: String,
}

/// Authenticated client for the platform API.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Dispatcher,
    session: Arc<SessionState>,
    gate: Arc<RefreshGate>,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    /// Create a client that reports failures through `tracing`
    pub fn new(config: &Config, session: Arc<SessionState>) -> Result<Self, ApiError> {
        Self::with_notifier(config, session, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        config: &Config,
        session: Arc<SessionState>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let dispatcher = Dispatcher::new(config)?;
        let refresher = CredentialRefresher::new(dispatcher.clone());
        let gate = Arc::new(RefreshGate::new(
            dispatcher.clone(),
            refresher,
            Arc::clone(&session),
            Arc::clone(&notifier),
        ));

        Ok(Self {
            dispatcher,
            session,
            gate,
            notifier,
        })
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// True while a credential refresh cycle is running
    pub fn is_refreshing(&self) -> bool {
        self.gate.is_refreshing()
    }

    // ===== Request Pipeline =====

    /// Send one call through the authenticated pipeline
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let mut request = RequestDescriptor::new(method, path);
        request.body = body;
        self.execute(request).await
    }

    /// Send a prepared descriptor through the authenticated pipeline
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Value, ApiError> {
        let result = self.run(request).await;
        self.settle(result)
    }

    /// Dispatch with 401 recovery, without notifying
    async fn run(&self, request: RequestDescriptor) -> Result<Value, ApiError> {
        let access = self.session.access();
        let first = self.dispatcher.dispatch(&request, access.as_deref()).await;
        match first {
            Err(e) if e.is_unauthenticated() => self.gate.recover(request, access).await,
            other => other,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let request = query
            .iter()
            .fold(RequestDescriptor::new(Method::GET, path), |req, (k, v)| {
                req.with_query(*k, *v)
            });
        self.execute(request).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::DELETE, path, None).await
    }

    /// GET and deserialize the body into `T`
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.get(path).await?;
        Self::decode(path, value)
    }

    /// POST a serializable body and deserialize the response into `T`
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        let value = self.post(path, body).await?;
        Self::decode(path, value)
    }

    fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
        serde_json::from_value(value).map_err(|e| {
            ApiError::MalformedResponse(format!("Failed to parse response from {}: {}", path, e))
        })
    }

    /// Every terminal failure is reported exactly once
    fn settle<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(ref e) = result {
            self.notifier.error(e);
        }
        result
    }

    // ===== Authentication =====

    /// Log in and persist the issued credentials and user profile
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = json!(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let pair = self
            .authenticate(LOGIN_PATH, body, "invalid username or password")
            .await?;
        info!(username, has_refresh = pair.refresh.is_some(), "Logged in");
        Ok(pair)
    }

    /// Create an account; the server logs the new user in directly
    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenPair, ApiError> {
        let body = json!(request);
        let pair = self
            .authenticate(REGISTER_PATH, body, "registration was rejected")
            .await?;
        info!(username = %request.username, "Registered");
        Ok(pair)
    }

    /// Shared by login and register: exchange the body for a token pair,
    /// replace the session, then load the profile.
    async fn authenticate(
        &self,
        path: &str,
        body: Value,
        rejected: &str,
    ) -> Result<TokenPair, ApiError> {
        let request = RequestDescriptor::new(Method::POST, path).with_body(body);

        // A 401 here means bad credentials, not an expired session
        let response = match self.dispatcher.dispatch(&request, None).await {
            Err(ApiError::Unauthenticated(detail)) if detail.trim().is_empty() => {
                Err(ApiError::BadRequest(rejected.to_string()))
            }
            Err(ApiError::Unauthenticated(detail)) => Err(ApiError::BadRequest(detail)),
            other => other,
        };
        let response = self.settle(response)?;

        let pair = self.settle(TokenPair::from_response(&response).ok_or_else(|| {
            ApiError::MalformedResponse(format!(
                "{} response did not contain an access credential",
                path
            ))
        }))?;

        self.settle(
            self.session
                .clear()
                .and_then(|_| self.session.set_credentials(&pair.access, pair.refresh.as_deref()))
                .map_err(ApiError::storage),
        )?;

        if let Err(e) = self.load_profile().await {
            warn!(error = %e, "Failed to fetch user profile after login");
        }

        Ok(pair)
    }

    /// Fetch the current user's profile and store it in the session
    pub async fn fetch_profile(&self) -> Result<Map<String, Value>, ApiError> {
        let result = self.load_profile().await;
        self.settle(result)
    }

    /// Update the current user's profile and store what the server returns
    pub async fn update_profile(&self, changes: Value) -> Result<Map<String, Value>, ApiError> {
        let request = RequestDescriptor::new(Method::PUT, PROFILE_PATH).with_body(changes);
        let result = async {
            let value = self.run(request).await?;
            self.store_profile(value)
        }
        .await;
        self.settle(result)
    }

    async fn load_profile(&self) -> Result<Map<String, Value>, ApiError> {
        let value = self.run(RequestDescriptor::new(Method::GET, PROFILE_PATH)).await?;
        self.store_profile(value)
    }

    fn store_profile(&self, value: Value) -> Result<Map<String, Value>, ApiError> {
        let profile = match value {
            Value::Object(map) => map,
            other => {
                return Err(ApiError::MalformedResponse(format!(
                    "profile response is not an object: {}",
                    other
                )))
            }
        };
        self.session
            .set_user_profile(profile.clone())
            .map_err(ApiError::storage)?;
        Ok(profile)
    }

    /// Log out on the server and clear the local session.
    ///
    /// The local session is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let access = self.session.access();
        let request = RequestDescriptor::new(Method::POST, LOGOUT_PATH);
        if let Err(e) = self.dispatcher.dispatch(&request, access.as_deref()).await {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }
        self.settle(self.session.clear().map_err(ApiError::storage))?;
        info!("Logged out");
        Ok(())
    }

    /// Refresh the access credential now, outside of a 401.
    ///
    /// Shares the gate's single-cycle guarantee: fails with
    /// `RefreshError::InProgress` if a cycle is already running.
    pub async fn force_refresh(&self) -> Result<TokenPair, RefreshError> {
        self.gate.refresh_now().await
    }
}
