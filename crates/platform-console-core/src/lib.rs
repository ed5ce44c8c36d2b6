//! Core library for the large-model platform console client.
//!
//! The console talks to one REST backend. Everything that needs a logged-in
//! user goes through [`api::ApiClient`], which owns the session handling:
//! bearer credentials, path normalization, and transparent credential
//! refresh when the backend answers 401.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, Notifier, RefreshError, RegisterRequest, RequestDescriptor};
pub use auth::{SessionState, TokenPair};
pub use config::{Config, StorageBackend};
pub use reqwest::Method;
