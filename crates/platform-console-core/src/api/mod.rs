//! Authenticated request pipeline for the platform REST API.
//!
//! This module provides the `ApiClient` through which every resource call
//! is sent. Requests carry the session's bearer credential; a 401 hands the
//! call to the `RefreshGate`, which runs at most one credential refresh at a
//! time and replays the calls that were waiting on it.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod notify;
pub mod path;

pub use client::{ApiClient, LoginRequest, RegisterRequest};
pub use dispatcher::{Dispatcher, RequestDescriptor};
pub use error::{ApiError, RefreshError};
pub use gate::{PendingRequest, RefreshGate};
pub use notify::{Notifier, TracingNotifier};
pub use path::normalize_path;
