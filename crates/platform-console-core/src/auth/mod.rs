//! Authentication module for managing the login session.
//!
//! This module provides:
//! - `SessionState`: access/refresh credentials and user profile
//! - `DurableStorage`: where the session is persisted (file or OS keychain)
//! - `CredentialRefresher`: exchanges a refresh credential for a new access credential

pub mod refresh;
pub mod session;
pub mod storage;

pub use refresh::{CredentialRefresher, RefreshRequest, TokenPair};
pub use session::{SessionData, SessionState};
pub use storage::{DurableStorage, FileStorage, KeyringStorage};
