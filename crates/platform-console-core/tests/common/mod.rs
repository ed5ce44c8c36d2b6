//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mockito::ServerGuard;
use platform_console_core::api::{ApiClient, ApiError, Notifier};
use platform_console_core::auth::{FileStorage, SessionState};
use platform_console_core::Config;
use tempfile::TempDir;

/// Records every notification the client emits.
#[derive(Default)]
pub struct RecordingNotifier {
    errors: Mutex<Vec<String>>,
    expired: AtomicUsize,
}

impl RecordingNotifier {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn expired_count(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn error(&self, error: &ApiError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn session_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Fixture {
    pub client: ApiClient,
    pub session: Arc<SessionState>,
    pub notifier: Arc<RecordingNotifier>,
    pub dir: TempDir,
}

impl Fixture {
    /// Re-read the session from disk, as a restarted process would
    pub fn reload_session(&self) -> Arc<SessionState> {
        SessionState::load(FileStorage::new(self.dir.path())).expect("Failed to reload session")
    }
}

pub fn config_for(server: &ServerGuard) -> Config {
    Config {
        server_url: server.url(),
        ..Config::default()
    }
}

/// Client against `server` with the given credentials already stored
pub fn fixture(server: &ServerGuard, access: Option<&str>, refresh: Option<&str>) -> Fixture {
    fixture_with_config(config_for(server), access, refresh)
}

pub fn fixture_with_config(config: Config, access: Option<&str>, refresh: Option<&str>) -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = FileStorage::new(dir.path());
    if let Some(access) = access {
        storage_set(&storage, "token", access);
    }
    if let Some(refresh) = refresh {
        storage_set(&storage, "refreshToken", refresh);
    }

    let session = SessionState::load(storage).expect("Failed to load session");
    let notifier = Arc::new(RecordingNotifier::default());
    let client = ApiClient::with_notifier(&config, Arc::clone(&session), notifier.clone())
        .expect("Failed to build client");

    Fixture {
        client,
        session,
        notifier,
        dir,
    }
}

fn storage_set(storage: &FileStorage, key: &str, value: &str) {
    use platform_console_core::auth::DurableStorage;
    storage.set(key, value).expect("Failed to seed storage");
}
