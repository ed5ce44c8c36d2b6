use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::storage::DurableStorage;

/// Storage key for the access credential
pub const ACCESS_KEY: &str = "token";

/// Storage key for the refresh credential
pub const REFRESH_KEY: &str = "refreshToken";

/// Storage key for the serialized user profile
pub const PROFILE_KEY: &str = "userInfo";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user_profile: Map<String, Value>,
}

/// The client's login session.
///
/// Owns the credentials and the durable storage behind them. Other
/// components read through the accessors and write only through
/// `set_credentials`, `set_user_profile` and `clear`; each of those
/// persists before returning.
pub struct SessionState {
    storage: Box<dyn DurableStorage>,
    data: RwLock<SessionData>,
}

impl SessionState {
    /// Load the session from durable storage
    pub fn load(storage: impl DurableStorage + 'static) -> Result<Arc<Self>> {
        let access = non_empty(storage.get(ACCESS_KEY)?);
        let refresh = non_empty(storage.get(REFRESH_KEY)?);
        let user_profile = match non_empty(storage.get(PROFILE_KEY)?) {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("Stored user profile is not a JSON object, ignoring it");
                    Map::new()
                }
            },
            None => Map::new(),
        };

        debug!(
            has_access = access.is_some(),
            has_refresh = refresh.is_some(),
            "Session loaded"
        );

        Ok(Arc::new(Self {
            storage: Box::new(storage),
            data: RwLock::new(SessionData {
                access,
                refresh,
                user_profile,
            }),
        }))
    }

    pub fn access(&self) -> Option<String> {
        self.read().access.clone()
    }

    pub fn refresh(&self) -> Option<String> {
        self.read().refresh.clone()
    }

    pub fn user_profile(&self) -> Map<String, Value> {
        self.read().user_profile.clone()
    }

    /// Snapshot of the whole session
    pub fn snapshot(&self) -> SessionData {
        self.read().clone()
    }

    /// True iff an access credential is present
    pub fn is_authenticated(&self) -> bool {
        self.read().access.is_some()
    }

    /// Replace the access credential, and the refresh credential if one is
    /// supplied. A `None` refresh keeps the existing one.
    pub fn set_credentials(&self, access: &str, refresh: Option<&str>) -> Result<()> {
        // Held until persisted so concurrent mutations reach storage in order
        let mut data = self.write();

        self.storage
            .set(ACCESS_KEY, access)
            .context("Failed to persist access credential")?;
        data.access = Some(access.to_string());
        if let Some(refresh) = refresh {
            self.storage
                .set(REFRESH_KEY, refresh)
                .context("Failed to persist refresh credential")?;
            data.refresh = Some(refresh.to_string());
        }
        Ok(())
    }

    pub fn set_user_profile(&self, profile: Map<String, Value>) -> Result<()> {
        let serialized = serde_json::to_string(&profile)?;
        let mut data = self.write();
        self.storage
            .set(PROFILE_KEY, &serialized)
            .context("Failed to persist user profile")?;
        data.user_profile = profile;
        Ok(())
    }

    /// Remove all session entries from memory and storage
    pub fn clear(&self) -> Result<()> {
        let mut data = self.write();
        *data = SessionData::default();
        for key in [ACCESS_KEY, REFRESH_KEY, PROFILE_KEY] {
            self.storage
                .remove(key)
                .with_context(|| format!("Failed to remove session entry {}", key))?;
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::FileStorage;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// In-memory storage whose first `set` of the access key blocks until released
    #[derive(Clone, Default)]
    struct GatedStorage {
        entries: Arc<Mutex<BTreeMap<String, String>>>,
        gate: Arc<Mutex<Option<(Sender<()>, Receiver<()>)>>>,
    }

    impl DurableStorage for GatedStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == ACCESS_KEY {
                if let Some((entered, release)) = self.gate.lock().unwrap().take() {
                    entered.send(()).unwrap();
                    release.recv().unwrap();
                }
            }
            self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[test]
    fn test_set_credentials_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let session = SessionState::load(FileStorage::new(dir.path())).unwrap();
        assert!(!session.is_authenticated());
        session.set_credentials("a", Some("r")).unwrap();
        drop(session);

        let restarted = SessionState::load(FileStorage::new(dir.path())).unwrap();
        assert_eq!(restarted.access().as_deref(), Some("a"));
        assert_eq!(restarted.refresh().as_deref(), Some("r"));
        assert!(restarted.is_authenticated());
    }

    #[test]
    fn test_set_credentials_keeps_refresh_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::load(FileStorage::new(dir.path())).unwrap();

        session.set_credentials("a1", Some("r1")).unwrap();
        session.set_credentials("a2", None).unwrap();

        assert_eq!(session.access().as_deref(), Some("a2"));
        assert_eq!(session.refresh().as_deref(), Some("r1"));
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::load(FileStorage::new(dir.path())).unwrap();
        session.set_credentials("a", Some("r")).unwrap();
        let profile = json!({"username": "admin"}).as_object().cloned().unwrap();
        session.set_user_profile(profile).unwrap();

        session.clear().unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.snapshot(), SessionData::default());

        let restarted = SessionState::load(FileStorage::new(dir.path())).unwrap();
        assert_eq!(restarted.snapshot(), SessionData::default());
    }

    #[test]
    fn test_user_profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionState::load(FileStorage::new(dir.path())).unwrap();
        let profile = json!({"id": 7, "username": "admin", "is_staff": true})
            .as_object()
            .cloned()
            .unwrap();
        session.set_user_profile(profile.clone()).unwrap();

        let restarted = SessionState::load(FileStorage::new(dir.path())).unwrap();
        assert_eq!(restarted.user_profile(), profile);
    }

    #[test]
    fn test_empty_and_garbled_entries_load_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set(ACCESS_KEY, "").unwrap();
        storage.set(REFRESH_KEY, "r").unwrap();
        storage.set(PROFILE_KEY, "[1, 2]").unwrap();

        let session = SessionState::load(storage).unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.refresh().as_deref(), Some("r"));
        assert!(session.user_profile().is_empty());
    }

    #[test]
    fn test_clear_during_set_credentials_stays_consistent_with_storage() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let storage = GatedStorage::default();
        storage.entries.lock().unwrap().insert(ACCESS_KEY.to_string(), "A1".to_string());
        *storage.gate.lock().unwrap() = Some((entered_tx, release_rx));

        let session = SessionState::load(storage.clone()).unwrap();

        let writer = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.set_credentials("A2", None).unwrap())
        };
        entered_rx.recv().unwrap();

        let clearer = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.clear().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        writer.join().unwrap();
        clearer.join().unwrap();

        let restarted = SessionState::load(storage).unwrap();
        assert_eq!(session.is_authenticated(), restarted.is_authenticated());
        assert_eq!(session.snapshot(), restarted.snapshot());
        assert!(!restarted.is_authenticated(), "clear ran last");
    }
}
