//! Session state and its persistence
//!
//! The session is the single source of truth for authentication state. It is
//! persisted under fixed keys so a restart (or a browser reload) can pick up
//! where the previous run left off.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::fhir::PatientSummary;
use crate::storage::{KeyValueStore, StorageError};

pub const KEY_CODE_VERIFIER: &str = "pkce_code_verifier";
pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_PATIENT_ID: &str = "patient_id";
pub const KEY_PATIENT_DATA: &str = "patient_data";

/// Authentication state shared with the presentation layer
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub patient_id: Option<String>,
    pub patient_summary: Option<PatientSummary>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.patient_id.is_none() && self.patient_summary.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Token and patient id, when both are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_token, &self.patient_id) {
            (Some(token), Some(patient_id)) => Some((token.as_str(), patient_id.as_str())),
            _ => None,
        }
    }

    /// A summary is only meaningful alongside a token and a patient id
    pub fn is_consistent(&self) -> bool {
        self.patient_summary.is_none() || self.credentials().is_some()
    }
}

// Keeps the bearer token out of logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("patient_id", &self.patient_id.as_ref().map(|_| "<redacted>"))
            .field("has_patient_summary", &self.patient_summary.is_some())
            .finish()
    }
}

/// Reads and writes a [`Session`] through a key/value store
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist every session field; absent fields drop their key
    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let mut sets = Vec::new();
        let mut removes = Vec::new();

        match &session.access_token {
            Some(token) => sets.push((KEY_ACCESS_TOKEN, token.clone())),
            None => removes.push(KEY_ACCESS_TOKEN),
        }
        match &session.patient_id {
            Some(id) => sets.push((KEY_PATIENT_ID, id.clone())),
            None => removes.push(KEY_PATIENT_ID),
        }
        match &session.patient_summary {
            Some(summary) => sets.push((KEY_PATIENT_DATA, serde_json::to_string(summary)?)),
            None => removes.push(KEY_PATIENT_DATA),
        }

        self.store.apply(&sets, &removes)?;
        debug!(
            has_token = session.access_token.is_some(),
            has_patient = session.patient_id.is_some(),
            has_summary = session.patient_summary.is_some(),
            "Saved session"
        );
        Ok(())
    }

    /// Reconstruct the session, leaving missing fields empty
    pub fn load(&self) -> Result<Session, StorageError> {
        let access_token = self.store.get(KEY_ACCESS_TOKEN)?;
        let patient_id = self.store.get(KEY_PATIENT_ID)?;

        let patient_summary = match self.store.get(KEY_PATIENT_DATA)? {
            Some(json) => match serde_json::from_str::<PatientSummary>(&json) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(
                        line = e.line(),
                        column = e.column(),
                        "Ignoring unreadable stored patient summary"
                    );
                    None
                }
            },
            None => None,
        };

        let mut session = Session {
            access_token,
            patient_id,
            patient_summary,
        };

        if !session.is_consistent() {
            warn!("Dropping stored patient summary without token and patient id");
            session.patient_summary = None;
        }

        Ok(session)
    }

    /// Erase every persisted key, verifier included
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.clear()
    }

    pub fn save_verifier(&self, verifier: &str) -> Result<(), StorageError> {
        self.store.set(KEY_CODE_VERIFIER, verifier)
    }

    pub fn load_verifier(&self) -> Result<Option<String>, StorageError> {
        self.store.get(KEY_CODE_VERIFIER)
    }

    pub fn remove_verifier(&self) -> Result<(), StorageError> {
        self.store.remove(KEY_CODE_VERIFIER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()))
    }

    fn summary() -> PatientSummary {
        PatientSummary {
            name: "Jane Doe".to_string(),
            gender: Some("female".to_string()),
            birth_date: Some("1980-02-01".to_string()),
            identifier: "203713".to_string(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = store();
        let session = Session {
            access_token: Some("token-abc".to_string()),
            patient_id: Some("erXuFYUfucBZaryVksYEcMg3".to_string()),
            patient_summary: Some(summary()),
        };

        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), session);
    }

    #[test]
    fn test_clear_then_load_is_empty() {
        let store = store();
        store.save_verifier("verifier").unwrap();
        store
            .save(&Session {
                access_token: Some("t".to_string()),
                patient_id: Some("p".to_string()),
                patient_summary: Some(summary()),
            })
            .unwrap();

        store.clear().unwrap();

        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.load_verifier().unwrap(), None);
    }

    #[test]
    fn test_save_removes_absent_fields() {
        let store = store();
        store
            .save(&Session {
                access_token: Some("t".to_string()),
                patient_id: Some("p".to_string()),
                patient_summary: None,
            })
            .unwrap();
        store
            .save(&Session {
                access_token: Some("t2".to_string()),
                patient_id: None,
                patient_summary: None,
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("t2"));
        assert_eq!(loaded.patient_id, None);
    }

    #[test]
    fn test_save_keeps_verifier() {
        let store = store();
        store.save_verifier("v").unwrap();
        store.save(&Session::default()).unwrap();
        assert_eq!(store.load_verifier().unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_orphaned_summary_is_dropped() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(KEY_PATIENT_DATA, &serde_json::to_string(&summary()).unwrap())
            .unwrap();
        let store = SessionStore::new(kv);

        let session = store.load().unwrap();
        assert!(session.patient_summary.is_none());
        assert!(session.is_consistent());
    }

    #[test]
    fn test_corrupt_summary_is_ignored() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(KEY_ACCESS_TOKEN, "t").unwrap();
        kv.set(KEY_PATIENT_ID, "p").unwrap();
        kv.set(KEY_PATIENT_DATA, "{not json").unwrap();
        let store = SessionStore::new(kv);

        let session = store.load().unwrap();
        assert_eq!(session.access_token.as_deref(), Some("t"));
        assert!(session.patient_summary.is_none());
    }

    #[test]
    fn test_patient_data_uses_persisted_keys() {
        let kv = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone());
        store
            .save(&Session {
                access_token: Some("t".to_string()),
                patient_id: Some("p".to_string()),
                patient_summary: Some(summary()),
            })
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&kv.get(KEY_PATIENT_DATA).unwrap().unwrap()).unwrap();
        assert_eq!(raw["name"], "Jane Doe");
        assert_eq!(raw["dob"], "1980-02-01");
        assert_eq!(raw["identifier"], "203713");
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session {
            access_token: Some("super-secret".to_string()),
            patient_id: None,
            patient_summary: None,
        };
        assert!(!format!("{:?}", session).contains("super-secret"));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_credentials(
            token in proptest::option::of("[ -~]{1,64}"),
            patient in proptest::option::of("[A-Za-z0-9.-]{1,32}"),
        ) {
            let store = store();
            let session = Session { access_token: token, patient_id: patient, patient_summary: None };
            store.save(&session).unwrap();
            prop_assert_eq!(store.load().unwrap(), session);
        }
    }
}
