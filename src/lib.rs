//! Patient portal client for Epic's FHIR R4 sandbox
//!
//! Logs a patient in with OAuth 2.0 Authorization Code + PKCE, keeps the
//! session in a local store, and reads demographics, medications, lab
//! reports and vital signs.

pub mod activity_log;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod fhir;
pub mod navigator;
pub mod pagination;
pub mod pkce;
pub mod session;
pub mod storage;


pub use auth::{AuthController, AuthError, AuthState, OAuthSettings, RestoreOutcome};
pub use config::Config;
pub use dashboard::{Dashboard, Section, SectionState};
pub use fhir::{ClinicalEntry, FetchError, FetchErrorKind, FhirClient, PatientSummary};
pub use navigator::{HeadlessNavigator, Navigator};
pub use session::{Session, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
