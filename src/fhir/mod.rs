//! FHIR resource retrieval
//!
//! `client` performs the authenticated reads; `resources` holds the
//! simplified resource types and their display fallbacks.

pub mod client;
pub mod resources;

pub use client::{FetchError, FetchErrorKind, FhirClient};
pub use resources::{
    format_timestamp, ClinicalEntry, DiagnosticReport, IdentifierSelector, MedicationRequest,
    Observation, Patient, PatientSummary, ResourceKind, IDENTIFIER_NOT_AVAILABLE,
};
