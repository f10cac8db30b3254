//! Authenticated reads against the provider's FHIR R4 API

use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::resources::{ClinicalEntry, IdentifierSelector, Patient, PatientSummary, ResourceKind};
use crate::activity_log;

/// Fetch errors, one per failure class the portal distinguishes
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Unauthorized: token may be expired or missing scope")]
    Unauthorized,

    #[error("Request failed with status {status}: {detail}")]
    RequestFailed { status: u16, detail: String },

    #[error("Network error: {0}")]
    NetworkError(reqwest::Error),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    UrlError(String),
}

/// Copyable classification of a [`FetchError`], kept in view state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Unauthorized,
    RequestFailed,
    NetworkError,
    InvalidResponse,
}

// The request URL carries the patient id, so it never travels with the error
impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::NetworkError(e.without_url())
    }
}

impl FetchError {
    /// HTTP status of a failed request, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Unauthorized => Some(401),
            FetchError::RequestFailed { status, .. } => Some(*status),
            FetchError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            FetchError::InvalidResponse(_) | FetchError::UrlError(_) => None,
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Unauthorized => FetchErrorKind::Unauthorized,
            FetchError::RequestFailed { .. } => FetchErrorKind::RequestFailed,
            FetchError::NetworkError(_) => FetchErrorKind::NetworkError,
            FetchError::InvalidResponse(_) | FetchError::UrlError(_) => {
                FetchErrorKind::InvalidResponse
            }
        }
    }
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Unauthorized => "unauthorized",
            FetchErrorKind::RequestFailed => "request_failed",
            FetchErrorKind::NetworkError => "network_error",
            FetchErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

/// FHIR API client. Holds no session state: every call takes the token and
/// patient id, so calls are independent and may run concurrently.
#[derive(Debug, Clone)]
pub struct FhirClient {
    http_client: reqwest::Client,
    base_url: String,
    identifier_selector: IdentifierSelector,
}

impl FhirClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        identifier_selector: IdentifierSelector,
    ) -> Result<Self, FetchError> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = url::Url::parse(cleaned_url)
            .map_err(|e| FetchError::UrlError(format!("Invalid URL '{}': {}", cleaned_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UrlError(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        info!("Creating FhirClient with base_url: {}", cleaned_url);

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
            identifier_selector,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Read the patient resource and flatten it into a summary
    pub async fn fetch_patient_summary(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<PatientSummary, FetchError> {
        let result = self.read_patient(token, patient_id).await;
        match &result {
            Ok(_) => activity_log::log_fetch("Patient", true, Some(1), None),
            Err(e) => activity_log::log_fetch("Patient", false, None, Some(e.kind().as_str())),
        }
        result
    }

    async fn read_patient(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<PatientSummary, FetchError> {
        let url = format!(
            "{}/Patient/{}",
            self.base_url,
            urlencoding::encode(patient_id)
        );
        let body = self.get_json(token, &url, &[]).await?;
        let patient: Patient = serde_json::from_value(body).map_err(|_| {
            FetchError::InvalidResponse("Patient resource is not an object".to_string())
        })?;
        Ok(PatientSummary::from_patient(&patient, &self.identifier_selector))
    }

    pub async fn fetch_medications(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<Vec<ClinicalEntry>, FetchError> {
        self.fetch_collection(token, ResourceKind::MedicationRequest, &[("patient", patient_id)])
            .await
    }

    pub async fn fetch_lab_reports(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<Vec<ClinicalEntry>, FetchError> {
        self.fetch_collection(token, ResourceKind::DiagnosticReport, &[("patient", patient_id)])
            .await
    }

    /// Vital-sign observations, most recent first
    pub async fn fetch_vital_signs(
        &self,
        token: &str,
        patient_id: &str,
    ) -> Result<Vec<ClinicalEntry>, FetchError> {
        let mut entries = self
            .fetch_collection(
                token,
                ResourceKind::Observation,
                &[("patient", patient_id), ("category", "vital-signs")],
            )
            .await?;
        sort_most_recent_first(&mut entries);
        Ok(entries)
    }

    async fn fetch_collection(
        &self,
        token: &str,
        kind: ResourceKind,
        query: &[(&str, &str)],
    ) -> Result<Vec<ClinicalEntry>, FetchError> {
        let url = format!("{}/{}", self.base_url, kind.as_str());

        match self.get_json(token, &url, query).await {
            Ok(bundle) => {
                let entries = extract_entries(&bundle, kind);
                activity_log::log_fetch(kind.as_str(), true, Some(entries.len()), None);
                Ok(entries)
            }
            Err(e) => {
                activity_log::log_fetch(kind.as_str(), false, None, Some(e.kind().as_str()));
                Err(e)
            }
        }
    }

    async fn get_json(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, FetchError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Convert an HTTP response into parsed JSON or the matching error
    async fn handle_response(&self, response: reqwest::Response) -> Result<Value, FetchError> {
        match response.status() {
            status if status.is_success() => response.json::<Value>().await.map_err(|e| {
                if e.is_decode() {
                    FetchError::InvalidResponse("body is not JSON".to_string())
                } else {
                    e.into()
                }
            }),
            reqwest::StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
            // Error bodies may echo patient data; only the status is kept
            status => Err(FetchError::RequestFailed {
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("Unknown status").to_string(),
            }),
        }
    }
}

/// Resources of `kind` from a bundle's `entry[].resource`.
/// A bundle without entries yields an empty collection.
pub fn extract_entries(bundle: &Value, kind: ResourceKind) -> Vec<ClinicalEntry> {
    let Some(entries) = bundle.get("entry").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .filter_map(|resource| match serde_json::from_value::<ClinicalEntry>(resource.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(resource_type = %kind, "Skipping unreadable bundle entry");
                None
            }
        })
        .filter(|parsed| parsed.kind() == Some(kind))
        .collect()
}

/// Sort by effective timestamp, newest first. Entries without a timestamp
/// count as the oldest; ties keep provider order.
pub fn sort_most_recent_first(entries: &mut [ClinicalEntry]) {
    entries.sort_by(|a, b| b.effective_at().cmp(&a.effective_at()));
}
