//! FHIR R4 resources read by the portal (simplified)
//!
//! Only the fields the portal shows are modelled; everything else in the
//! provider's payload is ignored. Accessors fall back to the same
//! placeholder text the portal has always displayed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Shown when a patient has no matching secondary identifier
pub const IDENTIFIER_NOT_AVAILABLE: &str = "N/A";

/// A field that does not have the expected shape reads as its default, so
/// one odd field never hides the whole record.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Like [`lenient`], dropping only the unreadable elements of an array
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    pub system: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    pub text: Option<String>,
    #[serde(default)]
    pub coding: Vec<Coding>,
}

impl CodeableConcept {
    /// `text`, else the first coding display
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or_else(|| self.coding.iter().find_map(|c| c.display.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub reference: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: Option<f64>,
    pub unit: Option<String>,
}

impl Quantity {
    /// "{value} {unit}", or None without a value
    pub fn display(&self) -> Option<String> {
        let value = self.value?;
        Some(match self.unit.as_deref() {
            Some(unit) if !unit.is_empty() => format!("{} {}", value, unit),
            _ => value.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dosage {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    pub text: Option<String>,
    pub family: Option<String>,
    #[serde(default)]
    pub given: Vec<String>,
}

impl HumanName {
    /// Pre-composed `text`, else given names followed by the family name
    pub fn display(&self) -> Option<String> {
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(text.to_string());
        }
        let composed = format!(
            "{} {}",
            self.given.join(" "),
            self.family.as_deref().unwrap_or("")
        );
        let composed = composed.trim();
        (!composed.is_empty()).then(|| composed.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub system: Option<String>,
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<CodeableConcept>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub name: Vec<HumanName>,
    #[serde(default, deserialize_with = "lenient")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub birth_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub identifier: Vec<Identifier>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub medication_reference: Option<Reference>,
    #[serde(default, deserialize_with = "lenient")]
    pub medication_codeable_concept: Option<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub dosage_instruction: Vec<Dosage>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub reason_code: Vec<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient")]
    pub authored_on: Option<String>,
}

impl MedicationRequest {
    pub fn medication_display(&self) -> &str {
        self.medication_reference
            .as_ref()
            .and_then(|r| r.display.as_deref())
            .or_else(|| {
                self.medication_codeable_concept
                    .as_ref()
                    .and_then(CodeableConcept::label)
            })
            .unwrap_or("Unknown Medication")
    }

    pub fn dosage_text(&self) -> &str {
        self.dosage_instruction
            .first()
            .and_then(|d| d.text.as_deref())
            .unwrap_or("No Dosage Info")
    }

    pub fn reason_text(&self) -> &str {
        self.reason_code
            .first()
            .and_then(|r| r.text.as_deref())
            .unwrap_or("No Reason Provided")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient")]
    pub issued: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub effective_date_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub result: Vec<Reference>,
}

impl DiagnosticReport {
    pub fn test_name(&self) -> &str {
        self.code
            .as_ref()
            .and_then(|c| c.text.as_deref())
            .unwrap_or("Unknown Test")
    }

    pub fn status_text(&self) -> &str {
        self.status.as_deref().unwrap_or("Unknown Status")
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued.as_deref().and_then(parse_fhir_datetime)
    }

    pub fn result_summary(&self) -> String {
        let displays: Vec<&str> = self
            .result
            .iter()
            .filter_map(|r| r.display.as_deref())
            .collect();
        if displays.is_empty() {
            "No Results".to_string()
        } else {
            displays.join(", ")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationComponent {
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient")]
    pub value_quantity: Option<Quantity>,
}

impl ObservationComponent {
    pub fn label(&self) -> &str {
        self.code
            .as_ref()
            .and_then(|c| c.text.as_deref())
            .unwrap_or("Unknown Component")
    }

    pub fn value_text(&self) -> String {
        self.value_quantity
            .as_ref()
            .and_then(Quantity::display)
            .unwrap_or_else(|| "No Value".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient")]
    pub value_quantity: Option<Quantity>,
    #[serde(default, deserialize_with = "lenient")]
    pub effective_date_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub component: Vec<ObservationComponent>,
}

impl Observation {
    pub fn type_text(&self) -> &str {
        self.code
            .as_ref()
            .and_then(|c| c.text.as_deref())
            .unwrap_or("Unknown")
    }

    pub fn value_text(&self) -> String {
        self.value_quantity
            .as_ref()
            .and_then(Quantity::display)
            .unwrap_or_else(|| "No Value Recorded".to_string())
    }

    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.effective_date_time.as_deref().and_then(parse_fhir_datetime)
    }
}

/// Resource kinds the portal reads as collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    MedicationRequest,
    DiagnosticReport,
    Observation,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::MedicationRequest => "MedicationRequest",
            ResourceKind::DiagnosticReport => "DiagnosticReport",
            ResourceKind::Observation => "Observation",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource taken from a bundle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum ClinicalEntry {
    MedicationRequest(MedicationRequest),
    DiagnosticReport(DiagnosticReport),
    Observation(Observation),
    /// Any other resource type in the bundle (e.g. OperationOutcome)
    #[serde(other)]
    Other,
}

impl ClinicalEntry {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            ClinicalEntry::MedicationRequest(_) => Some(ResourceKind::MedicationRequest),
            ClinicalEntry::DiagnosticReport(_) => Some(ResourceKind::DiagnosticReport),
            ClinicalEntry::Observation(_) => Some(ResourceKind::Observation),
            ClinicalEntry::Other => None,
        }
    }

    /// Observation timestamp; other kinds have none
    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ClinicalEntry::Observation(obs) => obs.effective_at(),
            _ => None,
        }
    }

    /// Plain-text lines for a terminal listing
    pub fn display_lines(&self) -> Vec<String> {
        match self {
            ClinicalEntry::MedicationRequest(med) => vec![
                format!("Medication: {}", med.medication_display()),
                format!("Dosage: {}", med.dosage_text()),
                format!("Reason: {}", med.reason_text()),
            ],
            ClinicalEntry::DiagnosticReport(report) => vec![
                format!("Test: {}", report.test_name()),
                format!("Status: {}", report.status_text()),
                format!("Issued: {}", format_timestamp(report.issued_at())),
                format!("Result: {}", report.result_summary()),
            ],
            ClinicalEntry::Observation(obs) => {
                let mut lines = vec![
                    format!("Type: {}", obs.type_text()),
                    format!("Value: {}", obs.value_text()),
                    format!("Date: {}", format_timestamp(obs.effective_at())),
                ];
                lines.extend(
                    obs.component
                        .iter()
                        .map(|c| format!("  {}: {}", c.label(), c.value_text())),
                );
                lines
            }
            ClinicalEntry::Other => Vec::new(),
        }
    }
}

/// Flat patient demographics kept in the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(rename = "dob", default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    /// Secondary identifier value, or [`IDENTIFIER_NOT_AVAILABLE`]
    pub identifier: String,
}

/// Picks the secondary identifier by system, then by type label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSelector {
    pub system: Option<String>,
    pub type_text: Option<String>,
}

impl IdentifierSelector {
    pub fn select<'a>(&self, identifiers: &'a [Identifier]) -> Option<&'a str> {
        let with_value = || {
            identifiers
                .iter()
                .filter(|id| id.value.as_deref().is_some_and(|v| !v.is_empty()))
        };

        let by_system = self.system.as_deref().and_then(|system| {
            with_value().find(|id| id.system.as_deref() == Some(system))
        });

        let by_type = || {
            self.type_text.as_deref().and_then(|label| {
                with_value().find(|id| {
                    id.kind
                        .as_ref()
                        .and_then(|k| k.text.as_deref())
                        .is_some_and(|t| t.eq_ignore_ascii_case(label))
                })
            })
        };

        by_system.or_else(by_type).and_then(|id| id.value.as_deref())
    }
}

impl PatientSummary {
    pub fn from_patient(patient: &Patient, selector: &IdentifierSelector) -> Self {
        let name = patient
            .name
            .first()
            .and_then(HumanName::display)
            .unwrap_or_else(|| "Unknown Patient".to_string());

        Self {
            name,
            gender: patient.gender.clone(),
            birth_date: patient.birth_date.clone(),
            identifier: selector
                .select(&patient.identifier)
                .unwrap_or(IDENTIFIER_NOT_AVAILABLE)
                .to_string(),
        }
    }
}

/// Parse a FHIR dateTime: full RFC 3339, or a bare date / year-month / year
pub fn parse_fhir_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01-01", value), "%Y-%m-%d"))
        .ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// "dd Mon yyyy, hh:mm AM" in UTC, or "Unknown"
pub fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.format("%d %b %Y, %I:%M %p").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
