//! Record sections shown after login
//!
//! Each section owns its own collection, so a failed fetch in one never
//! touches the others. The vital-signs pager goes back to page 1 whenever a
//! new vital-signs collection replaces the old one.

use tracing::warn;

use crate::activity_log;
use crate::fhir::{ClinicalEntry, FetchErrorKind, FhirClient};
use crate::pagination::{Direction, Pager};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Medications,
    LabReports,
    VitalSigns,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Medications, Section::LabReports, Section::VitalSigns];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Medications => "medications",
            Section::LabReports => "lab_reports",
            Section::VitalSigns => "vital_signs",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::Medications => "Medications",
            Section::LabReports => "Lab Reports",
            Section::VitalSigns => "Vital Signs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SectionState {
    #[default]
    NotLoaded,
    Loading,
    Loaded(Vec<ClinicalEntry>),
    Failed(FetchErrorKind),
}

impl SectionState {
    /// Loaded entries; empty in every other state
    pub fn entries(&self) -> &[ClinicalEntry] {
        match self {
            SectionState::Loaded(entries) => entries,
            _ => &[],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SectionState::Loading)
    }
}

pub struct Dashboard {
    fhir: FhirClient,
    active: Option<Section>,
    medications: SectionState,
    lab_reports: SectionState,
    vital_signs: SectionState,
    vitals_pager: Pager,
}

impl Dashboard {
    pub fn new(fhir: FhirClient) -> Self {
        Self {
            fhir,
            active: None,
            medications: SectionState::NotLoaded,
            lab_reports: SectionState::NotLoaded,
            vital_signs: SectionState::NotLoaded,
            vitals_pager: Pager::default(),
        }
    }

    pub fn active_section(&self) -> Option<Section> {
        self.active
    }

    pub fn section(&self, section: Section) -> &SectionState {
        match section {
            Section::Medications => &self.medications,
            Section::LabReports => &self.lab_reports,
            Section::VitalSigns => &self.vital_signs,
        }
    }

    fn set(&mut self, section: Section, state: SectionState) {
        if section == Section::VitalSigns && matches!(state, SectionState::Loaded(_)) {
            self.vitals_pager.reset();
        }
        match section {
            Section::Medications => self.medications = state,
            Section::LabReports => self.lab_reports = state,
            Section::VitalSigns => self.vital_signs = state,
        }
    }

    /// Select a section. Selecting the active one collapses it; selecting
    /// another opens it and fetches a fresh collection.
    pub async fn toggle(&mut self, section: Section, session: &Session) -> Option<Section> {
        if self.active == Some(section) {
            self.active = None;
            activity_log::log_section(section.as_str(), "collapse");
            return None;
        }

        self.active = Some(section);
        activity_log::log_section(section.as_str(), "open");
        self.load(section, session).await;
        self.active
    }

    /// Fetch one section, replacing whatever it held
    pub async fn load(&mut self, section: Section, session: &Session) {
        self.set(section, SectionState::Loading);
        let state = fetch_section(&self.fhir, section, session).await;
        self.set(section, state);
    }

    /// Fetch every section concurrently
    pub async fn load_all(&mut self, session: &Session) {
        for section in Section::ALL {
            self.set(section, SectionState::Loading);
        }

        let fhir = &self.fhir;
        let (medications, lab_reports, vital_signs) = tokio::join!(
            fetch_section(fhir, Section::Medications, session),
            fetch_section(fhir, Section::LabReports, session),
            fetch_section(fhir, Section::VitalSigns, session),
        );

        self.set(Section::Medications, medications);
        self.set(Section::LabReports, lab_reports);
        self.set(Section::VitalSigns, vital_signs);
    }

    pub fn vitals_pager(&self) -> &Pager {
        &self.vitals_pager
    }

    /// The vital signs on the current page
    pub fn vital_signs_page(&self) -> &[ClinicalEntry] {
        self.vitals_pager.window(self.vital_signs.entries())
    }

    pub fn vital_signs_total_pages(&self) -> usize {
        self.vitals_pager.total_pages(self.vital_signs.entries().len())
    }

    /// Move the vital-signs page; returns whether it changed
    pub fn page(&mut self, direction: Direction) -> bool {
        let len = self.vital_signs.entries().len();
        self.vitals_pager.advance(direction, len)
    }

    pub fn go_to_page(&mut self, page: usize) {
        let len = self.vital_signs.entries().len();
        self.vitals_pager.go_to(page, len);
    }

    /// Forget every section, e.g. on logout
    pub fn clear(&mut self) {
        self.active = None;
        self.medications = SectionState::NotLoaded;
        self.lab_reports = SectionState::NotLoaded;
        self.vital_signs = SectionState::NotLoaded;
        self.vitals_pager.reset();
    }
}

async fn fetch_section(fhir: &FhirClient, section: Section, session: &Session) -> SectionState {
    // Without both a token and a patient id nothing patient-scoped is reachable
    let Some((token, patient_id)) = session.credentials() else {
        return SectionState::Failed(FetchErrorKind::Unauthorized);
    };

    let result = match section {
        Section::Medications => fhir.fetch_medications(token, patient_id).await,
        Section::LabReports => fhir.fetch_lab_reports(token, patient_id).await,
        Section::VitalSigns => fhir.fetch_vital_signs(token, patient_id).await,
    };

    match result {
        Ok(entries) => SectionState::Loaded(entries),
        Err(e) => {
            warn!(
                section = section.as_str(),
                error_kind = e.kind().as_str(),
                status = e.status(),
                "Section fetch failed"
            );
            SectionState::Failed(e.kind())
        }
    }
}
