use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use patient_portal_lib::activity_log;
use patient_portal_lib::auth::{AuthController, AuthError, OAuthSettings, RestoreOutcome};
use patient_portal_lib::config::Config;
use patient_portal_lib::dashboard::{Dashboard, Section, SectionState};
use patient_portal_lib::fhir::{FhirClient, PatientSummary};
use patient_portal_lib::navigator::{authorization_code, HeadlessNavigator};
use patient_portal_lib::session::{Session, SessionStore};
use patient_portal_lib::storage::FileStore;

/// Patient portal client for Epic's FHIR sandbox
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (default: ~/.patientportal/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the session file (default: ~/.patientportal/session.json)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a login and print the provider URL to open
    Login,
    /// Finish a login with the address the provider redirected to
    Callback {
        /// Full redirect address, including `?code=...`
        url: String,
    },
    /// Show the login state and patient summary
    Status,
    /// List medications
    Medications,
    /// List lab reports
    Labs,
    /// List vital signs, five per page, newest first
    Vitals {
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// Forget the stored session
    Logout,
}

impl Command {
    /// Subcommand name; arguments stay out of the log since a callback
    /// address carries the authorization code
    fn name(&self) -> &'static str {
        match self {
            Command::Login => "login",
            Command::Callback { .. } => "callback",
            Command::Status => "status",
            Command::Medications => "medications",
            Command::Labs => "labs",
            Command::Vitals { .. } => "vitals",
            Command::Logout => "logout",
        }
    }
}

struct Portal {
    auth: AuthController,
    fhir: FhirClient,
}

impl Portal {
    fn open(config: &Config, store_path: PathBuf, current_url: Url) -> Result<Self> {
        let store = SessionStore::new(Arc::new(FileStore::new(store_path)));
        let navigator = Arc::new(HeadlessNavigator::new(current_url));
        let auth = AuthController::new(
            OAuthSettings::from_config(config)?,
            store,
            navigator,
            config.request_timeout(),
        )?;
        let fhir = FhirClient::new(
            &config.fhir_base_url,
            config.request_timeout(),
            config.identifier_selector(),
        )?;
        Ok(Self { auth, fhir })
    }

    /// Restore the stored session; fails when nobody is logged in
    async fn require_session(&mut self) -> Result<Session> {
        match self.auth.restore_session(&self.fhir).await? {
            RestoreOutcome::NoSession => bail!("Not logged in. Run `patient-portal login` first."),
            RestoreOutcome::SummaryUnavailable(kind) => {
                warn!("Patient summary unavailable: {}", kind.as_str());
            }
            _ => {}
        }
        Ok(self.auth.session())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "warn" };
    if let Err(e) = activity_log::get_log_directory()
        .and_then(|dir| activity_log::init_logging(&dir, log_level))
    {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .init();
        warn!("File logging unavailable: {}", e);
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    config.validate().context("Invalid configuration")?;

    let store_path = match args.store {
        Some(path) => path,
        None => Config::session_path()?,
    };
    let home = Url::parse(&config.redirect_uri)?;

    info!(command = args.command.name(), "Patient portal starting");

    match args.command {
        Command::Login => {
            let mut portal = Portal::open(&config, store_path, home)?;
            let url = portal.auth.start_login()?;
            println!("Open this address in a browser and sign in:\n\n  {}\n", url);
            println!("Then run: patient-portal callback '<redirected address>'");
        }
        Command::Callback { url } => {
            let callback = Url::parse(&url).context("Callback is not a valid URL")?;
            let Some(code) = authorization_code(&callback) else {
                bail!("No authorization code in {}", callback);
            };
            let mut portal = Portal::open(&config, store_path, callback)?;
            match portal.auth.complete_login(&code).await {
                Ok(_) => {}
                Err(AuthError::PatientIdMissing) => {
                    println!("Logged in, but the provider returned no patient context.");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
            println!("Logged in.");
            match portal.auth.load_patient_summary(&portal.fhir).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => println!("Patient details unavailable: {}", e),
            }
        }
        Command::Status => {
            let mut portal = Portal::open(&config, store_path, home)?;
            portal.auth.restore_session(&portal.fhir).await?;
            let session = portal.auth.session();
            println!("State: {}", portal.auth.state());
            match &session.patient_summary {
                Some(summary) => print_summary(summary),
                None if session.is_authenticated() => println!("Patient details unavailable."),
                None => {}
            }
        }
        Command::Medications => {
            let portal = Portal::open(&config, store_path, home)?;
            show_section(portal, Section::Medications).await?;
        }
        Command::Labs => {
            let portal = Portal::open(&config, store_path, home)?;
            show_section(portal, Section::LabReports).await?;
        }
        Command::Vitals { page } => {
            let mut portal = Portal::open(&config, store_path, home)?;
            let session = portal.require_session().await?;
            let mut dashboard = Dashboard::new(portal.fhir.clone());
            dashboard.toggle(Section::VitalSigns, &session).await;
            if let SectionState::Failed(kind) = dashboard.section(Section::VitalSigns) {
                bail!("Could not load vital signs: {}", kind.as_str());
            }
            dashboard.go_to_page(page);

            println!("{}", Section::VitalSigns.title());
            print_entries(dashboard.vital_signs_page());
            println!(
                "Page {} of {}",
                dashboard.vitals_pager().current_page(),
                dashboard.vital_signs_total_pages()
            );
        }
        Command::Logout => {
            let mut portal = Portal::open(&config, store_path, home)?;
            portal.auth.logout()?;
            println!("Logged out.");
        }
    }

    Ok(())
}

async fn show_section(mut portal: Portal, section: Section) -> Result<()> {
    let session = portal.require_session().await?;
    let mut dashboard = Dashboard::new(portal.fhir.clone());
    dashboard.toggle(section, &session).await;
    print_section(section, dashboard.section(section))
}

fn print_summary(summary: &PatientSummary) {
    println!("Name:       {}", summary.name);
    println!("Gender:     {}", summary.gender.as_deref().unwrap_or("Unknown"));
    println!("Birth date: {}", summary.birth_date.as_deref().unwrap_or("Unknown"));
    println!("Identifier: {}", summary.identifier);
}

fn print_section(section: Section, state: &SectionState) -> Result<()> {
    println!("{}", section.title());
    match state {
        SectionState::Loaded(entries) => print_entries(entries),
        SectionState::Failed(kind) => bail!("Could not load {}: {}", section.as_str(), kind.as_str()),
        SectionState::NotLoaded | SectionState::Loading => println!("  (not loaded)"),
    }
    Ok(())
}

fn print_entries(entries: &[patient_portal_lib::fhir::ClinicalEntry]) {
    if entries.is_empty() {
        println!("  No records found.");
        return;
    }
    for entry in entries {
        for line in entry.display_lines() {
            println!("  {}", line);
        }
        println!();
    }
}
