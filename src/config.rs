use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::fhir::IdentifierSelector;
use crate::pkce::{MAX_VERIFIER_LENGTH, MIN_VERIFIER_LENGTH};

/// Client configuration (Epic FHIR sandbox by default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // OAuth
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scope: String,
    pub verifier_length: usize,

    // FHIR API
    pub fhir_base_url: String,
    pub request_timeout_secs: u64,

    // Secondary identifier shown in the patient summary
    pub identifier_system: Option<String>,
    pub identifier_type_text: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            client_id: "346cf080-d6d3-4094-8f3b-01a651b91f92".to_string(),
            authorize_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/authorize"
                .to_string(),
            token_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/token".to_string(),
            redirect_uri: "http://localhost:3000".to_string(),
            scope: "openid fhirUser".to_string(),
            verifier_length: MAX_VERIFIER_LENGTH,
            fhir_base_url: "https://fhir.epic.com/interconnect-fhir-oauth/api/FHIR/R4"
                .to_string(),
            request_timeout_secs: 30,
            identifier_system: None,
            identifier_type_text: Some("MRN".to_string()),
        }
    }
}

impl Config {
    /// ~/.patientportal
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".patientportal"))
    }

    /// ~/.patientportal/config.json
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// ~/.patientportal/session.json
    pub fn session_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("session.json"))
    }

    /// Load config from the default path or return default
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|p| Self::load(&p)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from file, or default if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Check URLs, client id and verifier length
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            bail!("client_id must not be empty");
        }
        for (name, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
            ("redirect_uri", &self.redirect_uri),
            ("fhir_base_url", &self.fhir_base_url),
        ] {
            let parsed =
                url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("{} must use http or https, got: {}", name, parsed.scheme());
            }
        }
        if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&self.verifier_length) {
            bail!(
                "verifier_length must be within {}..={}",
                MIN_VERIFIER_LENGTH,
                MAX_VERIFIER_LENGTH
            );
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn identifier_selector(&self) -> IdentifierSelector {
        IdentifierSelector {
            system: self.identifier_system.clone(),
            type_text: self.identifier_type_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.scope, "openid fhirUser");
        assert_eq!(config.redirect_uri, "http://localhost:3000");
        assert_eq!(config.verifier_length, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.client_id = "my-client".to_string();
        config.identifier_system = Some("urn:oid:1.2.3".to_string());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "client_id": "abc", "request_timeout_secs": 5 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.scope, "openid fhirUser");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.token_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fhir_base_url = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.verifier_length = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identifier_selector() {
        let selector = Config::default().identifier_selector();
        assert_eq!(selector.system, None);
        assert_eq!(selector.type_text.as_deref(), Some("MRN"));
    }
}
