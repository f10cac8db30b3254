//! OAuth 2.0 Authorization Code + PKCE flow
//!
//! States: `Unauthenticated -> AwaitingProviderRedirect -> AwaitingTokenExchange
//! -> Authenticated`, and back to `Unauthenticated` on logout or failure.
//!
//! The controller owns the [`Session`]. Observers get read-only change
//! notifications through [`AuthController::subscribe`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::activity_log;
use crate::config::Config;
use crate::fhir::{FetchError, FetchErrorKind, FhirClient, PatientSummary};
use crate::navigator::{authorization_code, strip_query_param, Navigator};
use crate::pkce::{PkceError, PkcePair, CODE_CHALLENGE_METHOD};
use crate::session::{Session, SessionStore};
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    Unauthenticated,
    AwaitingProviderRedirect,
    AwaitingTokenExchange,
    Authenticated,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "Unauthenticated",
            AuthState::AwaitingProviderRedirect => "AwaitingProviderRedirect",
            AuthState::AwaitingTokenExchange => "AwaitingTokenExchange",
            AuthState::Authenticated => "Authenticated",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("PKCE generation failed: {0}")]
    Pkce(#[from] PkceError),

    #[error("Missing code verifier; start the login again")]
    MissingVerifier,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Patient ID not found in token response")]
    PatientIdMissing,

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid OAuth configuration: {0}")]
    Config(String),
}

/// OAuth client registration and endpoints
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub authorize_url: Url,
    pub token_url: Url,
    /// Sent verbatim; must match the registered redirect exactly
    pub redirect_uri: String,
    pub scope: String,
    pub verifier_length: usize,
}

impl OAuthSettings {
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let parse = |name: &str, value: &str| {
            Url::parse(value).map_err(|e| AuthError::Config(format!("{} '{}': {}", name, value, e)))
        };

        Ok(Self {
            client_id: config.client_id.clone(),
            authorize_url: parse("authorize_url", &config.authorize_url)?,
            token_url: parse("token_url", &config.token_url)?,
            redirect_uri: parse("redirect_uri", &config.redirect_uri)
                .map(|_| config.redirect_uri.clone())?,
            scope: config.scope.clone(),
            verifier_length: config.verifier_length,
        })
    }
}

/// Token endpoint response. `patient` is the launch-context patient id.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    patient: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Which recovery path `restore_session` took
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No stored token and no callback code in the address
    NoSession,
    /// Stored session needed nothing further
    Restored,
    /// Stored token and patient id without a summary; summary fetched
    SummaryFetched,
    /// Stored token and patient id without a summary; summary fetch failed
    SummaryUnavailable(FetchErrorKind),
    /// Callback code in the address consumed by a token exchange
    CallbackCompleted,
}

pub struct AuthController {
    http_client: reqwest::Client,
    settings: OAuthSettings,
    store: SessionStore,
    navigator: Arc<dyn Navigator>,
    state: AuthState,
    session: watch::Sender<Session>,
}

impl AuthController {
    pub fn new(
        settings: OAuthSettings,
        store: SessionStore,
        navigator: Arc<dyn Navigator>,
        timeout: std::time::Duration,
    ) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let (session, _) = watch::channel(Session::default());

        Ok(Self {
            http_client,
            settings,
            store,
            navigator,
            state: AuthState::Unauthenticated,
            session,
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Change notifications for the session
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    fn transition(&mut self, to: AuthState) {
        if self.state != to {
            activity_log::log_auth_transition(self.state.as_str(), to.as_str());
            self.state = to;
        }
    }

    fn publish(&self, session: Session) {
        self.session.send_replace(session);
    }

    /// Begin a login: fresh PKCE pair, verifier persisted, browser sent to
    /// the provider's authorize endpoint. Returns the URL redirected to.
    pub fn start_login(&mut self) -> Result<Url, AuthError> {
        self.store.clear()?;
        self.publish(Session::default());
        self.transition(AuthState::Unauthenticated);

        let pair = match PkcePair::generate(self.settings.verifier_length) {
            Ok(pair) => pair,
            Err(e) => {
                activity_log::log_auth("login_start", false, Some(&e.to_string()));
                return Err(e.into());
            }
        };
        self.store.save_verifier(&pair.verifier)?;

        let url = self.authorize_url(&pair.challenge);
        self.transition(AuthState::AwaitingProviderRedirect);
        activity_log::log_auth("login_start", true, None);
        self.navigator.redirect(&url);
        Ok(url)
    }

    fn authorize_url(&self, challenge: &str) -> Url {
        let mut url = self.settings.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scope)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        url
    }

    /// Exchange an authorization code for a token.
    ///
    /// The code is stripped from the visible address first, whatever the
    /// outcome. `PatientIdMissing` still leaves a token-only session in
    /// place.
    pub async fn complete_login(&mut self, code: &str) -> Result<Session, AuthError> {
        let current = self.navigator.current_url();
        self.navigator
            .replace_url(&strip_query_param(&current, "code"));

        let verifier = match self.store.load_verifier() {
            Ok(Some(verifier)) => verifier,
            Ok(None) => {
                self.transition(AuthState::Unauthenticated);
                activity_log::log_auth("login_complete", false, Some("missing_verifier"));
                return Err(AuthError::MissingVerifier);
            }
            Err(e) => {
                self.transition(AuthState::Unauthenticated);
                return Err(e.into());
            }
        };

        self.transition(AuthState::AwaitingTokenExchange);

        let token = match self.exchange_code(code, &verifier).await {
            Ok(token) => token,
            Err(e) => {
                self.transition(AuthState::Unauthenticated);
                activity_log::log_auth("login_complete", false, Some(&e.to_string()));
                return Err(e);
            }
        };

        let session = Session {
            access_token: Some(token.access_token),
            patient_id: token.patient,
            patient_summary: None,
        };

        if let Err(e) = self
            .store
            .save(&session)
            .and_then(|_| self.store.remove_verifier())
        {
            self.transition(AuthState::Unauthenticated);
            activity_log::log_auth("login_complete", false, Some(&e.to_string()));
            return Err(e.into());
        }

        let has_patient = session.patient_id.is_some();
        self.publish(session.clone());
        self.transition(AuthState::Authenticated);

        if has_patient {
            activity_log::log_auth("login_complete", true, None);
            Ok(session)
        } else {
            warn!("Patient ID not found in token response");
            activity_log::log_auth("login_complete", false, Some("patient_id_missing"));
            Err(AuthError::PatientIdMissing)
        }
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<GrantedToken, AuthError> {
        let response = self
            .http_client
            .post(self.settings.token_url.clone())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.settings.redirect_uri),
                ("client_id", &self.settings.client_id),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("request error: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("reading body: {}", e)))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("HTTP {}: {} ({})", status.as_u16(), err.error, desc),
                    None => format!("HTTP {}: {}", status.as_u16(), err.error),
                },
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(AuthError::TokenExchangeFailed(detail));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::TokenExchangeFailed(format!("malformed response: {}", e)))?;

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::TokenExchangeFailed("response has no access_token".to_string())
            })?;

        Ok(GrantedToken {
            access_token,
            patient: parsed.patient.filter(|p| !p.is_empty()),
        })
    }

    /// Resume after a process start (or page reload).
    ///
    /// With a stored token the session is restored, fetching the patient
    /// summary if it was never cached. Without one, a `code` in the current
    /// address is treated as a pending callback. Only one path runs.
    pub async fn restore_session(
        &mut self,
        fetcher: &FhirClient,
    ) -> Result<RestoreOutcome, AuthError> {
        let stored = self.store.load()?;

        if stored.access_token.is_some() {
            let needs_summary = stored.credentials().is_some() && stored.patient_summary.is_none();
            self.publish(stored);
            self.transition(AuthState::Authenticated);
            activity_log::log_auth("restore", true, None);

            if !needs_summary {
                return Ok(RestoreOutcome::Restored);
            }

            info!("Fetching patient summary after restore");
            return Ok(match self.load_patient_summary(fetcher).await {
                Ok(_) => RestoreOutcome::SummaryFetched,
                Err(e) => RestoreOutcome::SummaryUnavailable(e.kind()),
            });
        }

        let pending_code = authorization_code(&self.navigator.current_url());
        match pending_code {
            Some(code) => {
                info!("Resuming login from provider callback");
                self.transition(AuthState::AwaitingProviderRedirect);
                self.complete_login(&code).await?;
                Ok(RestoreOutcome::CallbackCompleted)
            }
            None => {
                self.publish(stored);
                self.transition(AuthState::Unauthenticated);
                Ok(RestoreOutcome::NoSession)
            }
        }
    }

    /// Fetch the patient summary for the current session and persist it.
    ///
    /// Takes `&mut self`, so no logout can run while the read is in flight.
    pub async fn load_patient_summary(
        &mut self,
        fetcher: &FhirClient,
    ) -> Result<PatientSummary, FetchError> {
        let session = self.session();
        let Some((token, patient_id)) = session.credentials() else {
            return Err(FetchError::Unauthorized);
        };

        let summary = fetcher.fetch_patient_summary(token, patient_id).await?;

        let updated = Session {
            patient_summary: Some(summary.clone()),
            ..session
        };
        if let Err(e) = self.store.save(&updated) {
            warn!("Failed to persist patient summary: {}", e);
        }
        self.publish(updated);
        Ok(summary)
    }

    /// Drop all session state, persisted and in memory
    pub fn logout(&mut self) -> Result<(), AuthError> {
        info!("Logging out and clearing session");
        let cleared = self.store.clear();

        self.publish(Session::default());
        self.transition(AuthState::Unauthenticated);
        if let Ok(home) = Url::parse(&self.settings.redirect_uri) {
            self.navigator.redirect(&home);
        }

        match cleared {
            Ok(()) => {
                activity_log::log_auth("logout", true, None);
                Ok(())
            }
            Err(e) => {
                activity_log::log_auth("logout", false, Some(&e.to_string()));
                Err(e.into())
            }
        }
    }
}

struct GrantedToken {
    access_token: String,
    patient: Option<String>,
}
