//! Navigation seam
//!
//! The auth flow drives the user agent through this trait instead of touching
//! a real browser: redirect to the provider, read the address the provider
//! sent us back to, and rewrite that address once the code is consumed.

use std::sync::Mutex;
use url::Url;

/// The user agent's address bar
pub trait Navigator: Send + Sync {
    /// Send the user agent to `url`
    fn redirect(&self, url: &Url);

    /// The currently visible address
    fn current_url(&self) -> Url;

    /// Rewrite the visible address without navigating
    fn replace_url(&self, url: &Url);
}

/// The `code` query parameter of a callback address, if non-empty
pub fn authorization_code(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `url` with every `name` query parameter removed
pub fn strip_query_param(url: &Url, name: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

#[derive(Debug)]
struct NavigatorState {
    current: Url,
    redirects: Vec<Url>,
}

/// Navigator without a browser: remembers the visible address and every
/// redirect requested. Used by the CLI and tests.
#[derive(Debug)]
pub struct HeadlessNavigator {
    state: Mutex<NavigatorState>,
}

impl HeadlessNavigator {
    pub fn new(current: Url) -> Self {
        Self {
            state: Mutex::new(NavigatorState {
                current,
                redirects: Vec::new(),
            }),
        }
    }

    /// Redirects requested so far, oldest first
    pub fn redirects(&self) -> Vec<Url> {
        self.state
            .lock()
            .map(|s| s.redirects.clone())
            .unwrap_or_default()
    }

    pub fn last_redirect(&self) -> Option<Url> {
        self.state.lock().ok().and_then(|s| s.redirects.last().cloned())
    }
}

impl Navigator for HeadlessNavigator {
    fn redirect(&self, url: &Url) {
        if let Ok(mut state) = self.state.lock() {
            state.redirects.push(url.clone());
            state.current = url.clone();
        }
    }

    fn current_url(&self) -> Url {
        match self.state.lock() {
            Ok(state) => state.current.clone(),
            Err(poisoned) => poisoned.into_inner().current.clone(),
        }
    }

    fn replace_url(&self, url: &Url) {
        if let Ok(mut state) = self.state.lock() {
            state.current = url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_code() {
        let url = Url::parse("http://localhost:3000/?code=abc%2F123&state=x").unwrap();
        assert_eq!(authorization_code(&url).as_deref(), Some("abc/123"));

        let url = Url::parse("http://localhost:3000/?code=").unwrap();
        assert_eq!(authorization_code(&url), None);

        let url = Url::parse("http://localhost:3000/").unwrap();
        assert_eq!(authorization_code(&url), None);
    }

    #[test]
    fn test_strip_only_param() {
        let url = Url::parse("http://localhost:3000/app?code=abc").unwrap();
        assert_eq!(strip_query_param(&url, "code").as_str(), "http://localhost:3000/app");
    }

    #[test]
    fn test_strip_keeps_other_params() {
        let url = Url::parse("http://localhost:3000/?code=abc&tab=vitals").unwrap();
        let stripped = strip_query_param(&url, "code");
        assert_eq!(stripped.query(), Some("tab=vitals"));
    }

    #[test]
    fn test_headless_navigator_records_redirects() {
        let nav = HeadlessNavigator::new(Url::parse("http://localhost:3000/").unwrap());
        let target = Url::parse("https://provider.example/authorize?x=1").unwrap();
        nav.redirect(&target);

        assert_eq!(nav.redirects(), vec![target.clone()]);
        assert_eq!(nav.current_url(), target);

        let back = Url::parse("http://localhost:3000/").unwrap();
        nav.replace_url(&back);
        assert_eq!(nav.current_url(), back);
        assert_eq!(nav.redirects().len(), 1);
    }
}
