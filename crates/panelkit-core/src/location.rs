//! Page location and navigation.
//!
//! The session layer reads the current page URL (scheme, host, path, query)
//! and issues redirects to the login view. `Navigator` abstracts the host
//! environment; `MemoryNavigator` keeps the location in process.

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use url::Url;

/// Views that belong to the authentication flow
const AUTH_VIEWS: [&str; 3] = ["/login", "/register", "/forgot-password"];

pub trait Navigator: Send + Sync {
    fn current(&self) -> Url;

    /// Navigate to `target`, resolved against the current location.
    fn redirect(&self, target: &str);
}

/// In-process navigator that records every redirect.
pub struct MemoryNavigator {
    current: RwLock<Url>,
    redirects: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(current: Url) -> Self {
        Self {
            current: RwLock::new(current),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn navigate(&self, url: Url) {
        *self.current.write() = url;
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current(&self) -> Url {
        self.current.read().clone()
    }

    fn redirect(&self, target: &str) {
        debug!(target = target, "Redirecting");
        self.redirects.lock().push(target.to_string());
        let next = self.current.read().join(target);
        match next {
            Ok(url) => *self.current.write() = url,
            Err(e) => debug!(target = target, error = %e, "Redirect target is not a valid URL"),
        }
    }
}

/// Route path of a hash-routed fragment (`#/login?x=1` -> `/login`).
fn fragment_route(url: &Url) -> Option<&str> {
    url.fragment()
        .map(|f| f.split('?').next().unwrap_or_default())
        .filter(|route| route.starts_with('/'))
}

/// True when the page shows the login, register or forgot-password view,
/// either as the URL path or as the hash route.
pub fn is_auth_view(url: &Url) -> bool {
    let matches = |route: &str| AUTH_VIEWS.iter().any(|view| route.contains(view));
    matches(url.path()) || fragment_route(url).is_some_and(matches)
}

/// True when the URL carries `logout=true`, in its query or in the query of
/// its hash route.
pub fn has_logout_marker(url: &Url) -> bool {
    let in_query = url
        .query_pairs()
        .any(|(key, value)| key == "logout" && value == "true");

    let in_fragment = url
        .fragment()
        .and_then(|f| f.split_once('?'))
        .map(|(_, query)| {
            url::form_urlencoded::parse(query.as_bytes())
                .any(|(key, value)| key == "logout" && value == "true")
        })
        .unwrap_or(false);

    in_query || in_fragment
}

/// True for hosts where browsers reject an explicit Domain cookie attribute.
pub fn is_loopback_host(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_is_auth_view() {
        assert!(is_auth_view(&url("https://panel.example.com/login")));
        assert!(is_auth_view(&url("https://panel.example.com/#/register")));
        assert!(is_auth_view(&url("https://panel.example.com/#/forgot-password?email=x")));
        assert!(!is_auth_view(&url("https://panel.example.com/dashboard")));
        assert!(!is_auth_view(&url("https://panel.example.com/#/dashboard")));
    }

    #[test]
    fn test_has_logout_marker() {
        assert!(has_logout_marker(&url("https://panel.example.com/login?logout=true")));
        assert!(has_logout_marker(&url("https://panel.example.com/#/login?logout=true")));
        assert!(!has_logout_marker(&url("https://panel.example.com/login?logout=false")));
        assert!(!has_logout_marker(&url("https://panel.example.com/dashboard")));
    }

    #[test]
    fn test_is_loopback_host() {
        assert!(is_loopback_host(&url("http://localhost:8080/")));
        assert!(is_loopback_host(&url("http://127.0.0.1/")));
        assert!(!is_loopback_host(&url("https://panel.example.com/")));
    }

    #[test]
    fn test_memory_navigator_records_redirects() {
        let nav = MemoryNavigator::new(url("https://panel.example.com/dashboard"));
        nav.redirect("/#/login");

        assert_eq!(nav.redirects(), vec!["/#/login".to_string()]);
        assert_eq!(nav.current().as_str(), "https://panel.example.com/#/login");
        assert!(is_auth_view(&nav.current()));
    }
}
