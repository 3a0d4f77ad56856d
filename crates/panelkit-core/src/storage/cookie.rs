use std::collections::HashMap;
use std::sync::Arc;

use ::cookie::{Cookie, SameSite};
use parking_lot::{Mutex, RwLock};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use url::Url;

use super::{BackendKind, KeyValueStore, StorageBackend, StorageError, WriteOptions};
use crate::auth::codec::CredentialCodec;
use crate::location::{is_loopback_host, Navigator};

/// Cookie lifetime when the caller does not give one.
const DEFAULT_COOKIE_DAYS: i64 = 1;

/// Paths that may hold their own copy of a cookie.
pub const DEFAULT_COOKIE_PATHS: [&str; 4] = ["/", "/dashboard", "/user", "/admin"];

/// Raw cookie storage, the equivalent of a browser's cookie jar.
pub trait CookieJar: Send + Sync {
    /// Store a cookie. An already expired cookie deletes the matching entry.
    fn set(&self, cookie: Cookie<'static>) -> Result<(), StorageError>;

    /// Values of every live cookie called `name`.
    fn get(&self, name: &str) -> Result<Vec<String>, StorageError>;
}

fn is_expired(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    cookie.expires_datetime().is_some_and(|at| at <= now)
        || cookie.max_age().is_some_and(|age| age <= Duration::ZERO)
}

fn same_slot(a: &Cookie<'_>, b: &Cookie<'_>) -> bool {
    a.name() == b.name()
        && a.path().unwrap_or("/") == b.path().unwrap_or("/")
        && a.domain().map(str::to_ascii_lowercase) == b.domain().map(str::to_ascii_lowercase)
}

/// In-process cookie jar for one host.
///
/// Mirrors the browser rules the session layer cares about: a cookie is
/// identified by (name, path, domain), a Domain attribute must cover the
/// host, and cookies can be disabled outright.
pub struct MemoryCookieJar {
    host: String,
    cookies: RwLock<Vec<Cookie<'static>>>,
    blocked: RwLock<bool>,
    reject_domain: RwLock<bool>,
}

impl MemoryCookieJar {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            cookies: RwLock::new(Vec::new()),
            blocked: RwLock::new(false),
            reject_domain: RwLock::new(false),
        }
    }

    pub fn for_url(url: &Url) -> Self {
        Self::new(url.host_str().unwrap_or("localhost"))
    }

    /// Fail every read and write, as when cookies are disabled.
    pub fn set_blocked(&self, blocked: bool) {
        *self.blocked.write() = blocked;
    }

    /// Silently drop cookies that carry a Domain attribute.
    pub fn set_reject_domain(&self, reject: bool) {
        *self.reject_domain.write() = reject;
    }

    /// Live cookies, attributes included.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        let now = OffsetDateTime::now_utc();
        self.cookies
            .read()
            .iter()
            .filter(|c| !is_expired(c, now))
            .cloned()
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Cookie<'static>> {
        self.cookies().into_iter().find(|c| c.name() == name)
    }

    fn domain_allowed(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.host == domain || self.host.ends_with(&format!(".{}", domain))
    }
}

impl CookieJar for MemoryCookieJar {
    fn set(&self, cookie: Cookie<'static>) -> Result<(), StorageError> {
        if *self.blocked.read() {
            return Err(StorageError::Unavailable("cookies are disabled".to_string()));
        }
        if let Some(domain) = cookie.domain() {
            if *self.reject_domain.read() || !self.domain_allowed(domain) {
                debug!(name = cookie.name(), domain = domain, "Cookie rejected for domain");
                return Ok(());
            }
        }

        let mut cookies = self.cookies.write();
        cookies.retain(|existing| !same_slot(existing, &cookie));
        if !is_expired(&cookie, OffsetDateTime::now_utc()) {
            cookies.push(cookie);
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<String>, StorageError> {
        if *self.blocked.read() {
            return Err(StorageError::Unavailable("cookies are disabled".to_string()));
        }
        Ok(self
            .cookies()
            .iter()
            .filter(|c| c.name() == name)
            .map(|c| c.value().to_string())
            .collect())
    }
}

fn mirror_key(name: &str) -> String {
    format!("cookie_{}", name)
}

fn failure_key(name: &str) -> String {
    format!("cookie_{}_failure", name)
}

/// Percent-encode an envelope so quotes and separators survive the
/// `Cookie` header.
fn to_cookie_value(stored: &str) -> String {
    urlencoding::encode(stored).into_owned()
}

fn from_cookie_value(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(|v| v.into_owned())
}

/// Cookie adapter: tagged values, browser-safe attributes, a mirror of every
/// value in the local store, and write/delete confirmation with repair.
pub struct CookieBackend {
    jar: Arc<dyn CookieJar>,
    mirror: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    codec: CredentialCodec,
    cleanup_paths: Vec<String>,
    expiries: Mutex<HashMap<String, OffsetDateTime>>,
}

impl CookieBackend {
    pub fn new(
        jar: Arc<dyn CookieJar>,
        mirror: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        codec: CredentialCodec,
    ) -> Self {
        Self {
            jar,
            mirror,
            navigator,
            codec,
            cleanup_paths: DEFAULT_COOKIE_PATHS.iter().map(|p| p.to_string()).collect(),
            expiries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cleanup_paths(mut self, paths: Vec<String>) -> Self {
        self.cleanup_paths = paths;
        self
    }

    fn build(
        &self,
        name: &str,
        stored: &str,
        expires: OffsetDateTime,
        location: &Url,
        with_domain: bool,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), stored.to_string()))
            .path("/")
            .expires(expires)
            .same_site(SameSite::Lax)
            .secure(location.scheme() == "https");

        if with_domain && !is_loopback_host(location) {
            if let Some(host) = location.host_str() {
                builder = builder.domain(host.to_string());
            }
        }
        builder.build()
    }

    fn expired(name: &str, path: &str, domain: Option<&str>) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), String::new()))
            .path(path.to_string())
            .expires(OffsetDateTime::UNIX_EPOCH);
        if let Some(domain) = domain {
            builder = builder.domain(domain.to_string());
        }
        builder.build()
    }

    /// Our value for `name` as seen in the jar alone, ignoring the mirror.
    fn jar_value(&self, name: &str) -> Option<String> {
        self.jar
            .get(name)
            .ok()?
            .iter()
            .filter_map(|raw| from_cookie_value(raw))
            .find_map(|stored| self.codec.decode(&stored))
    }

    fn jar_has(&self, name: &str) -> bool {
        self.jar.get(name).map(|v| !v.is_empty()).unwrap_or(false)
    }

    fn expire_everywhere(&self, name: &str, location: &Url) -> Result<(), StorageError> {
        let domain = location.host_str().filter(|_| !is_loopback_host(location));
        let mut result = Ok(());
        for path in &self.cleanup_paths {
            if let Err(e) = self.jar.set(Self::expired(name, path, None)) {
                result = Err(e);
            }
            if let Some(domain) = domain {
                if let Err(e) = self.jar.set(Self::expired(name, path, Some(domain))) {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl StorageBackend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn write(&self, name: &str, value: &str, options: &WriteOptions) -> Result<(), StorageError> {
        let location = self.navigator.current();
        let stored = self.codec.encode(value);
        let days = options.days.unwrap_or(DEFAULT_COOKIE_DAYS);
        let expires = OffsetDateTime::now_utc() + Duration::days(days);
        self.expiries.lock().insert(name.to_string(), expires);

        let result = self.jar.set(self.build(
            name,
            &to_cookie_value(&stored),
            expires,
            &location,
            true,
        ));

        if let Err(e) = self.mirror.set(&mirror_key(name), &stored) {
            debug!(key = name, error = %e, "Cookie mirror write failed");
        }
        result
    }

    fn read(&self, name: &str) -> Option<String> {
        if let Some(value) = self.jar_value(name) {
            return Some(value);
        }
        match self.mirror.get(&mirror_key(name)) {
            Ok(Some(stored)) => self.codec.decode(&stored),
            Ok(None) => None,
            Err(e) => {
                debug!(key = name, error = %e, "Cookie mirror read failed");
                None
            }
        }
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let location = self.navigator.current();
        let result = self.expire_everywhere(name, &location);

        for key in [mirror_key(name), failure_key(name)] {
            if let Err(e) = self.mirror.remove(&key) {
                debug!(key = %key, error = %e, "Cookie mirror removal failed");
            }
        }
        self.expiries.lock().remove(name);
        result
    }

    fn confirm(&self, name: &str, expected: Option<&str>) -> Result<(), StorageError> {
        let location = self.navigator.current();

        match expected {
            Some(value) => {
                if self.jar_value(name).as_deref() == Some(value) {
                    return Ok(());
                }
                warn!(name = name, "Cookie not visible after write, retrying without domain");

                let expires = self
                    .expiries
                    .lock()
                    .get(name)
                    .copied()
                    .unwrap_or_else(|| OffsetDateTime::now_utc() + Duration::days(DEFAULT_COOKIE_DAYS));
                let stored = to_cookie_value(&self.codec.encode(value));
                if let Err(e) = self.jar.set(self.build(name, &stored, expires, &location, false)) {
                    debug!(name = name, error = %e, "Cookie retry failed");
                }
                if let Err(e) = self.mirror.set(&failure_key(name), "true") {
                    debug!(name = name, error = %e, "Could not record cookie failure");
                }
                Err(StorageError::NotPersisted(name.to_string()))
            }
            None => {
                if !self.jar_has(name) {
                    return Ok(());
                }
                debug!(name = name, "Cookie still present after removal, retrying");
                if let Err(e) = self.jar.set(Self::expired(name, "/", None)) {
                    debug!(name = name, error = %e, "Cookie removal retry failed");
                }
                if let Some(host) = location.host_str().filter(|_| !is_loopback_host(&location)) {
                    if let Err(e) = self.jar.set(Self::expired(name, "/", Some(host))) {
                        debug!(name = name, domain = host, error = %e, "Cookie removal retry failed");
                    }
                }
                if self.jar_has(name) {
                    Err(StorageError::NotRemoved(name.to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::MemoryNavigator;
    use crate::storage::MemoryStore;

    struct Fixture {
        jar: Arc<MemoryCookieJar>,
        mirror: Arc<MemoryStore>,
        backend: CookieBackend,
    }

    fn fixture(page: &str) -> Fixture {
        let url = Url::parse(page).unwrap();
        let jar = Arc::new(MemoryCookieJar::for_url(&url));
        let mirror = Arc::new(MemoryStore::new());
        let backend = CookieBackend::new(
            jar.clone(),
            mirror.clone(),
            Arc::new(MemoryNavigator::new(url)),
            CredentialCodec::new("panel-a"),
        );
        Fixture { jar, mirror, backend }
    }

    // -------------------------------------------------------------------------
    // Jar Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_jar_expired_cookie_deletes_same_slot_only() {
        let jar = MemoryCookieJar::new("panel.example.com");
        jar.set(Cookie::build(("token", "a")).path("/").build()).unwrap();
        jar.set(Cookie::build(("token", "b")).path("/user").build()).unwrap();

        jar.set(CookieBackend::expired("token", "/", None)).unwrap();
        assert_eq!(jar.get("token").unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_jar_rejects_foreign_domain() {
        let jar = MemoryCookieJar::new("panel.example.com");
        jar.set(Cookie::build(("a", "1")).domain("other.com").build()).unwrap();
        jar.set(Cookie::build(("b", "2")).domain("example.com").build()).unwrap();

        assert!(jar.get("a").unwrap().is_empty());
        assert_eq!(jar.get("b").unwrap(), vec!["2".to_string()]);
    }

    #[test]
    fn test_jar_blocked() {
        let jar = MemoryCookieJar::new("panel.example.com");
        jar.set_blocked(true);
        assert!(jar.set(Cookie::new("a", "1")).is_err());
        assert!(jar.get("a").is_err());
    }

    // -------------------------------------------------------------------------
    // Backend Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_write_sets_attributes() {
        let f = fixture("https://panel.example.com/dashboard");
        f.backend
            .write("auth_data", "a1", &WriteOptions::days(1))
            .unwrap();

        let cookie = f.jar.find("auth_data").unwrap();
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("panel.example.com"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));

        let expires = cookie.expires_datetime().unwrap();
        let remaining = expires - OffsetDateTime::now_utc();
        assert!(remaining > Duration::hours(23) && remaining <= Duration::days(1));

        assert_eq!(f.backend.read("auth_data"), Some("a1".to_string()));
        assert!(f.mirror.get("cookie_auth_data").unwrap().is_some());
    }

    #[test]
    fn test_write_on_localhost_omits_domain() {
        let f = fixture("http://localhost:8080/");
        f.backend
            .write("auth_data", "a1", &WriteOptions::days(30))
            .unwrap();

        let cookie = f.jar.find("auth_data").unwrap();
        assert_eq!(cookie.domain(), None);
        assert_eq!(cookie.secure(), Some(false));
        let remaining = cookie.expires_datetime().unwrap() - OffsetDateTime::now_utc();
        assert!(remaining > Duration::days(29));
    }

    #[test]
    fn test_value_survives_cookie_header() {
        let f = fixture("https://panel.example.com/");
        let value = "a1; path=/evil \"quoted\" ü";
        f.backend
            .write("auth_data", value, &WriteOptions::days(1))
            .unwrap();

        let header = f.jar.find("auth_data").unwrap().to_string();
        let parsed = Cookie::parse(header).unwrap();
        assert_eq!(parsed.path(), Some("/"));

        let jar = MemoryCookieJar::new("panel.example.com");
        jar.set(parsed.into_owned()).unwrap();
        let reread = CookieBackend::new(
            Arc::new(jar),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryNavigator::new(Url::parse("https://panel.example.com/").unwrap())),
            CredentialCodec::new("panel-a"),
        );
        assert_eq!(reread.read("auth_data").as_deref(), Some(value));
    }

    #[test]
    fn test_read_falls_back_to_mirror() {
        let f = fixture("https://panel.example.com/");
        f.jar.set_blocked(true);

        assert!(f.backend.write("auth_data", "a1", &WriteOptions::days(1)).is_err());
        assert_eq!(f.backend.read("auth_data"), Some("a1".to_string()));
    }

    #[test]
    fn test_read_ignores_other_site() {
        let f = fixture("https://panel.example.com/");
        let other = CredentialCodec::new("panel-b");
        f.jar
            .set(Cookie::build(("auth_data", other.encode("b1"))).path("/").build())
            .unwrap();
        f.jar
            .set(Cookie::build(("auth_data", "legacy")).path("/user").build())
            .unwrap();

        assert_eq!(f.backend.read("auth_data"), None);
    }

    #[test]
    fn test_confirm_retries_without_domain() {
        let f = fixture("https://panel.example.com/");
        f.jar.set_reject_domain(true);

        f.backend
            .write("auth_data", "a1", &WriteOptions::days(1))
            .unwrap();
        assert!(f.jar.find("auth_data").is_none());

        let result = f.backend.confirm("auth_data", Some("a1"));
        assert!(matches!(result, Err(StorageError::NotPersisted(_))));

        let cookie = f.jar.find("auth_data").unwrap();
        assert_eq!(cookie.domain(), None);
        assert_eq!(
            f.mirror.get("cookie_auth_data_failure").unwrap(),
            Some("true".to_string())
        );

        // The repaired cookie now confirms
        assert!(f.backend.confirm("auth_data", Some("a1")).is_ok());
    }

    #[test]
    fn test_remove_clears_every_path_and_mirror() {
        let f = fixture("https://panel.example.com/");
        f.backend
            .write("auth_data", "a1", &WriteOptions::days(1))
            .unwrap();
        f.jar
            .set(Cookie::build(("auth_data", "old")).path("/dashboard").build())
            .unwrap();

        f.backend.remove("auth_data").unwrap();

        assert!(f.jar.get("auth_data").unwrap().is_empty());
        assert_eq!(f.backend.read("auth_data"), None);
        assert_eq!(f.mirror.get("cookie_auth_data").unwrap(), None);
        assert!(f.backend.confirm("auth_data", None).is_ok());
    }

    #[test]
    fn test_confirm_removal_retries_bare_path() {
        let f = fixture("https://panel.example.com/");
        let f = Fixture {
            backend: f.backend.with_cleanup_paths(vec!["/admin".to_string()]),
            ..f
        };
        f.jar
            .set(Cookie::build(("token", "x")).path("/").build())
            .unwrap();

        f.backend.remove("token").unwrap();
        assert!(!f.jar.get("token").unwrap().is_empty());

        assert!(f.backend.confirm("token", None).is_ok());
        assert!(f.jar.get("token").unwrap().is_empty());
    }
}
