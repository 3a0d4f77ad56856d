use std::sync::Arc;

use tracing::trace;

use super::codec::{CredentialCodec, Envelope};
use super::context::SessionContext;
use super::keys;
use crate::storage::{usable, BackendKind, StorageStack};

/// Picks the `Authorization` value for an outgoing request.
///
/// Sources, first hit wins:
/// 1. `auth_data` in the persistent store
/// 2. the `auth_data` cookie (or its local mirror)
/// 3. the in-memory fallback
/// 4. the `cookie_auth_data` backup key, tagged or plain
#[derive(Clone)]
pub struct CredentialResolver {
    stack: Arc<StorageStack>,
    context: Arc<SessionContext>,
    codec: CredentialCodec,
}

impl CredentialResolver {
    pub fn new(stack: Arc<StorageStack>, context: Arc<SessionContext>, codec: CredentialCodec) -> Self {
        Self {
            stack,
            context,
            codec,
        }
    }

    pub fn resolve_auth_header(&self) -> Option<String> {
        if let Some(value) = usable(self.stack.read(BackendKind::Local, keys::AUTH_DATA)) {
            trace!(source = "local", "Resolved auth header");
            return Some(value);
        }
        if let Some(value) = usable(self.stack.read(BackendKind::Cookie, keys::AUTH_DATA)) {
            trace!(source = "cookie", "Resolved auth header");
            return Some(value);
        }
        if let Some(value) = usable(self.context.auth_data_fallback()) {
            trace!(source = "memory", "Resolved auth header");
            return Some(value);
        }
        let backup = self.stack.read(BackendKind::Local, keys::COOKIE_AUTH_DATA)?;
        let value = match self.codec.inspect(&backup) {
            Envelope::Ours(value) => value,
            Envelope::Plain => backup,
            Envelope::Foreign => return None,
        };
        trace!(source = "backup", "Resolved auth header");
        usable(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::MemoryNavigator;
    use crate::storage::{
        CookieBackend, KeyValueBackend, KeyValueStore, MemoryCookieJar, MemoryStore, StorageBackend,
        WriteOptions,
    };
    use url::Url;

    struct Fixture {
        local: Arc<MemoryStore>,
        cookies: Arc<CookieBackend>,
        context: Arc<SessionContext>,
        resolver: CredentialResolver,
    }

    fn fixture() -> Fixture {
        let url = Url::parse("https://panel.example.com/dashboard").unwrap();
        let local = Arc::new(MemoryStore::new());
        let codec = CredentialCodec::new("panel-a");
        let cookies = Arc::new(CookieBackend::new(
            Arc::new(MemoryCookieJar::for_url(&url)),
            local.clone(),
            Arc::new(MemoryNavigator::new(url)),
            codec.clone(),
        ));
        let stack = Arc::new(StorageStack::new(vec![
            Arc::new(KeyValueBackend::new(BackendKind::Local, local.clone())),
            cookies.clone(),
        ]));
        let context = Arc::new(SessionContext::new());
        let resolver = CredentialResolver::new(stack, context.clone(), codec);
        Fixture {
            local,
            cookies,
            context,
            resolver,
        }
    }

    #[test]
    fn test_resolve_prefers_local() {
        let f = fixture();
        f.cookies
            .write(keys::AUTH_DATA, "from-cookie", &WriteOptions::days(1))
            .unwrap();
        f.local.set(keys::AUTH_DATA, "from-local").unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), Some("from-local".to_string()));
    }

    #[test]
    fn test_resolve_falls_back_to_cookie_then_memory() {
        let f = fixture();
        f.cookies
            .write(keys::AUTH_DATA, "from-cookie", &WriteOptions::days(1))
            .unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), Some("from-cookie".to_string()));

        f.cookies.remove(keys::AUTH_DATA).unwrap();
        f.context
            .update(|flags| flags.auth_data_fallback = Some("from-memory".to_string()));
        assert_eq!(f.resolver.resolve_auth_header(), Some("from-memory".to_string()));
    }

    #[test]
    fn test_resolve_backup_tagged_and_plain() {
        let f = fixture();
        let codec = CredentialCodec::new("panel-a");

        f.local
            .set(keys::COOKIE_AUTH_DATA, &codec.encode("tagged"))
            .unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), Some("tagged".to_string()));

        f.local.set(keys::COOKIE_AUTH_DATA, "plain").unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), Some("plain".to_string()));

        let other = CredentialCodec::new("panel-b");
        f.local
            .set(keys::COOKIE_AUTH_DATA, &other.encode("foreign"))
            .unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), None);
    }

    #[test]
    fn test_resolve_skips_placeholders() {
        let f = fixture();
        f.local.set(keys::AUTH_DATA, "null").unwrap();
        f.local.set(keys::COOKIE_AUTH_DATA, "undefined").unwrap();
        assert_eq!(f.resolver.resolve_auth_header(), None);
    }

    #[test]
    fn test_resolve_never_fails_on_broken_storage() {
        let f = fixture();
        f.local.set(keys::AUTH_DATA, "a1").unwrap();
        f.local.set_failing(true);
        assert_eq!(f.resolver.resolve_auth_header(), None);
    }
}
