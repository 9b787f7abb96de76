//! Visitor id persisted in a browser cookie.

use std::sync::Mutex;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::application::identity::{StorageError, VISITOR_STORAGE_KEY, VisitorStorage};
use crate::config::IdentitySettings;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "infra::http::cookies";

/// Name and lifetime of the visitor cookie.
#[derive(Debug, Clone)]
pub struct VisitorCookie {
    pub name: String,
    pub max_age: time::Duration,
}

impl From<&IdentitySettings> for VisitorCookie {
    fn from(settings: &IdentitySettings) -> Self {
        let seconds = i64::try_from(settings.cookie_max_age.as_secs()).unwrap_or(i64::MAX);
        Self {
            name: settings.cookie_name.clone(),
            max_age: time::Duration::seconds(seconds),
        }
    }
}

/// [`VisitorStorage`] over the cookies of one request. Writes are collected
/// and emitted on the response with [`CookieStorage::apply`].
#[derive(Debug)]
pub struct CookieStorage {
    cookie: VisitorCookie,
    current: Option<String>,
    issued: Mutex<Option<String>>,
}

impl CookieStorage {
    pub fn from_jar(jar: &CookieJar, cookie: &VisitorCookie) -> Self {
        Self {
            current: jar.get(&cookie.name).map(|c| c.value().to_string()),
            cookie: cookie.clone(),
            issued: Mutex::new(None),
        }
    }

    /// Value written during this request, if any.
    pub fn issued(&self) -> Option<String> {
        mutex_lock(&self.issued, SOURCE, "issued").clone()
    }

    /// Add the issued visitor cookie to `jar`; unchanged when nothing was
    /// written.
    pub fn apply(self, jar: CookieJar) -> CookieJar {
        let Some(value) = self.issued() else {
            return jar;
        };
        jar.add(
            Cookie::build((self.cookie.name, value))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(self.cookie.max_age),
        )
    }
}

impl VisitorStorage for CookieStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if key != VISITOR_STORAGE_KEY {
            return Ok(None);
        }
        Ok(self.issued().or_else(|| self.current.clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if key != VISITOR_STORAGE_KEY {
            return Err(StorageError::Unavailable(format!(
                "cookie storage only holds `{VISITOR_STORAGE_KEY}`, not `{key}`"
            )));
        }
        *mutex_lock(&self.issued, SOURCE, "set_item") = Some(value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::identity::{IdentityProvider, StoredIdentity};

    fn visitor_cookie() -> VisitorCookie {
        VisitorCookie {
            name: "visitorId".to_string(),
            max_age: time::Duration::days(365),
        }
    }

    #[test]
    fn existing_cookie_is_reused_without_reissuing() {
        let jar = CookieJar::new().add(Cookie::new("visitorId", "0a1b2c3d"));
        let identity = StoredIdentity::new(CookieStorage::from_jar(&jar, &visitor_cookie()));

        assert_eq!(
            identity.resolve().map(|id| id.as_str().to_string()).as_deref(),
            Some("0a1b2c3d")
        );
        assert!(identity.storage().issued().is_none());
    }

    #[test]
    fn missing_cookie_is_issued_with_attributes() {
        let identity = StoredIdentity::new(CookieStorage::from_jar(
            &CookieJar::new(),
            &visitor_cookie(),
        ));
        let id = identity.resolve().expect("id");
        assert_eq!(identity.resolve(), Some(id.clone()));

        let jar = identity.into_storage().apply(CookieJar::new());
        let cookie = jar.get("visitorId").expect("cookie");
        assert_eq!(cookie.value(), id.as_str());
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(365)));
    }

    #[test]
    fn malformed_cookie_is_replaced() {
        let jar = CookieJar::new().add(Cookie::new("visitorId", "<script>"));
        let identity = StoredIdentity::new(CookieStorage::from_jar(&jar, &visitor_cookie()));
        let id = identity.resolve().expect("id");
        assert_eq!(identity.storage().issued().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn other_keys_are_not_stored() {
        let storage = CookieStorage::from_jar(&CookieJar::new(), &visitor_cookie());
        assert!(storage.set_item("theme", "dark").is_err());
        assert_eq!(storage.get_item("theme").expect("read"), None);
    }
}
