use std::fmt;

use crate::cache::error::TokenError;
use crate::sources::fetch::FetchParams;
use crate::utils::constants::{CACHE_KEY_SEPARATOR, PERSONAL_ORGANIZATION, SESSION_TEMPLATE};

/// `{session_id}:{template|__session__}:{organization_id|__personal__}`
///
/// Two requests share a key, and therefore an in-flight fetch, iff session,
/// template and organization all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParts {
    pub session_id: String,
    pub template: Option<String>,
    pub organization_id: Option<String>,
}

impl CacheKey {
    pub fn new(session_id: &str, template: Option<&str>, organization_id: Option<&str>) -> Self {
        Self(format!(
            "{}{sep}{}{sep}{}",
            session_id,
            template.unwrap_or(SESSION_TEMPLATE),
            organization_id.unwrap_or(PERSONAL_ORGANIZATION),
            sep = CACHE_KEY_SEPARATOR,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses an encoded key, e.g. one read back from an observer event log.
    pub fn parse(encoded: &str) -> Option<Self> {
        let separators = encoded.matches(CACHE_KEY_SEPARATOR).count();
        (separators >= 2 && !encoded.starts_with(CACHE_KEY_SEPARATOR)).then(|| Self(encoded.to_owned()))
    }

    /// Splits the key back into its parts; template and organization are
    /// taken from the right so a session id may itself contain `:`.
    pub fn decode(&self) -> CacheKeyParts {
        let mut parts = self.0.rsplitn(3, CACHE_KEY_SEPARATOR);
        let organization = parts.next().unwrap_or(PERSONAL_ORGANIZATION);
        let template = parts.next().unwrap_or(SESSION_TEMPLATE);
        let session_id = parts.next().unwrap_or_default();

        CacheKeyParts {
            session_id: session_id.to_owned(),
            template: (template != SESSION_TEMPLATE).then(|| template.to_owned()),
            organization_id: (organization != PERSONAL_ORGANIZATION).then(|| organization.to_owned()),
        }
    }
}

/// Rejects a template or organization id that would not survive a
/// `new` -> `decode` round trip: empty, containing the separator, or equal
/// to a sentinel.
pub fn check_component(field: &str, value: Option<&str>) -> Result<(), TokenError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.is_empty() {
        return Err(TokenError::InvalidRequest(format!("{} must not be empty", field)));
    }
    if value.contains(CACHE_KEY_SEPARATOR) {
        return Err(TokenError::InvalidRequest(format!(
            "{} '{}' must not contain '{}'",
            field, value, CACHE_KEY_SEPARATOR
        )));
    }
    if value == SESSION_TEMPLATE || value == PERSONAL_ORGANIZATION {
        return Err(TokenError::InvalidRequest(format!("{} '{}' is reserved", field, value)));
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&CacheKeyParts> for CacheKey {
    fn from(parts: &CacheKeyParts) -> Self {
        CacheKey::new(
            &parts.session_id,
            parts.template.as_deref(),
            parts.organization_id.as_deref(),
        )
    }
}

impl From<CacheKeyParts> for FetchParams {
    fn from(parts: CacheKeyParts) -> Self {
        FetchParams {
            session_id: parts.session_id,
            organization_id: parts.organization_id,
            template: parts.template,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_use_sentinels() {
        assert_eq!(CacheKey::new("sess_1", None, None).as_str(), "sess_1:__session__:__personal__");
        assert_eq!(
            CacheKey::new("sess_1", Some("supabase"), Some("org_9")).to_string(),
            "sess_1:supabase:org_9"
        );
    }

    #[test]
    fn distinct_fields_give_distinct_keys() {
        let plain = CacheKey::new("sess_1", None, None);
        assert_ne!(plain, CacheKey::new("sess_1", Some("supabase"), None));
        assert_ne!(plain, CacheKey::new("sess_1", None, Some("org_9")));
        assert_ne!(plain, CacheKey::new("sess_2", None, None));
        assert_eq!(plain, CacheKey::new("sess_1", None, None));
    }

    #[test]
    fn decode_maps_sentinels_back() {
        let parts = CacheKey::new("sess:1", Some("hasura"), None).decode();
        assert_eq!(
            parts,
            CacheKeyParts {
                session_id: "sess:1".to_owned(),
                template: Some("hasura".to_owned()),
                organization_id: None,
            }
        );
        assert_eq!(CacheKey::from(&parts), CacheKey::new("sess:1", Some("hasura"), None));

        let params = FetchParams::from(parts);
        assert_eq!(params.template.as_deref(), Some("hasura"));
        assert_eq!(params.organization_id, None);
    }

    #[test]
    fn components_that_break_decoding_are_rejected() {
        assert!(check_component("template", None).is_ok());
        assert!(check_component("template", Some("supabase")).is_ok());
        assert!(matches!(
            check_component("template", Some("a:b")),
            Err(TokenError::InvalidRequest(_))
        ));
        assert!(check_component("organization_id", Some("")).is_err());
        assert!(check_component("template", Some(SESSION_TEMPLATE)).is_err());
        assert!(check_component("organization_id", Some(PERSONAL_ORGANIZATION)).is_err());
    }

    #[test]
    fn parse_requires_three_parts() {
        assert_eq!(
            CacheKey::parse("sess_1:__session__:org_9"),
            Some(CacheKey::new("sess_1", None, Some("org_9")))
        );
        assert_eq!(CacheKey::parse("sess_1:__session__"), None);
        assert_eq!(CacheKey::parse(":a:b"), None);
    }
}
