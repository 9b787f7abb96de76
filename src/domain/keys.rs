//! Store key naming for view counters.
//!
//! Every content item owns exactly one counter key of the form
//! `{namespace}:{category}:{slug}`. Segments are validated so the mapping
//! from slug to key stays injective: no segment may contain the `:`
//! delimiter, whitespace or control characters.

use std::fmt;

use super::error::DomainError;
use super::visitor::VisitorId;

pub const DEFAULT_NAMESPACE: &str = "pageviews";
pub const DEFAULT_CATEGORY: &str = "projects";

const KEY_DELIMITER: char = ':';
const SEEN_SEGMENT: &str = "seen";
const MAX_SLUG_BYTES: usize = 200;
const MAX_SEGMENT_BYTES: usize = 64;

/// Fixed namespace and category for one content type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    namespace: String,
    category: String,
}

impl KeySpace {
    pub fn new(
        namespace: impl Into<String>,
        category: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let namespace = namespace.into();
        let category = category.into();
        validate_segment("namespace", &namespace, MAX_SEGMENT_BYTES)?;
        validate_segment("category", &category, MAX_SEGMENT_BYTES)?;
        if category == SEEN_SEGMENT {
            return Err(DomainError::validation(
                "category `seen` is reserved for deduplication keys",
            ));
        }
        Ok(Self {
            namespace,
            category,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Counter key for `slug`.
    pub fn counter_key(&self, slug: &str) -> Result<CounterKey, DomainError> {
        validate_slug(slug)?;
        Ok(CounterKey(format!(
            "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{slug}",
            self.namespace, self.category
        )))
    }

    /// Deduplication key marking that `visitor` has viewed `slug` recently.
    pub fn seen_key(&self, visitor: &VisitorId, slug: &str) -> Result<SeenKey, DomainError> {
        validate_slug(slug)?;
        Ok(SeenKey(format!(
            "{ns}{d}{SEEN_SEGMENT}{d}{cat}{d}{visitor}{d}{slug}",
            ns = self.namespace,
            cat = self.category,
            d = KEY_DELIMITER,
        )))
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

/// Store key holding a content item's running view count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey(String);

impl CounterKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived marker key written by repeat-visit deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeenKey(String);

impl SeenKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `slug` can be embedded in a key without ambiguity.
pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
    validate_segment("slug", slug, MAX_SLUG_BYTES)
}

fn validate_segment(field: &str, value: &str, max_bytes: usize) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    if value.len() > max_bytes {
        return Err(DomainError::validation(format!(
            "{field} exceeds {max_bytes} bytes"
        )));
    }
    if let Some(ch) = value
        .chars()
        .find(|ch| *ch == KEY_DELIMITER || ch.is_whitespace() || ch.is_control())
    {
        return Err(DomainError::validation(format!(
            "{field} `{value}` contains forbidden character {ch:?}"
        )));
    }
    Ok(())
}
