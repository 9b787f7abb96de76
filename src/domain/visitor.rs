//! Visitor identifiers.
//!
//! A visitor id is an opaque 8-character lowercase hex token cut from a
//! random v4 UUID. It only distinguishes browsers for repeat-view
//! suppression and carries no authority.

use std::fmt;

use uuid::Uuid;

use super::error::DomainError;

pub const VISITOR_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitorId(String);

impl VisitorId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..VISITOR_ID_LEN].to_string())
    }

    /// Accept a previously persisted identifier.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() != VISITOR_ID_LEN
            || !trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DomainError::validation(format!(
                "visitor id `{trimmed}` is not {VISITOR_ID_LEN} lowercase hex characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
