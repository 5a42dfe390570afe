//! Application identifiers
//!
//! An [`AppId`] is an opaque token naming an application (a bundle
//! identifier on the host platform). Only equality is interpreted here;
//! stricter syntax checks belong to the platform layer.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Application identifier (trimmed, never empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

impl AppId {
    /// Create an identifier, trimming surrounding whitespace
    pub fn new(raw: &str) -> Result<Self, AppIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppIdError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppId {
    type Err = AppIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AppId {
    type Error = AppIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AppId> for String {
    fn from(id: AppId) -> Self {
        id.0
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets sets of AppId be probed with a plain &str.
impl Borrow<str> for AppId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppIdError {
    #[error("Application identifier is empty")]
    Empty,
}

/// Collect raw entries into a validated, deduplicated set.
///
/// Entries are trimmed; blank ones are dropped rather than failing the batch.
pub fn collect_apps<I, S>(entries: I) -> BTreeSet<AppId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| AppId::new(entry.as_ref()).ok())
        .collect()
}

/// Split a delimited list (`"a, b ,,c"`) into an app set
pub fn parse_app_list(raw: &str, separator: char) -> BTreeSet<AppId> {
    collect_apps(raw.split(separator))
}
