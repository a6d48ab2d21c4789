use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Short opaque identifier chosen by the manifest author, e.g. `"alpha"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::borrow::Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A single manifest entry: where to fetch a module's compiled bytecode from, the digest it must
/// hash to, and the ids that must be linked before it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub url: String,
    pub sha256: Digest,
    #[serde(rename = "dependsOnIds", default)]
    pub depends_on_ids: Vec<ModuleId>,
}

impl Module {
    pub fn new(url: impl Into<String>, sha256: Digest, depends_on_ids: Vec<ModuleId>) -> Self {
        Self {
            url: url.into(),
            sha256,
            depends_on_ids,
        }
    }
}
