//! Family-scoped cache and lock keys.
//!
//! A [`FamilyKey`] names every version of one prompt inside one project. Cache
//! keys can only be built from a family key, so every cached entry can be
//! swept by the family prefix.

use crate::constants::{CACHE_KEY_NAMESPACE, LOCK_KEY_NAMESPACE};
use crate::identity::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between key segments. Occurrences inside segments are escaped.
const SEPARATOR: char = ':';

/// Identity of a prompt family: (project_id, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyKey {
    project_id: ProjectId,
    name: String,
}

impl FamilyKey {
    pub fn new(project_id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the family's mutual-exclusion lock.
    pub fn lock_key(&self) -> String {
        format!(
            "{}{}{}{}{}",
            LOCK_KEY_NAMESPACE,
            SEPARATOR,
            escape(&self.project_id),
            SEPARATOR,
            escape(&self.name)
        )
    }

    /// Prefix shared by every cache key of this family.
    ///
    /// Ends with a separator, so no other family's keys share it.
    pub fn cache_prefix(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            CACHE_KEY_NAMESPACE,
            SEPARATOR,
            escape(&self.project_id),
            SEPARATOR,
            escape(&self.name),
            SEPARATOR
        )
    }

    pub fn version_key(&self, version: i32) -> CacheKey {
        CacheKey::new(self.clone(), CacheSlot::Version(version))
    }

    pub fn label_key(&self, label: impl Into<String>) -> CacheKey {
        CacheKey::new(self.clone(), CacheSlot::Label(label.into()))
    }
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.name)
    }
}

/// Which resolution of a family a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheSlot {
    Version(i32),
    Label(String),
}

/// Key of one cached prompt snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    family: FamilyKey,
    slot: CacheSlot,
}

impl CacheKey {
    pub fn new(family: FamilyKey, slot: CacheSlot) -> Self {
        Self { family, slot }
    }

    pub fn family(&self) -> &FamilyKey {
        &self.family
    }

    pub fn slot(&self) -> &CacheSlot {
        &self.slot
    }

    /// Encode as `prompt:<project>:<name>:version:<n>` or
    /// `prompt:<project>:<name>:label:<label>`.
    pub fn encode(&self) -> String {
        let mut key = self.family.cache_prefix();
        match &self.slot {
            CacheSlot::Version(v) => {
                key.push_str("version");
                key.push(SEPARATOR);
                key.push_str(&v.to_string());
            }
            CacheSlot::Label(l) => {
                key.push_str("label");
                key.push(SEPARATOR);
                key.push_str(&escape(l));
            }
        }
        key
    }

    /// Decode a key produced by [`CacheKey::encode`].
    ///
    /// Returns `None` for foreign namespaces or malformed segments.
    pub fn decode(encoded: &str) -> Option<Self> {
        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
        if parts.len() != 5 || parts[0] != CACHE_KEY_NAMESPACE {
            return None;
        }
        let family = FamilyKey::new(unescape(parts[1])?, unescape(parts[2])?);
        let slot = match parts[3] {
            "version" => CacheSlot::Version(parts[4].parse().ok()?),
            "label" => CacheSlot::Label(unescape(parts[4])?),
            _ => return None,
        };
        Some(Self { family, slot })
    }
}

fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace(SEPARATOR, "%3A")
}

fn unescape(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" => out.push(SEPARATOR),
            _ => return None,
        }
    }
    Some(out)
}
