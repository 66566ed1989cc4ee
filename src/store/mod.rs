//! Plate record store
//!
//! The resolver talks to an opaque document store through [`PlateStore`].
//! [`TieredStore`] is the production implementation: a REST client for the
//! remote collection with a `SQLite` offline cache underneath.

mod cache;
mod remote;
mod schema;
mod tiered;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::LocalCache;
pub use remote::RemoteStore;
pub use schema::SCHEMA_VERSION;
pub use tiered::{NetworkMonitor, TieredStore};

use crate::Result;

/// Array field holding each record's precomputed search keywords
pub const KEYWORDS_FIELD: &str = "keywords";

/// Where a read was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Offline cache
    Local,
    /// Fresh read from the remote store
    Remote,
}

/// Read preference passed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePreference {
    /// Remote when reachable, otherwise the offline cache
    PreferLocal,
    /// Remote only; fails when unreachable
    ForceRemote,
}

/// One plate record as stored in a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateRecord {
    /// Normalized plate, also the document key
    pub plate: String,

    /// Household the plate belongs to (e.g. "A棟 3樓之1")
    pub household: String,

    /// Free-form note read out after the household
    #[serde(default)]
    pub note: String,

    /// Search keywords; computed from the plate when absent
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl PlateRecord {
    /// Create a record and derive its keyword set
    #[must_use]
    pub fn new(plate: &str, household: &str, note: &str, min_keyword_len: usize) -> Self {
        let mut record = Self {
            plate: plate.to_string(),
            household: household.to_string(),
            note: note.to_string(),
            keywords: Vec::new(),
        };
        record.ensure_keywords(min_keyword_len);
        record
    }

    /// Fill in the keyword set if the source did not provide one
    pub fn ensure_keywords(&mut self, min_keyword_len: usize) {
        if self.keywords.is_empty() {
            self.keywords = plate_keywords(&self.plate, min_keyword_len);
        }
    }
}

/// A store read tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    /// The value read
    pub value: T,
    /// Origin of the read, also for misses
    pub origin: Origin,
}

impl<T> Fetched<T> {
    /// Tag a value read from the offline cache
    pub const fn local(value: T) -> Self {
        Self {
            value,
            origin: Origin::Local,
        }
    }

    /// Tag a value read from the remote store
    pub const fn remote(value: T) -> Self {
        Self {
            value,
            origin: Origin::Remote,
        }
    }
}

/// Asynchronous key/value document store with an offline cache
#[async_trait]
pub trait PlateStore: Send + Sync {
    /// Exact lookup by document key
    ///
    /// # Errors
    ///
    /// Returns error if no source could serve the read
    async fn get(
        &self,
        collection: &str,
        key: &str,
        preference: SourcePreference,
    ) -> Result<Fetched<Option<PlateRecord>>>;

    /// Records whose array `field` contains `value`
    ///
    /// # Errors
    ///
    /// Returns error if no source could serve the query
    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        preference: SourcePreference,
    ) -> Result<Fetched<Vec<PlateRecord>>>;
}

/// Reports whether the network is currently usable
pub trait Connectivity: Send + Sync {
    /// Whether a remote read is expected to succeed
    fn is_online(&self) -> bool;
}

/// All contiguous substrings of a normalized plate at least `min_len` long
///
/// This is the precomputed keyword set that fuzzy lookup matches against:
/// a spoken fragment matches a record when it equals one of its keywords.
#[must_use]
pub fn plate_keywords(plate: &str, min_len: usize) -> Vec<String> {
    let chars: Vec<char> = plate.chars().collect();
    let min_len = min_len.max(1);
    let mut keywords = Vec::new();

    for start in 0..chars.len() {
        for end in (start + min_len)..=chars.len() {
            let keyword: String = chars[start..end].iter().collect();
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_keywords() {
        let keywords = plate_keywords("AB12", 2);
        assert_eq!(keywords, vec!["AB", "AB1", "AB12", "B1", "B12", "12"]);
    }

    #[test]
    fn test_plate_keywords_deduplicates() {
        let keywords = plate_keywords("8888", 2);
        assert_eq!(keywords, vec!["88", "888", "8888"]);
    }

    #[test]
    fn test_plate_keywords_shorter_than_min() {
        assert!(plate_keywords("A", 2).is_empty());
    }

    #[test]
    fn test_record_keeps_supplied_keywords() {
        let mut record: PlateRecord =
            serde_json::from_str(r#"{"plate":"ABC1234","household":"A棟","keywords":["1234"]}"#)
                .unwrap();
        record.ensure_keywords(2);
        assert_eq!(record.keywords, vec!["1234"]);
        assert!(record.note.is_empty());
    }

    #[test]
    fn test_record_derives_keywords() {
        let record = PlateRecord::new("XY9", "B棟", "", 2);
        assert_eq!(record.keywords, vec!["XY", "XY9", "Y9"]);
    }
}
