//! Query resolution: spoken plate → household
//!
//! The resolver owns the lookup policy. An exact read comes first; on a
//! definite miss it runs a keyword (containment) query in the same
//! collection. Store failures never escape: they become
//! [`Outcome::Failed`] so the caller always has something to say.
//!
//! Fallback order for the exact read:
//!
//! ```text
//! get(PreferLocal) ──hit──────────────────────────────► SingleExact
//!      │ miss
//!      ├─ served from cache and network online ─► get(ForceRemote) once
//!      │                                            ├─ hit ─► SingleExact
//!      │                                            └─ miss/error ─┐
//!      └─ otherwise ─────────────────────────────────────────────────┤
//!                                                                    ▼
//!                                            query(keywords contains key)
//! ```

pub mod ordinal;
pub mod reply;

use std::sync::Arc;

pub use ordinal::OrdinalTable;
pub use reply::Phrasebook;

use crate::normalize::{Normalizer, PlateKey};
use crate::store::{
    Connectivity, KEYWORDS_FIELD, Origin, PlateRecord, PlateStore, SourcePreference,
};

/// Most candidates read out in one disambiguation prompt
pub const DEFAULT_MAX_CANDIDATES: usize = 3;

/// One match offered to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Plate as stored
    pub external_id: String,
    /// Household the plate belongs to
    pub household_label: String,
    /// Free-form note, possibly empty
    pub note: String,
    /// Where the record was read from
    pub origin: Origin,
}

impl Candidate {
    /// Wrap a store record
    #[must_use]
    pub fn from_record(record: PlateRecord, origin: Origin) -> Self {
        Self {
            external_id: record.plate,
            household_label: record.household,
            note: record.note,
            origin,
        }
    }
}

/// Result of resolving one normalized key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key is a stored plate
    SingleExact(Candidate),
    /// Exactly one plate contains the key; read out as approximate
    SingleFuzzy(Candidate),
    /// A few plates contain the key; the user picks one by ordinal
    MultipleFuzzy(Vec<Candidate>),
    /// Too many plates contain the key to read out
    TooManyFuzzy(usize),
    /// Nothing matched
    NotFound,
    /// The store could not be read at all
    Failed(String),
}

impl Outcome {
    /// Candidates to hold for a follow-up ordinal reply
    #[must_use]
    pub fn pending(&self) -> &[Candidate] {
        match self {
            Self::MultipleFuzzy(candidates) => candidates,
            _ => &[],
        }
    }

    /// Short label for logs and status lines
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SingleExact(_) => "exact",
            Self::SingleFuzzy(_) => "approximate",
            Self::MultipleFuzzy(_) => "multiple",
            Self::TooManyFuzzy(_) => "too_many",
            Self::NotFound => "not_found",
            Self::Failed(_) => "failed",
        }
    }
}

/// Normalizes utterances and resolves them against a [`PlateStore`]
pub struct QueryResolver {
    normalizer: Normalizer,
    store: Arc<dyn PlateStore>,
    network: Arc<dyn Connectivity>,
    ordinals: OrdinalTable,
    max_candidates: usize,
}

impl QueryResolver {
    /// Create a resolver with the default ordinal table and candidate limit
    #[must_use]
    pub fn new(
        normalizer: Normalizer,
        store: Arc<dyn PlateStore>,
        network: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            normalizer,
            store,
            network,
            ordinals: OrdinalTable::default(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Replace the ordinal table
    #[must_use]
    pub fn with_ordinals(mut self, ordinals: OrdinalTable) -> Self {
        self.ordinals = ordinals;
        self
    }

    /// Normalize a raw transcript
    #[must_use]
    pub fn normalize(&self, raw: &str) -> PlateKey {
        self.normalizer.normalize(raw)
    }

    /// Resolve a normalized key in `collection`
    pub async fn resolve(&self, key: &PlateKey, collection: &str) -> Outcome {
        let exact = match self
            .store
            .get(collection, key.as_str(), SourcePreference::PreferLocal)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(collection, key = %key, error = %e, "exact lookup failed");
                return Outcome::Failed(e.to_string());
            }
        };

        if let Some(record) = exact.value {
            tracing::debug!(collection, key = %key, origin = ?exact.origin, "exact hit");
            return Outcome::SingleExact(Candidate::from_record(record, exact.origin));
        }

        if exact.origin == Origin::Local && self.network.is_online() {
            tracing::debug!(collection, key = %key, "cache miss while online, forcing remote read");
            match self
                .store
                .get(collection, key.as_str(), SourcePreference::ForceRemote)
                .await
            {
                Ok(fetched) => {
                    if let Some(record) = fetched.value {
                        return Outcome::SingleExact(Candidate::from_record(record, fetched.origin));
                    }
                }
                Err(e) => {
                    tracing::warn!(collection, key = %key, error = %e, "forced remote read failed, keeping cache miss");
                }
            }
        }

        self.fuzzy(key, collection).await
    }

    async fn fuzzy(&self, key: &PlateKey, collection: &str) -> Outcome {
        let found = match self
            .store
            .query(collection, KEYWORDS_FIELD, key.as_str(), SourcePreference::PreferLocal)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(collection, key = %key, error = %e, "fuzzy lookup failed");
                return Outcome::Failed(e.to_string());
            }
        };

        let origin = found.origin;
        let mut records = found.value;
        tracing::debug!(collection, key = %key, matches = records.len(), "fuzzy lookup");

        match records.len() {
            0 => Outcome::NotFound,
            1 => Outcome::SingleFuzzy(Candidate::from_record(records.remove(0), origin)),
            n if n <= self.max_candidates => Outcome::MultipleFuzzy(
                records
                    .into_iter()
                    .map(|r| Candidate::from_record(r, origin))
                    .collect(),
            ),
            n => Outcome::TooManyFuzzy(n),
        }
    }

    /// Zero-based position named by an ordinal reply, whether or not it is in range
    #[must_use]
    pub fn ordinal(&self, utterance: &str) -> Option<usize> {
        self.ordinals.position(utterance)
    }

    /// Pick a pending candidate by ordinal reply
    ///
    /// Returns `None` when the reply is not a recognized ordinal or names a
    /// position past the end of `pending`.
    #[must_use]
    pub fn select_candidate<'a>(
        &self,
        utterance: &str,
        pending: &'a [Candidate],
    ) -> Option<(usize, &'a Candidate)> {
        let index = self.ordinals.position(utterance)?;
        pending.get(index).map(|candidate| (index, candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalCache, TieredStore};

    fn resolver(records: &[(&str, &str)]) -> QueryResolver {
        let cache = LocalCache::in_memory().unwrap();
        let records: Vec<PlateRecord> = records
            .iter()
            .map(|(plate, household)| PlateRecord::new(plate, household, "", 2))
            .collect();
        cache.store_collection("lige", &records, "import").unwrap();

        let store = TieredStore::new(None, cache, 2);
        let network = store.network();
        QueryResolver::new(Normalizer::default(), Arc::new(store), network)
    }

    fn candidate(plate: &str) -> Candidate {
        Candidate {
            external_id: plate.to_string(),
            household_label: String::new(),
            note: String::new(),
            origin: Origin::Local,
        }
    }

    #[tokio::test]
    async fn test_exact_hit() {
        let resolver = resolver(&[("ABC1234", "A棟 3樓")]);
        let key = resolver.normalize("abc-1234");
        match resolver.resolve(&key, "lige").await {
            Outcome::SingleExact(c) => {
                assert_eq!(c.household_label, "A棟 3樓");
                assert_eq!(c.origin, Origin::Local);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fuzzy_counts() {
        let resolver = resolver(&[
            ("AB8888", "A棟"),
            ("CD8888", "B棟"),
            ("EF1234", "C棟"),
            ("GH1234", "D棟"),
            ("JK1234", "E棟"),
            ("LM1234", "F棟"),
        ]);

        let single = resolver.resolve(&resolver.normalize("EF12"), "lige").await;
        assert!(matches!(single, Outcome::SingleFuzzy(ref c) if c.external_id == "EF1234"));

        let multiple = resolver.resolve(&resolver.normalize("四個八"), "lige").await;
        assert_eq!(multiple.pending().len(), 2);

        let too_many = resolver.resolve(&resolver.normalize("1234"), "lige").await;
        assert_eq!(too_many, Outcome::TooManyFuzzy(4));

        let none = resolver.resolve(&resolver.normalize("ZZ99"), "lige").await;
        assert_eq!(none, Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_uncached_collection_fails() {
        let resolver = resolver(&[("ABC1234", "A棟")]);
        let outcome = resolver.resolve(&resolver.normalize("ABC1234"), "baoge").await;
        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[test]
    fn test_select_candidate() {
        let resolver = resolver(&[]);
        let pending = vec![candidate("A1"), candidate("B2"), candidate("C3")];

        let (index, chosen) = resolver.select_candidate("second", &pending).unwrap();
        assert_eq!(index, 1);
        assert_eq!(chosen.external_id, "B2");

        assert!(resolver.select_candidate("第三個", &pending[..2]).is_none());
        assert!(resolver.select_candidate("ABC1234", &pending).is_none());
        assert!(resolver.select_candidate("第一", &[]).is_none());
    }

    #[test]
    fn test_ordinal_recognized_past_pending() {
        let resolver = resolver(&[]);
        assert_eq!(resolver.ordinal("third"), Some(2));
        assert_eq!(resolver.ordinal("3"), Some(2));
        assert_eq!(resolver.ordinal("ABC1234"), None);
    }
}
