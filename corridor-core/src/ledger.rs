//! Deduplication ledger.
//!
//! The ledger remembers the content hash last admitted for every feature
//! identity. It is owned by a single writer: the orchestrating thread
//! admits features one at a time in a deterministic order, so two
//! versions of the same identity can never race.

use std::collections::{BTreeMap, btree_map::Entry};

use serde::{Deserialize, Serialize};

use crate::{ContentHash, FeatureId, WorkingFeature};

/// An identity and the content hash it was last admitted with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Feature identity.
    pub id: FeatureId,
    /// Hash of the admitted content.
    pub content_hash: ContentHash,
}

/// Decision returned by [`DedupLedger::admit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    /// First time this identity has been seen.
    AcceptedNew,
    /// The identity was known with different content, which is replaced.
    Superseded {
        /// Hash of the replaced content.
        previous: ContentHash,
    },
    /// The identity was known with identical content.
    Duplicate,
}

impl Admission {
    /// Whether the feature's content was recorded by this admission.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Where a ledger entry's current content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Loaded from a previous run's persisted identities.
    PriorRun,
    /// Admitted during this run.
    CurrentRun,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    hash: ContentHash,
    origin: Origin,
}

/// Tracks which feature identities have contributed, and with what content.
///
/// # Examples
///
/// ```
/// use corridor_core::{Admission, ContentHash, DedupLedger, DedupRecord, FeatureId};
///
/// let prior = DedupRecord {
///     id: FeatureId::new("main").unwrap(),
///     content_hash: ContentHash::from_hex("abc"),
/// };
/// let mut ledger = DedupLedger::seeded([prior.clone()]);
/// assert_eq!(ledger.admit_record(&prior), Admission::Duplicate);
/// assert!(ledger.was_seeded(&prior.id));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DedupLedger {
    entries: BTreeMap<FeatureId, LedgerEntry>,
}

impl DedupLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger seeded with identities persisted by earlier runs.
    #[must_use]
    pub fn seeded(prior: impl IntoIterator<Item = DedupRecord>) -> Self {
        let entries = prior
            .into_iter()
            .map(|record| {
                (
                    record.id,
                    LedgerEntry {
                        hash: record.content_hash,
                        origin: Origin::PriorRun,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Admit a working feature.
    pub fn admit(&mut self, feature: &WorkingFeature) -> Admission {
        self.admit_parts(feature.id(), feature.content_hash())
    }

    /// Admit an identity/hash pair directly.
    pub fn admit_record(&mut self, record: &DedupRecord) -> Admission {
        self.admit_parts(&record.id, &record.content_hash)
    }

    fn admit_parts(&mut self, id: &FeatureId, hash: &ContentHash) -> Admission {
        match self.entries.entry(id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(LedgerEntry {
                    hash: hash.clone(),
                    origin: Origin::CurrentRun,
                });
                Admission::AcceptedNew
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.hash == *hash {
                    Admission::Duplicate
                } else {
                    let previous = std::mem::replace(&mut entry.hash, hash.clone());
                    entry.origin = Origin::CurrentRun;
                    Admission::Superseded { previous }
                }
            }
        }
    }

    /// Whether the identity's current content was loaded from a prior run.
    #[must_use]
    pub fn was_seeded(&self, id: &FeatureId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.origin == Origin::PriorRun)
    }

    /// Current hash recorded for `id`.
    #[must_use]
    pub fn content_hash(&self, id: &FeatureId) -> Option<&ContentHash> {
        self.entries.get(id).map(|entry| &entry.hash)
    }

    /// Number of identities known to the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger knows no identities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records admitted or superseded during this run, ordered by identity.
    pub fn changed_records(&self) -> impl Iterator<Item = DedupRecord> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.origin == Origin::CurrentRun)
            .map(|(id, entry)| DedupRecord {
                id: id.clone(),
                content_hash: entry.hash.clone(),
            })
    }
}
