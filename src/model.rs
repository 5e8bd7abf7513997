//! The delta model: which entries changed, stayed, appeared or vanished
//! between a base and an update archive, keyed by entry name.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::digest::MessageDigest;
use crate::error::{DeltaError, Result};

/// An entry name and the digest value of its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryDigest {
    name: String,
    digest: String,
}

impl EntryDigest {
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// An entry name with its digest value in the base and in the update archive.
/// The two values differ for every well-formed model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryDigestPair {
    name: String,
    base_digest: String,
    update_digest: String,
}

impl EntryDigestPair {
    pub fn new(
        name: impl Into<String>,
        base_digest: impl Into<String>,
        update_digest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_digest: base_digest.into(),
            update_digest: update_digest.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_digest(&self) -> &str {
        &self.base_digest
    }

    pub fn update_digest(&self) -> &str {
        &self.update_digest
    }

    /// The update side as a plain entry digest.
    pub fn to_update(&self) -> EntryDigest {
        EntryDigest::new(self.name.clone(), self.update_digest.clone())
    }
}

/// Entry counts per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
}

/// Immutable result of comparing two archives.
///
/// The four name sets are pairwise disjoint. Maps are ordered by entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeltaModel {
    digest_algorithm_name: String,
    digest_byte_length: Option<usize>,
    changed: BTreeMap<String, EntryDigestPair>,
    unchanged: BTreeMap<String, EntryDigest>,
    added: BTreeMap<String, EntryDigest>,
    removed: BTreeMap<String, EntryDigest>,
}

impl DeltaModel {
    pub fn builder() -> DeltaModelBuilder {
        DeltaModelBuilder::default()
    }

    pub fn digest_algorithm_name(&self) -> &str {
        &self.digest_algorithm_name
    }

    /// Present only if the digest length differs from the algorithm's default.
    pub fn digest_byte_length(&self) -> Option<usize> {
        self.digest_byte_length
    }

    /// A fresh digest instance matching the one the model was built with.
    pub fn message_digest(&self) -> Result<MessageDigest> {
        MessageDigest::for_name(&self.digest_algorithm_name, self.digest_byte_length)
    }

    pub fn changed_entries(&self) -> impl ExactSizeIterator<Item = &EntryDigestPair> {
        self.changed.values()
    }

    pub fn changed(&self, name: &str) -> Option<&EntryDigestPair> {
        self.changed.get(name)
    }

    pub fn unchanged_entries(&self) -> impl ExactSizeIterator<Item = &EntryDigest> {
        self.unchanged.values()
    }

    pub fn unchanged(&self, name: &str) -> Option<&EntryDigest> {
        self.unchanged.get(name)
    }

    pub fn added_entries(&self) -> impl ExactSizeIterator<Item = &EntryDigest> {
        self.added.values()
    }

    pub fn added(&self, name: &str) -> Option<&EntryDigest> {
        self.added.get(name)
    }

    pub fn removed_entries(&self) -> impl ExactSizeIterator<Item = &EntryDigest> {
        self.removed.values()
    }

    pub fn removed(&self, name: &str) -> Option<&EntryDigest> {
        self.removed.get(name)
    }

    /// True if the delta archive carries the content of this entry.
    pub fn is_changed_or_added(&self, name: &str) -> bool {
        self.changed.contains_key(name) || self.added.contains_key(name)
    }

    pub fn summary(&self) -> DeltaSummary {
        DeltaSummary {
            changed: self.changed.len(),
            unchanged: self.unchanged.len(),
            added: self.added.len(),
            removed: self.removed.len(),
        }
    }
}

/// Builder for [`DeltaModel`]. Collections default to empty, the digest to SHA-1.
#[derive(Debug, Default)]
pub struct DeltaModelBuilder {
    digest: Option<(String, Option<usize>)>,
    changed: Vec<EntryDigestPair>,
    unchanged: Vec<EntryDigest>,
    added: Vec<EntryDigest>,
    removed: Vec<EntryDigest>,
}

impl DeltaModelBuilder {
    pub fn message_digest(mut self, digest: &MessageDigest) -> Self {
        let length = (!digest.has_default_length()).then(|| digest.digest_length());
        self.digest = Some((digest.algorithm().name().to_string(), length));
        self
    }

    pub fn changed_entries(mut self, entries: impl IntoIterator<Item = EntryDigestPair>) -> Self {
        self.changed = entries.into_iter().collect();
        self
    }

    pub fn unchanged_entries(mut self, entries: impl IntoIterator<Item = EntryDigest>) -> Self {
        self.unchanged = entries.into_iter().collect();
        self
    }

    pub fn added_entries(mut self, entries: impl IntoIterator<Item = EntryDigest>) -> Self {
        self.added = entries.into_iter().collect();
        self
    }

    pub fn removed_entries(mut self, entries: impl IntoIterator<Item = EntryDigest>) -> Self {
        self.removed = entries.into_iter().collect();
        self
    }

    /// Validates and freezes the model.
    pub fn build(self) -> Result<DeltaModel> {
        let (digest_algorithm_name, digest_byte_length) = match self.digest {
            Some(digest) => digest,
            None => (MessageDigest::sha1().algorithm().name().to_string(), None),
        };

        for pair in &self.changed {
            if pair.base_digest == pair.update_digest {
                return Err(DeltaError::InvalidModel(format!(
                    "changed entry {} has equal digests",
                    pair.name
                )));
            }
        }

        let mut claimed: BTreeMap<&str, &'static str> = BTreeMap::new();
        let names = self
            .changed
            .iter()
            .map(|e| (e.name(), "changed"))
            .chain(self.unchanged.iter().map(|e| (e.name(), "unchanged")))
            .chain(self.added.iter().map(|e| (e.name(), "added")))
            .chain(self.removed.iter().map(|e| (e.name(), "removed")));
        for (name, set) in names {
            match claimed.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(set);
                }
                Entry::Occupied(slot) if *slot.get() == set => {
                    return Err(DeltaError::InvalidModel(format!("entry {} is {} twice", name, set)));
                }
                Entry::Occupied(slot) => {
                    return Err(DeltaError::InvalidModel(format!(
                        "entry {} is both {} and {}",
                        name,
                        slot.get(),
                        set
                    )));
                }
            }
        }

        Ok(DeltaModel {
            digest_algorithm_name,
            digest_byte_length,
            changed: self
                .changed
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            unchanged: by_name(self.unchanged),
            added: by_name(self.added),
            removed: by_name(self.removed),
        })
    }
}

fn by_name(entries: Vec<EntryDigest>) -> BTreeMap<String, EntryDigest> {
    entries.into_iter().map(|e| (e.name.clone(), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    fn sample() -> DeltaModel {
        DeltaModel::builder()
            .message_digest(&MessageDigest::sha1())
            .changed_entries([EntryDigestPair::new("b.txt", "1", "2")])
            .unchanged_entries([EntryDigest::new("a.txt", "3")])
            .added_entries([EntryDigest::new("c.txt", "4")])
            .removed_entries([EntryDigest::new("d.txt", "5")])
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookups() {
        let model = sample();
        assert_eq!(model.digest_algorithm_name(), "SHA-1");
        assert_eq!(model.digest_byte_length(), None);
        assert_eq!(model.changed("b.txt").unwrap().update_digest(), "2");
        assert_eq!(model.unchanged("a.txt").unwrap().digest(), "3");
        assert_eq!(model.added("c.txt").unwrap().digest(), "4");
        assert_eq!(model.removed("d.txt").unwrap().digest(), "5");
        assert!(model.changed("a.txt").is_none());
        assert!(model.is_changed_or_added("b.txt"));
        assert!(model.is_changed_or_added("c.txt"));
        assert!(!model.is_changed_or_added("a.txt"));
        assert!(!model.is_changed_or_added("d.txt"));
    }

    #[test]
    fn test_entries_ordered_by_name() {
        let model = DeltaModel::builder()
            .unchanged_entries([
                EntryDigest::new("z", "1"),
                EntryDigest::new("a", "2"),
                EntryDigest::new("m/n", "3"),
            ])
            .build()
            .unwrap();
        let names: Vec<_> = model.unchanged_entries().map(|e| e.name()).collect();
        assert_eq!(names, ["a", "m/n", "z"]);
    }

    #[test]
    fn test_equality_covers_all_state() {
        assert_eq!(sample(), sample());

        let other_digest = DeltaModel::builder()
            .message_digest(&MessageDigest::new(Algorithm::Sha256))
            .changed_entries([EntryDigestPair::new("b.txt", "1", "2")])
            .unchanged_entries([EntryDigest::new("a.txt", "3")])
            .added_entries([EntryDigest::new("c.txt", "4")])
            .removed_entries([EntryDigest::new("d.txt", "5")])
            .build()
            .unwrap();
        assert_ne!(sample(), other_digest);

        let fewer = DeltaModel::builder()
            .message_digest(&MessageDigest::sha1())
            .changed_entries([EntryDigestPair::new("b.txt", "1", "2")])
            .build()
            .unwrap();
        assert_ne!(sample(), fewer);
    }

    #[test]
    fn test_default_digest_is_sha1() {
        let model = DeltaModel::builder().build().unwrap();
        assert_eq!(model.digest_algorithm_name(), "SHA-1");
        assert_eq!(model.summary(), DeltaSummary::default());
    }

    #[test]
    fn test_non_default_length_recorded() {
        let digest = MessageDigest::with_length(Algorithm::Blake3, 16).unwrap();
        let model = DeltaModel::builder().message_digest(&digest).build().unwrap();
        assert_eq!(model.digest_algorithm_name(), "BLAKE3");
        assert_eq!(model.digest_byte_length(), Some(16));
        assert_eq!(model.message_digest().unwrap().digest_length(), 16);
    }

    #[test]
    fn test_changed_with_equal_digests_rejected() {
        let err = DeltaModel::builder()
            .changed_entries([EntryDigestPair::new("x", "7", "7")])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidModel(msg) if msg.contains("x")));
    }

    #[test]
    fn test_overlapping_sets_rejected() {
        let err = DeltaModel::builder()
            .unchanged_entries([EntryDigest::new("x", "1")])
            .removed_entries([EntryDigest::new("x", "1")])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidModel(_)));
    }

    #[test]
    fn test_repeated_name_in_one_set_rejected() {
        let err = DeltaModel::builder()
            .added_entries([EntryDigest::new("x", "1"), EntryDigest::new("x", "2")])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidModel(ref msg) if msg.contains("added twice")));

        let err = DeltaModel::builder()
            .changed_entries([EntryDigestPair::new("y", "1", "2"), EntryDigestPair::new("y", "1", "3")])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidModel(ref msg) if msg.contains("y")));
    }

    #[test]
    fn test_summary_counts() {
        let summary = sample().summary();
        assert_eq!(
            summary,
            DeltaSummary {
                changed: 1,
                unchanged: 1,
                added: 1,
                removed: 1
            }
        );
    }
}
