//! Property-based tests over random in-memory archives:
//! - patching the base with the delta reproduces the update
//! - every entry name lands in exactly one classification
//! - the copy engine reproduces its input for any ring geometry

use std::collections::BTreeMap;

use archive_delta::archive::MemoryArchive;
use archive_delta::digest::digest_value_of;
use archive_delta::{diff, patch, ArchiveDiff, CopyConfig, MessageDigest, StreamCopier, DELTA_MODEL_ENTRY};
use proptest::prelude::*;

fn contents() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[a-d]{1,3}(/[a-d]{1,3})?",
        prop::collection::vec(0u8..4, 0..48),
        0..10,
    )
}

fn to_archive(contents: &BTreeMap<String, Vec<u8>>, reversed: bool) -> MemoryArchive {
    let mut archive = MemoryArchive::new();
    let mut entries: Vec<_> = contents.iter().collect();
    if reversed {
        entries.reverse();
    }
    for (name, data) in entries {
        archive.insert(name.clone(), data.clone());
    }
    archive
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_patch_reproduces_update(base in contents(), update in contents(), reversed: bool) {
        let base_archive = to_archive(&base, reversed);
        let update_archive = to_archive(&update, false);

        let mut delta = MemoryArchive::new();
        diff(&base_archive, &update_archive, &mut delta).unwrap();

        let mut output = MemoryArchive::new();
        let summary = patch(&base_archive, &delta, &mut output).unwrap();
        prop_assert_eq!(summary.unchanged + summary.changed + summary.added, update.len());

        let rebuilt: BTreeMap<String, Vec<u8>> = output.into_entries().into_iter().collect();
        prop_assert_eq!(rebuilt, update);
    }

    #[test]
    fn prop_names_partitioned(base in contents(), update in contents()) {
        let base_archive = to_archive(&base, false);
        let update_archive = to_archive(&update, false);
        let model = ArchiveDiff::new(&base_archive, &update_archive).to_model().unwrap();

        for (name, data) in &base {
            let hits = [
                model.unchanged(name).is_some(),
                model.changed(name).is_some(),
                model.removed(name).is_some(),
            ];
            prop_assert_eq!(hits.iter().filter(|&&hit| hit).count(), 1);
            prop_assert!(model.added(name).is_none());
            let fresh = digest_value_of(&mut MessageDigest::sha1(), &data[..]).unwrap();
            match update.get(name) {
                Some(other) if other == data => {
                    prop_assert_eq!(model.unchanged(name).map(|e| e.digest()), Some(fresh.as_str()));
                }
                Some(other) => {
                    let pair = model.changed(name).unwrap();
                    prop_assert_eq!(pair.base_digest(), fresh.as_str());
                    let update_fresh = digest_value_of(&mut MessageDigest::sha1(), &other[..]).unwrap();
                    prop_assert_eq!(pair.update_digest(), update_fresh.as_str());
                    prop_assert_ne!(pair.base_digest(), pair.update_digest());
                }
                None => prop_assert!(model.removed(name).is_some()),
            }
        }
        for name in update.keys().filter(|name| !base.contains_key(*name)) {
            prop_assert!(model.added(name).is_some());
        }

        let summary = model.summary();
        prop_assert_eq!(summary.unchanged + summary.changed + summary.removed, base.len());
        prop_assert_eq!(summary.unchanged + summary.changed + summary.added, update.len());
    }

    #[test]
    fn prop_delta_carries_changed_and_added_only(base in contents(), update in contents()) {
        let base_archive = to_archive(&base, false);
        let update_archive = to_archive(&update, false);
        let mut delta = MemoryArchive::new();
        let model = diff(&base_archive, &update_archive, &mut delta).unwrap();

        let names: Vec<&str> = delta.names().collect();
        prop_assert_eq!(names.first().copied(), Some(DELTA_MODEL_ENTRY));
        let summary = model.summary();
        prop_assert_eq!(names.len(), 1 + summary.changed + summary.added);
        for name in &names[1..] {
            prop_assert!(model.is_changed_or_added(name));
            prop_assert_eq!(delta.get(name), update.get(*name).map(Vec::as_slice));
        }
    }

    #[test]
    fn prop_copy_reproduces_input(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        slots in 2usize..6,
        buffer_size in 1usize..300,
    ) {
        let copier = StreamCopier::new(CopyConfig {
            slots,
            buffer_size,
            reader_threads: 1,
            ..CopyConfig::default()
        })
        .unwrap();
        let mut out = Vec::new();
        let copied = copier.copy(&mut &data[..], &mut out).unwrap();
        prop_assert_eq!(copied, data.len() as u64);
        prop_assert_eq!(out, data);
    }
}
