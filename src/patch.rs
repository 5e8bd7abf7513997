use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;

use tracing::{debug, info};

use crate::archive::{is_directory_name, ArchiveSink, ArchiveSource, EntryWriter, MANIFEST_NAME};
use crate::copy::StreamCopier;
use crate::delta_format::read_model;
use crate::digest::MessageDigest;
use crate::error::{DeltaError, Result};
use crate::model::{DeltaModel, EntryDigest};

/// Entry counts of a completed patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub added: usize,
    /// Base entries left out of the output.
    pub removed: usize,
}

/// Selects the entry names written in one output pass. Directory names are
/// never accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassFilter {
    All,
    Only(&'static str),
    Except(&'static str),
}

impl PassFilter {
    pub fn accepts(&self, name: &str) -> bool {
        if is_directory_name(name) {
            return false;
        }
        match *self {
            PassFilter::All => true,
            PassFilter::Only(only) => name == only,
            PassFilter::Except(except) => name != except,
        }
    }

    /// Passes needed for a sink: manifest first for JAR-like sinks.
    pub fn passes_for(sink: &dyn ArchiveSink) -> &'static [PassFilter] {
        const SINGLE: &[PassFilter] = &[PassFilter::All];
        const MANIFEST_FIRST: &[PassFilter] =
            &[PassFilter::Only(MANIFEST_NAME), PassFilter::Except(MANIFEST_NAME)];
        if sink.requires_manifest_first() {
            MANIFEST_FIRST
        } else {
            SINGLE
        }
    }
}

/// Digests everything written through it and commits the output entry
/// only if the digest matches.
struct DigestWriter<'w, 'd> {
    inner: Box<dyn EntryWriter + 'w>,
    digest: &'d mut MessageDigest,
}

impl Write for DigestWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl DigestWriter<'_, '_> {
    fn finish(self, expected: &EntryDigest) -> Result<()> {
        if self.digest.finalize_value() != expected.digest() {
            return Err(DeltaError::WrongMessageDigest {
                name: expected.name().to_string(),
            });
        }
        self.inner.commit()?;
        Ok(())
    }
}

/// Attributes entry-level failures to the archive they came from. Other
/// errors pass through unchanged.
fn blame(error: DeltaError, side: fn(DeltaError) -> DeltaError) -> DeltaError {
    match error {
        DeltaError::MissingArchiveEntry { .. } | DeltaError::WrongMessageDigest { .. } => side(error),
        other => other,
    }
}

/// Rebuilds an update archive from a base archive and a delta archive.
pub struct ArchivePatch<'a> {
    base: &'a dyn ArchiveSource,
    delta: &'a dyn ArchiveSource,
    copier: Option<StreamCopier>,
    model: OnceLock<DeltaModel>,
}

impl<'a> ArchivePatch<'a> {
    pub fn new(base: &'a dyn ArchiveSource, delta: &'a dyn ArchiveSource) -> Self {
        Self {
            base,
            delta,
            copier: None,
            model: OnceLock::new(),
        }
    }

    pub fn copier(mut self, copier: StreamCopier) -> Self {
        self.copier = Some(copier);
        self
    }

    /// The model stored in the delta archive, decoded on first use.
    pub fn model(&self) -> Result<&DeltaModel> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let model = read_model(self.delta)?;
        Ok(self.model.get_or_init(|| model))
    }

    /// Writes the update archive to `sink` and finishes it.
    ///
    /// Every output entry is digested as it is written and committed only
    /// when the digest matches the model. Failures caused by the base archive
    /// are [`DeltaError::WrongBaseArchive`], failures caused by the delta
    /// archive [`DeltaError::InvalidDeltaArchive`].
    pub fn to(&self, sink: &mut dyn ArchiveSink) -> Result<PatchSummary> {
        let started = Instant::now();
        let model = self.model()?;
        let mut digest = model.message_digest()?;
        let copier = match &self.copier {
            Some(copier) => copier.clone(),
            None => StreamCopier::shared()?,
        };

        let mut summary = PatchSummary {
            removed: model.removed_entries().len(),
            ..PatchSummary::default()
        };

        for filter in PassFilter::passes_for(sink) {
            debug!(?filter, "patch pass");

            for entry in model.unchanged_entries().filter(|e| filter.accepts(e.name())) {
                copy_entry(&copier, &mut digest, self.base, entry, sink)
                    .map_err(|e| blame(e, DeltaError::wrong_base))?;
                summary.unchanged += 1;
            }

            for pair in model.changed_entries().filter(|e| filter.accepts(e.name())) {
                copy_entry(&copier, &mut digest, self.delta, &pair.to_update(), sink)
                    .map_err(|e| blame(e, DeltaError::invalid_delta))?;
                summary.changed += 1;
            }

            for entry in model.added_entries().filter(|e| filter.accepts(e.name())) {
                copy_entry(&copier, &mut digest, self.delta, entry, sink)
                    .map_err(|e| blame(e, DeltaError::invalid_delta))?;
                summary.added += 1;
            }
        }
        sink.finish()?;

        info!(
            unchanged = summary.unchanged,
            changed = summary.changed,
            added = summary.added,
            removed = summary.removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "patched archive"
        );
        Ok(summary)
    }
}

fn copy_entry(
    copier: &StreamCopier,
    digest: &mut MessageDigest,
    source: &dyn ArchiveSource,
    expected: &EntryDigest,
    sink: &mut dyn ArchiveSink,
) -> Result<u64> {
    let entry = source
        .entry(expected.name())?
        .filter(|e| !e.directory)
        .ok_or_else(|| DeltaError::MissingArchiveEntry {
            name: expected.name().to_string(),
        })?;
    let mut reader = source.reader(&entry)?;

    digest.reset();
    let mut writer = DigestWriter {
        inner: sink.create(expected.name())?,
        digest,
    };
    let bytes = copier.copy(&mut reader, &mut writer)?;
    writer.finish(expected)?;
    debug!(entry = %expected.name(), bytes, "copied entry");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveEntry, MemoryArchive};
    use crate::delta_format::DELTA_MODEL_ENTRY;
    use crate::diff::ArchiveDiff;
    use std::cell::Cell;
    use std::io::Read;

    fn archive(files: &[(&str, &str)]) -> MemoryArchive {
        let mut archive = MemoryArchive::new();
        for (name, content) in files {
            archive.insert(*name, content.as_bytes().to_vec());
        }
        archive
    }

    fn delta_of(base: &MemoryArchive, update: &MemoryArchive) -> MemoryArchive {
        let mut delta = MemoryArchive::new();
        ArchiveDiff::new(base, update).to(&mut delta).unwrap();
        delta
    }

    fn sorted(archive: &MemoryArchive) -> Vec<(String, Vec<u8>)> {
        let mut entries = archive.clone().into_entries();
        entries.sort();
        entries
    }

    #[test]
    fn test_round_trip() {
        let base = archive(&[("META-INF/", ""), ("same", "x"), ("edit", "old"), ("gone", "bye")]);
        let update = archive(&[("same", "x"), ("edit", "new"), ("fresh", "hi")]);
        let delta = delta_of(&base, &update);

        let mut output = MemoryArchive::new();
        let summary = ArchivePatch::new(&base, &delta).to(&mut output).unwrap();

        assert_eq!(sorted(&output), sorted(&update));
        assert_eq!(
            summary,
            PatchSummary {
                unchanged: 1,
                changed: 1,
                added: 1,
                removed: 1
            }
        );
    }

    #[test]
    fn test_unchanged_then_changed_then_added() {
        let base = archive(&[("b", "1"), ("a", "2")]);
        let update = archive(&[("c", "3"), ("b", "1"), ("a", "4")]);
        let delta = delta_of(&base, &update);

        let mut output = MemoryArchive::new();
        ArchivePatch::new(&base, &delta).to(&mut output).unwrap();
        assert_eq!(output.names().collect::<Vec<_>>(), ["b", "a", "c"]);
    }

    #[test]
    fn test_manifest_comes_first_for_jar_sinks() {
        let base = archive(&[("a.class", "1"), (MANIFEST_NAME, "Manifest-Version: 1.0\n")]);
        let update = archive(&[
            ("a.class", "1"),
            ("b.class", "2"),
            (MANIFEST_NAME, "Manifest-Version: 1.0\nMain-Class: B\n"),
        ]);
        let delta = delta_of(&base, &update);

        let mut jar = MemoryArchive::jar();
        ArchivePatch::new(&base, &delta).to(&mut jar).unwrap();
        assert_eq!(jar.names().collect::<Vec<_>>(), [MANIFEST_NAME, "a.class", "b.class"]);

        // Without the JAR flag the changed manifest follows the unchanged entries.
        let mut plain = MemoryArchive::new();
        ArchivePatch::new(&base, &delta).to(&mut plain).unwrap();
        assert_eq!(plain.names().collect::<Vec<_>>(), ["a.class", MANIFEST_NAME, "b.class"]);
    }

    #[test]
    fn test_pass_filters_reject_directories() {
        assert!(!PassFilter::All.accepts("META-INF/"));
        assert!(!PassFilter::Except(MANIFEST_NAME).accepts("META-INF/"));
        assert!(PassFilter::Only(MANIFEST_NAME).accepts(MANIFEST_NAME));
        assert!(!PassFilter::Only(MANIFEST_NAME).accepts("a.class"));
        assert!(!PassFilter::Except(MANIFEST_NAME).accepts(MANIFEST_NAME));
        assert!(PassFilter::Except(MANIFEST_NAME).accepts("a.class"));
    }

    #[test]
    fn test_tampered_base_is_wrong_base() {
        let base = archive(&[("same", "x"), ("edit", "old")]);
        let update = archive(&[("same", "x"), ("edit", "new")]);
        let delta = delta_of(&base, &update);

        let tampered = archive(&[("same", "y"), ("edit", "old")]);
        let mut output = MemoryArchive::new();
        let err = ArchivePatch::new(&tampered, &delta).to(&mut output).unwrap_err();
        assert!(err.is_base_failure());
        assert!(matches!(
            err,
            DeltaError::WrongBaseArchive(cause)
                if matches!(*cause, DeltaError::WrongMessageDigest { ref name } if name == "same")
        ));
        assert!(output.get("same").is_none());
    }

    #[test]
    fn test_missing_base_entry_is_wrong_base() {
        let base = archive(&[("same", "x")]);
        let update = archive(&[("same", "x"), ("fresh", "1")]);
        let delta = delta_of(&base, &update);

        let err = ArchivePatch::new(&MemoryArchive::new(), &delta)
            .to(&mut MemoryArchive::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DeltaError::WrongBaseArchive(cause)
                if matches!(*cause, DeltaError::MissingArchiveEntry { ref name } if name == "same")
        ));
    }

    #[test]
    fn test_tampered_delta_is_invalid_delta() {
        let base = archive(&[("edit", "old")]);
        let update = archive(&[("edit", "new"), ("fresh", "1")]);
        let mut delta = delta_of(&base, &update);

        delta.get_mut("fresh").unwrap().push(b'!');
        let err = ArchivePatch::new(&base, &delta).to(&mut MemoryArchive::new()).unwrap_err();
        assert!(err.is_delta_failure());

        delta.remove("edit");
        let err = ArchivePatch::new(&base, &delta).to(&mut MemoryArchive::new()).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::InvalidDeltaArchive(cause)
                if matches!(*cause, DeltaError::MissingArchiveEntry { ref name } if name == "edit")
        ));
    }

    #[test]
    fn test_tampered_changed_payload_is_invalid_delta() {
        let base = archive(&[("same", "x"), ("edit", "old")]);
        let update = archive(&[("same", "x"), ("edit", "new")]);
        let mut delta = delta_of(&base, &update);

        delta.get_mut("edit").unwrap()[0] ^= 0x20;
        let mut output = MemoryArchive::new();
        let err = ArchivePatch::new(&base, &delta).to(&mut output).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::InvalidDeltaArchive(cause)
                if matches!(*cause, DeltaError::WrongMessageDigest { ref name } if name == "edit")
        ));
        assert!(output.get("edit").is_none());
    }

    #[test]
    fn test_missing_model_is_invalid_delta() {
        let base = archive(&[("a", "1")]);
        let mut output = MemoryArchive::new();
        let err = ArchivePatch::new(&base, &MemoryArchive::new()).to(&mut output).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::InvalidDeltaArchive(cause)
                if matches!(*cause, DeltaError::MissingArchiveEntry { ref name } if name == DELTA_MODEL_ENTRY)
        ));
        assert!(output.is_empty());
    }

    /// Counts how often the model entry is opened.
    struct CountingSource<'a> {
        inner: &'a MemoryArchive,
        model_reads: Cell<usize>,
    }

    impl ArchiveSource for CountingSource<'_> {
        fn entries(&self) -> io::Result<Vec<ArchiveEntry>> {
            self.inner.entries()
        }

        fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>> {
            self.inner.entry(name)
        }

        fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>> {
            if entry.name == DELTA_MODEL_ENTRY {
                self.model_reads.set(self.model_reads.get() + 1);
            }
            self.inner.reader(entry)
        }
    }

    #[test]
    fn test_model_is_decoded_once() {
        let base = archive(&[("a", "1")]);
        let update = archive(&[("a", "2")]);
        let delta = delta_of(&base, &update);
        let counting = CountingSource {
            inner: &delta,
            model_reads: Cell::new(0),
        };

        let patch = ArchivePatch::new(&base, &counting);
        let first = patch.model().unwrap().clone();
        patch.to(&mut MemoryArchive::new()).unwrap();
        patch.to(&mut MemoryArchive::new()).unwrap();
        assert_eq!(patch.model().unwrap(), &first);
        assert_eq!(counting.model_reads.get(), 1);
    }

    #[test]
    fn test_digest_writer_discards_on_mismatch() {
        let mut sink = MemoryArchive::new();
        let mut digest = MessageDigest::sha1();
        let mut writer = DigestWriter {
            inner: sink.create("a").unwrap(),
            digest: &mut digest,
        };
        writer.write_all(b"abc").unwrap();
        let err = writer.finish(&EntryDigest::new("a", "0")).unwrap_err();
        assert!(matches!(err, DeltaError::WrongMessageDigest { .. }));
        assert!(sink.is_empty());
    }
}
