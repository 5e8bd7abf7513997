use std::time::Instant;

use tracing::{debug, info};

use crate::archive::{ArchiveEntry, ArchiveSink, ArchiveSource};
use crate::copy::StreamCopier;
use crate::delta_format::{write_model, DELTA_MODEL_ENTRY};
use crate::digest::{digest_value_of, MessageDigest};
use crate::error::{DeltaError, Result};
use crate::model::{DeltaModel, EntryDigest, EntryDigestPair};

/// Compares a base archive with an update archive.
///
/// Only the content of non-directory entries is compared. The resulting
/// model does not depend on either archive's iteration order.
pub struct ArchiveDiff<'a> {
    base: &'a dyn ArchiveSource,
    update: &'a dyn ArchiveSource,
    digest: MessageDigest,
    copier: Option<StreamCopier>,
}

impl<'a> ArchiveDiff<'a> {
    pub fn new(base: &'a dyn ArchiveSource, update: &'a dyn ArchiveSource) -> Self {
        Self {
            base,
            update,
            digest: MessageDigest::default(),
            copier: None,
        }
    }

    /// Selects the digest used to identify entry content. Defaults to SHA-1.
    pub fn digest(mut self, digest: MessageDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Uses `copier` for payload copies instead of a private one.
    pub fn copier(mut self, copier: StreamCopier) -> Self {
        self.copier = Some(copier);
        self
    }

    fn digest_of(&mut self, source: &dyn ArchiveSource, entry: &ArchiveEntry) -> Result<String> {
        let reader = source.reader(entry)?;
        Ok(digest_value_of(&mut self.digest, reader)?)
    }

    /// Classifies every non-directory entry of both archives.
    pub fn to_model(&mut self) -> Result<DeltaModel> {
        let (base, update) = (self.base, self.update);
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for entry in base.entries()? {
            if entry.directory {
                continue;
            }
            let base_digest = self.digest_of(base, &entry)?;
            match update.entry(&entry.name)? {
                Some(counterpart) if !counterpart.directory => {
                    let update_digest = self.digest_of(update, &counterpart)?;
                    if base_digest == update_digest {
                        unchanged.push(EntryDigest::new(entry.name, base_digest));
                    } else {
                        debug_assert_ne!(base_digest, update_digest);
                        changed.push(EntryDigestPair::new(entry.name, base_digest, update_digest));
                    }
                }
                _ => removed.push(EntryDigest::new(entry.name, base_digest)),
            }
        }

        for entry in update.entries()? {
            if entry.directory {
                continue;
            }
            let known = matches!(base.entry(&entry.name)?, Some(counterpart) if !counterpart.directory);
            if !known {
                let digest = self.digest_of(update, &entry)?;
                added.push(EntryDigest::new(entry.name, digest));
            }
        }

        DeltaModel::builder()
            .message_digest(&self.digest)
            .changed_entries(changed)
            .unchanged_entries(unchanged)
            .added_entries(added)
            .removed_entries(removed)
            .build()
    }

    /// Computes the model and writes the delta archive to `sink`: the model
    /// entry first, then the content of every changed or added update entry.
    /// The sink is finished on success.
    pub fn to(&mut self, sink: &mut dyn ArchiveSink) -> Result<DeltaModel> {
        let started = Instant::now();
        let model = self.to_model()?;

        if model.is_changed_or_added(DELTA_MODEL_ENTRY) {
            return Err(DeltaError::ReservedEntryName(DELTA_MODEL_ENTRY.to_string()));
        }

        let copier = match &self.copier {
            Some(copier) => copier.clone(),
            None => StreamCopier::shared()?,
        };

        write_model(sink, &model)?;

        let mut payload = 0u64;
        for entry in self.update.entries()? {
            if entry.directory || !model.is_changed_or_added(&entry.name) {
                continue;
            }
            let mut reader = self.update.reader(&entry)?;
            let mut writer = sink.create(&entry.name)?;
            let bytes = copier.copy(&mut reader, &mut writer)?;
            writer.commit()?;
            debug!(entry = %entry.name, bytes, "copied delta entry");
            payload += bytes;
        }
        sink.finish()?;

        let summary = model.summary();
        info!(
            changed = summary.changed,
            unchanged = summary.unchanged,
            added = summary.added,
            removed = summary.removed,
            payload,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote delta archive"
        );
        Ok(model)
    }
}
