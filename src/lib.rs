//! Delta archives: compute the difference between two archives by entry
//! content digest and rebuild the newer archive from the older one plus the
//! delta.
//!
//! A delta archive holds a JSON model of the comparison under
//! [`DELTA_MODEL_ENTRY`] followed by the content of every changed or added
//! entry. Patching copies unchanged entries from the base archive and the
//! rest from the delta, verifying every digest as the output is written.

pub mod archive;
pub mod copy;
pub mod delta_format;
pub mod diff;
pub mod digest;
pub mod error;
pub mod model;
pub mod patch;

pub use archive::{ArchiveEntry, ArchiveSink, ArchiveSource, EntryWriter};
pub use copy::{copy_archive, CopyConfig, StreamCopier};
pub use delta_format::DELTA_MODEL_ENTRY;
pub use diff::ArchiveDiff;
pub use digest::{Algorithm, MessageDigest};
pub use error::{DeltaError, Result};
pub use model::{DeltaModel, EntryDigest, EntryDigestPair};
pub use patch::{ArchivePatch, PatchSummary};

/// Writes the delta from `base` to `update` into `delta` using SHA-1.
pub fn diff(
    base: &dyn ArchiveSource,
    update: &dyn ArchiveSource,
    delta: &mut dyn ArchiveSink,
) -> Result<DeltaModel> {
    ArchiveDiff::new(base, update).to(delta)
}

/// Rebuilds the update archive from `base` and `delta` into `output`.
pub fn patch(
    base: &dyn ArchiveSource,
    delta: &dyn ArchiveSource,
    output: &mut dyn ArchiveSink,
) -> Result<PatchSummary> {
    ArchivePatch::new(base, delta).to(output)
}
