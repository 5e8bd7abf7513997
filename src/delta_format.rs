use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveSink, ArchiveSource};
use crate::digest::MessageDigest;
use crate::error::{DeltaError, Result};
use crate::model::{DeltaModel, EntryDigest, EntryDigestPair};

/// Reserved entry of every delta archive holding the serialized model.
pub const DELTA_MODEL_ENTRY: &str = "META-INF/delta.json";

/// JSON document form of a [`DeltaModel`].
///
/// Empty collections and a default digest length are left out; absent fields
/// decode as empty.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaDocument {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<ChangedEntryDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unchanged: Vec<EntryDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<EntryDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<EntryDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDocument {
    pub name: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedEntryDocument {
    pub name: String,
    pub first: String,
    pub second: String,
}

impl From<&DeltaModel> for DeltaDocument {
    fn from(model: &DeltaModel) -> Self {
        DeltaDocument {
            algorithm: model.digest_algorithm_name().to_string(),
            num_bytes: model.digest_byte_length(),
            changed: model
                .changed_entries()
                .map(|e| ChangedEntryDocument {
                    name: e.name().to_string(),
                    first: e.base_digest().to_string(),
                    second: e.update_digest().to_string(),
                })
                .collect(),
            unchanged: entry_documents(model.unchanged_entries()),
            added: entry_documents(model.added_entries()),
            removed: entry_documents(model.removed_entries()),
        }
    }
}

fn entry_documents<'a>(entries: impl Iterator<Item = &'a EntryDigest>) -> Vec<EntryDocument> {
    entries
        .map(|e| EntryDocument {
            name: e.name().to_string(),
            digest: e.digest().to_string(),
        })
        .collect()
}

impl DeltaDocument {
    /// Rebuilds the model. The digest is reconstructed from its name alone,
    /// plus the byte length when one is recorded; a zero length counts as
    /// the default.
    pub fn into_model(self) -> Result<DeltaModel> {
        let digest =
            MessageDigest::for_name(&self.algorithm, self.num_bytes.filter(|&n| n != 0))?;
        let entries = |docs: Vec<EntryDocument>| {
            docs.into_iter()
                .map(|d| EntryDigest::new(d.name, d.digest))
                .collect::<Vec<_>>()
        };
        DeltaModel::builder()
            .message_digest(&digest)
            .changed_entries(
                self.changed
                    .into_iter()
                    .map(|d| EntryDigestPair::new(d.name, d.first, d.second)),
            )
            .unchanged_entries(entries(self.unchanged))
            .added_entries(entries(self.added))
            .removed_entries(entries(self.removed))
            .build()
    }
}

pub fn encode_model<W: Write>(model: &DeltaModel, writer: W) -> Result<()> {
    serde_json::to_writer(writer, &DeltaDocument::from(model))?;
    Ok(())
}

pub fn decode_model<R: Read>(reader: R) -> Result<DeltaModel> {
    let document: DeltaDocument = serde_json::from_reader(reader)?;
    document.into_model()
}

/// Writes the model to the reserved entry of a delta archive.
pub fn write_model(sink: &mut dyn ArchiveSink, model: &DeltaModel) -> Result<()> {
    let mut writer = sink.create(DELTA_MODEL_ENTRY)?;
    encode_model(model, &mut writer)?;
    writer.commit()?;
    Ok(())
}

/// Reads the model from the reserved entry of a delta archive.
///
/// A missing or undecodable entry means the delta archive is invalid. An
/// unknown digest algorithm is reported as such.
pub fn read_model(source: &dyn ArchiveSource) -> Result<DeltaModel> {
    let entry = source.entry(DELTA_MODEL_ENTRY)?.ok_or_else(|| {
        DeltaError::MissingArchiveEntry {
            name: DELTA_MODEL_ENTRY.to_string(),
        }
        .invalid_delta()
    })?;
    let reader = source.reader(&entry)?;
    decode_model(reader).map_err(|e| match e {
        DeltaError::Json(_)
        | DeltaError::InvalidModel(_)
        | DeltaError::UnsupportedDigestLength { .. } => e.invalid_delta(),
        other => other,
    })
}
