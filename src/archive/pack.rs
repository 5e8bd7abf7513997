//! Single-file archive container.
//!
//! Layout: 8-byte magic, then a zstd stream holding the bincode encoding of
//! the ordered entry list. The whole archive is held in memory while open and
//! written out by [`ArchiveSink::finish`].

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{ArchiveEntry, ArchiveSink, ArchiveSource, EntryWriter, MemoryArchive};

pub const MAGIC: &[u8; 8] = b"ADELTA01";
pub const FORMAT_VERSION: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Deserialize)]
struct PackManifest {
    version: u32,
    jar: bool,
    entries: Vec<PackEntry>,
}

#[derive(Debug, Deserialize)]
struct PackEntry {
    name: String,
    data: Vec<u8>,
}

// Borrowing twins of the above; bincode encodes both identically.
#[derive(Serialize)]
struct PackManifestRef<'a> {
    version: u32,
    jar: bool,
    entries: Vec<PackEntryRef<'a>>,
}

#[derive(Serialize)]
struct PackEntryRef<'a> {
    name: &'a str,
    data: &'a [u8],
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// An archive stored in a single pack file.
#[derive(Debug, Clone)]
pub struct PackArchive {
    path: PathBuf,
    contents: MemoryArchive,
}

impl PackArchive {
    /// Loads an existing pack file.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        if file.metadata()?.len() < MAGIC.len() as u64 {
            return Err(invalid(format!(
                "Invalid pack file {}: missing magic header",
                path.display()
            )));
        }

        // SAFETY: We only read from this mapping; the pack file is not modified while open.
        let raw = unsafe { Mmap::map(&file)? };
        if &raw[..MAGIC.len()] != MAGIC {
            return Err(invalid(format!(
                "Invalid pack file {}: missing magic header",
                path.display()
            )));
        }

        let decoder = zstd::Decoder::new(&raw[MAGIC.len()..])?;
        let manifest: PackManifest = bincode::deserialize_from(decoder)
            .map_err(|e| invalid(format!("Failed to decode pack file {}: {e}", path.display())))?;

        if manifest.version != FORMAT_VERSION {
            return Err(invalid(format!(
                "Unsupported pack version: {} (expected {})",
                manifest.version, FORMAT_VERSION
            )));
        }

        debug!(path = %path.display(), entries = manifest.entries.len(), "opened pack file");
        let contents = MemoryArchive::from_entries(
            manifest.entries.into_iter().map(|e| (e.name, e.data)),
            manifest.jar,
        );
        Ok(Self { path, contents })
    }

    /// Starts a new, empty pack file which is written on `finish`.
    pub fn create(path: impl Into<PathBuf>, jar: bool) -> Self {
        let contents = if jar { MemoryArchive::jar() } else { MemoryArchive::new() };
        Self {
            path: path.into(),
            contents,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &MemoryArchive {
        &self.contents
    }

    fn write_to(&self, out: impl Write) -> io::Result<()> {
        let manifest = PackManifestRef {
            version: FORMAT_VERSION,
            jar: self.contents.is_jar(),
            entries: self
                .contents
                .iter()
                .map(|(name, data)| PackEntryRef { name, data })
                .collect(),
        };

        let mut out = out;
        out.write_all(MAGIC)?;
        let mut encoder = zstd::Encoder::new(out, COMPRESSION_LEVEL)?;
        bincode::serialize_into(&mut encoder, &manifest).map_err(|e| match *e {
            bincode::ErrorKind::Io(e) => e,
            other => io::Error::other(other.to_string()),
        })?;
        encoder.finish()?.flush()
    }
}

impl ArchiveSource for PackArchive {
    fn entries(&self) -> io::Result<Vec<ArchiveEntry>> {
        self.contents.entries()
    }

    fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>> {
        self.contents.entry(name)
    }

    fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>> {
        self.contents.reader(entry)
    }
}

impl ArchiveSink for PackArchive {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn EntryWriter + '_>> {
        self.contents.create(name)
    }

    fn requires_manifest_first(&self) -> bool {
        self.contents.is_jar()
    }

    fn finish(&mut self) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut file = NamedTempFile::new_in(&dir)?;
        self.write_to(BufWriter::new(file.as_file_mut()))?;
        file.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), entries = self.contents.len(), "wrote pack file");
        Ok(())
    }
}
