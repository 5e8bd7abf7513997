//! Named-entry archive abstractions consumed by the diff and patch engines.
//!
//! Backends keep their own entry metadata private; the engines only see
//! [`ArchiveEntry`] views, readers and committed writers.

mod directory;
mod memory;
mod pack;

pub use directory::DirectoryArchive;
pub use memory::MemoryArchive;
pub use pack::{PackArchive, MAGIC as PACK_MAGIC};

use std::io::{self, Read, Write};

/// Manifest entry which JAR readers expect to be the first or second entry.
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

/// Metadata view of an archive entry. Directory names end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub directory: bool,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            directory: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            directory: true,
        }
    }
}

/// Read access to the entries of an archive.
pub trait ArchiveSource {
    /// All entries, in the backend's iteration order.
    fn entries(&self) -> io::Result<Vec<ArchiveEntry>>;

    /// Looks up one entry. Absence is `Ok(None)`, not an error.
    fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>>;

    /// Opens the content of an entry. Directories read as empty.
    fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>>;
}

/// An entry being written. Content becomes part of the archive only once
/// [`EntryWriter::commit`] succeeds; dropping the writer discards it.
pub trait EntryWriter: Write {
    fn commit(self: Box<Self>) -> io::Result<()>;
}

/// Write access to an archive.
pub trait ArchiveSink {
    /// Starts a new entry with the given name.
    fn create(&mut self, name: &str) -> io::Result<Box<dyn EntryWriter + '_>>;

    /// True if the manifest entry must come first, as for JAR files.
    fn requires_manifest_first(&self) -> bool {
        false
    }

    /// Called once after the last entry has been committed.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ArchiveSource + ?Sized> ArchiveSource for &T {
    fn entries(&self) -> io::Result<Vec<ArchiveEntry>> {
        (**self).entries()
    }

    fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>> {
        (**self).entry(name)
    }

    fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>> {
        (**self).reader(entry)
    }
}

impl<T: ArchiveSink + ?Sized> ArchiveSink for &mut T {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn EntryWriter + '_>> {
        (**self).create(name)
    }

    fn requires_manifest_first(&self) -> bool {
        (**self).requires_manifest_first()
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// Checks that `name` is a normalized, relative, slash-separated entry name.
/// A single trailing `/` marks a directory.
pub fn validate_entry_name(name: &str) -> io::Result<()> {
    let invalid = |why: &str| {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid entry name {name:?}: {why}"),
        ))
    };
    if name.is_empty() {
        return invalid("empty");
    }
    if name.starts_with('/') {
        return invalid("absolute");
    }
    if name.contains('\\') {
        return invalid("backslash");
    }
    let path = name.strip_suffix('/').unwrap_or(name);
    for segment in path.split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            s if s.contains(':') && cfg!(windows) => return invalid("drive prefix"),
            _ => {}
        }
    }
    Ok(())
}

/// True if the name denotes a directory entry.
pub fn is_directory_name(name: &str) -> bool {
    name.ends_with('/')
}
