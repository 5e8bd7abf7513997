use std::collections::HashMap;
use std::io::{self, Read, Write};

use super::{is_directory_name, validate_entry_name, ArchiveEntry, ArchiveSink, ArchiveSource, EntryWriter};

/// An archive held in memory. Entries keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryArchive {
    entries: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
    jar: bool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// An archive which keeps its manifest entry first, like a JAR file.
    pub fn jar() -> Self {
        Self {
            jar: true,
            ..Self::default()
        }
    }

    pub fn is_jar(&self) -> bool {
        self.jar
    }

    pub fn set_jar(&mut self, jar: bool) {
        self.jar = jar;
    }

    /// Adds or replaces an entry. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> &mut Self {
        let name = name.into();
        let data = data.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = data,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, data));
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.index.get(name).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        let i = self.index.remove(name)?;
        let (_, data) = self.entries.remove(i);
        for (j, (entry_name, _)) in self.entries.iter().enumerate().skip(i) {
            self.index.insert(entry_name.clone(), j);
        }
        Some(data)
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(String, Vec<u8>)> {
        self.entries
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Vec<u8>)>, jar: bool) -> Self {
        let mut archive = Self {
            jar,
            ..Self::default()
        };
        for (name, data) in entries {
            archive.insert(name, data);
        }
        archive
    }

    fn to_entry(name: &str, data: &[u8]) -> ArchiveEntry {
        if is_directory_name(name) {
            ArchiveEntry::directory(name)
        } else {
            ArchiveEntry::file(name, data.len() as u64)
        }
    }
}

impl ArchiveSource for MemoryArchive {
    fn entries(&self) -> io::Result<Vec<ArchiveEntry>> {
        Ok(self
            .entries
            .iter()
            .map(|(name, data)| Self::to_entry(name, data))
            .collect())
    }

    fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>> {
        Ok(self.get(name).map(|data| Self::to_entry(name, data)))
    }

    fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>> {
        let data = self.get(&entry.name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No such entry: {}", entry.name),
            )
        })?;
        Ok(Box::new(data))
    }
}

impl ArchiveSink for MemoryArchive {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn EntryWriter + '_>> {
        validate_entry_name(name)?;
        Ok(Box::new(MemoryEntryWriter {
            archive: self,
            name: name.to_string(),
            buf: Vec::new(),
        }))
    }

    fn requires_manifest_first(&self) -> bool {
        self.jar
    }
}

struct MemoryEntryWriter<'a> {
    archive: &'a mut MemoryArchive,
    name: String,
    buf: Vec<u8>,
}

impl Write for MemoryEntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EntryWriter for MemoryEntryWriter<'_> {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let MemoryEntryWriter { archive, name, buf } = *self;
        if is_directory_name(&name) && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Directory entry cannot hold content: {name}"),
            ));
        }
        archive.insert(name, buf);
        Ok(())
    }
}
