use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{is_directory_name, validate_entry_name, ArchiveEntry, ArchiveSink, ArchiveSource, EntryWriter};

/// A directory tree viewed as an archive.
///
/// Entry names are relative paths with forward slashes for cross-platform
/// consistency; directories carry a trailing `/`.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        validate_entry_name(name)?;
        let relative = name.strip_suffix('/').unwrap_or(name);
        Ok(relative.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    fn relativize(&self, path: &Path) -> io::Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Path outside of archive root: {}", path.display()),
            )
        })?;
        let relative = relative.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Non-UTF8 path: {}", relative.display()),
            )
        })?;
        Ok(relative.replace('\\', "/"))
    }
}

impl ArchiveSource for DirectoryArchive {
    fn entries(&self) -> io::Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let name = self.relativize(entry.path())?;

            if entry.file_type().is_dir() {
                entries.push(ArchiveEntry::directory(format!("{name}/")));
            } else {
                let meta = entry.metadata().map_err(io::Error::from)?;
                entries.push(ArchiveEntry::file(name, meta.len()));
            }
        }

        Ok(entries)
    }

    fn entry(&self, name: &str) -> io::Result<Option<ArchiveEntry>> {
        let path = self.resolve(name)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            // A parent that is now a file hides the entry like a missing one.
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let bare = name.strip_suffix('/').unwrap_or(name);
        if meta.is_dir() {
            Ok(Some(ArchiveEntry::directory(format!("{bare}/"))))
        } else if is_directory_name(name) {
            Ok(None)
        } else {
            Ok(Some(ArchiveEntry::file(bare, meta.len())))
        }
    }

    fn reader(&self, entry: &ArchiveEntry) -> io::Result<Box<dyn Read + Send + '_>> {
        if entry.directory {
            return Ok(Box::new(io::empty()));
        }
        let file = File::open(self.resolve(&entry.name)?)?;
        Ok(Box::new(BufReader::with_capacity(256 * 1024, file)))
    }
}

impl ArchiveSink for DirectoryArchive {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn EntryWriter + '_>> {
        let path = self.resolve(name)?;
        if is_directory_name(name) {
            fs::create_dir_all(&path)?;
            return Ok(Box::new(DirectoryEntryWriter { target: None }));
        }
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let file = NamedTempFile::new_in(parent)?;
        Ok(Box::new(DirectoryEntryWriter {
            target: Some((file, path)),
        }))
    }
}

/// Writes into a temporary file next to the target and renames it into place
/// on commit.
struct DirectoryEntryWriter {
    target: Option<(NamedTempFile, PathBuf)>,
}

impl Write for DirectoryEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.target {
            Some((file, _)) => file.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Directory entry cannot hold content",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            Some((file, _)) => file.flush(),
            None => Ok(()),
        }
    }
}

impl EntryWriter for DirectoryEntryWriter {
    fn commit(self: Box<Self>) -> io::Result<()> {
        if let Some((mut file, path)) = self.target {
            file.flush()?;
            file.persist(&path).map_err(|e| e.error)?;
        }
        Ok(())
    }
}
