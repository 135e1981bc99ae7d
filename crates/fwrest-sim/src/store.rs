//! File store rooted in a host directory
//!
//! Paths are relative to the root, `/` separated, and may not climb out of
//! it. Mounting with `create` creates the root; without it a missing root
//! stays unmounted, like an unformatted littlefs partition.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fwrest_core::{DirCursor, DirEntry, EntryKind, FileStore, StoreError, StoreFile};

pub struct DirStore {
    root: PathBuf,
    mounted: AtomicBool,
}

fn map_io(err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound,
        io::ErrorKind::AlreadyExists => StoreError::Exists,
        _ => StoreError::Io(err.to_string()),
    }
}

impl DirStore {
    /// Store rooted at `root`, initially unmounted
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        if !self.is_mounted() {
            return Err(StoreError::NotMounted);
        }
        let relative = Path::new(path.trim_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StoreError::Invalid(path.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }
}

impl FileStore for DirStore {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    fn mount(&self, create: bool) -> Result<(), StoreError> {
        if !self.root.is_dir() {
            if !create {
                return Err(StoreError::NotMounted);
            }
            fs::create_dir_all(&self.root).map_err(map_io)?;
            tracing::info!(root = %self.root.display(), "file store formatted");
        }
        self.mounted.store(true, Ordering::Release);
        tracing::debug!(root = %self.root.display(), "file store mounted");
        Ok(())
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        tracing::debug!(root = %self.root.display(), "file store unmounted");
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(StoreError::IsDir);
        }
        let file = File::open(&full).map_err(map_io)?;
        Ok(Box::new(HostFile { file }))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(StoreError::IsDir);
        }
        match full.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => return Err(StoreError::NotFound),
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .map_err(map_io)?;
        Ok(Box::new(HostFile { file }))
    }

    fn read_dir(&self, path: &str) -> Result<Box<dyn DirCursor>, StoreError> {
        let full = self.resolve(path)?;
        if full.is_file() {
            return Err(StoreError::NotDir);
        }

        let items = fs::read_dir(&full).map_err(map_io)?.map(|item| {
            let item = item?;
            let meta = item.metadata()?;
            Ok(DirEntry {
                name: item.file_name().to_string_lossy().into_owned(),
                kind: if meta.is_dir() { EntryKind::Dir } else { EntryKind::File },
                size: if meta.is_dir() { 0 } else { meta.len() },
            })
        });
        Ok(Box::new(HostDir::new(items)))
    }

    fn mkdir(&self, path: &str) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        fs::create_dir(&full).map_err(map_io)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(StoreError::Invalid(path.to_string()));
        }
        let meta = fs::metadata(&full).map_err(map_io)?;
        if meta.is_dir() {
            fs::remove_dir(&full).map_err(map_io)
        } else {
            fs::remove_file(&full).map_err(map_io)
        }
    }
}

struct HostFile {
    file: File,
}

impl StoreFile for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        self.file.read(buf).map_err(map_io)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        self.file.write(data).map_err(map_io)
    }

    fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.file.set_len(len).map_err(map_io)
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.file.sync_all().map_err(map_io)
    }
}

/// Directory listing taken in one pass.
///
/// Entries read before a failing one are sorted by name; the failure is
/// reported after them and ends the listing.
struct HostDir {
    entries: std::vec::IntoIter<Result<DirEntry, StoreError>>,
}

impl HostDir {
    fn new(items: impl Iterator<Item = io::Result<DirEntry>>) -> Self {
        let mut entries = Vec::new();
        let mut failure = None;
        for item in items {
            match item {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    failure = Some(map_io(e));
                    break;
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries: Vec<_> = entries.into_iter().map(Ok).collect();
        entries.extend(failure.map(Err));
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl DirCursor for HostDir {
    fn next_entry(&mut self) -> Result<Option<DirEntry>, StoreError> {
        self.entries.next().transpose()
    }
}
