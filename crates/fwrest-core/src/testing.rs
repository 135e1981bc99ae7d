//! In-memory collaborators for tests and simulation
//!
//! [`ScriptedTransport`] replays a fixed sequence of receive results,
//! [`RamFlash`] models a NOR flash chip in RAM and [`MemStore`] is a small
//! littlefs-like file store.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::device::{
    BodyTransport, DirCursor, DirEntry, EntryKind, FileStore, FlashDevice, FlashError, StoreError,
    StoreFile, TransportError,
};

#[derive(Debug)]
enum Step {
    Chunk(Vec<u8>),
    Error(TransportError),
    Closed,
}

/// Transport that answers `recv` from a script.
///
/// A scripted chunk larger than the caller's buffer is delivered across
/// several reads. An exhausted script behaves like a closed connection.
#[derive(Debug)]
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    max_chunk: usize,
    reads: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            max_chunk: 1460,
            reads: 0,
        }
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    pub fn chunk(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.steps.push_back(Step::Chunk(data.into()));
        self
    }

    pub fn error(mut self, error: TransportError) -> Self {
        self.steps.push_back(Step::Error(error));
        self
    }

    pub fn closed(mut self) -> Self {
        self.steps.push_back(Step::Closed);
        self
    }

    /// Number of `recv` calls served so far
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BodyTransport for ScriptedTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reads += 1;
        match self.steps.pop_front() {
            Some(Step::Chunk(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.steps.push_front(Step::Chunk(rest));
                }
                Ok(n)
            }
            Some(Step::Error(e)) => Err(e),
            Some(Step::Closed) | None => Ok(0),
        }
    }

    fn max_chunk(&self) -> usize {
        self.max_chunk
    }
}

/// NOR flash held in RAM.
///
/// Starts fully erased. Writes AND into existing content the way real NOR
/// cells only move from 1 to 0, so forgetting an erase shows up as corrupted
/// data in tests.
#[derive(Debug)]
pub struct RamFlash {
    cells: Mutex<Vec<u8>>,
    erase_size: u32,
    stats: Mutex<FlashStats>,
}

/// Operation counters of a [`RamFlash`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    pub writes: usize,
    pub bytes_written: usize,
    pub erases: usize,
}

impl RamFlash {
    pub fn new(capacity: u32, erase_size: u32) -> Self {
        Self {
            cells: Mutex::new(vec![0xFF; capacity as usize]),
            erase_size,
            stats: Mutex::new(FlashStats::default()),
        }
    }

    /// Build a chip from an existing image, padding with erased bytes up to
    /// `capacity`
    pub fn from_image(image: &[u8], capacity: u32, erase_size: u32) -> Self {
        let flash = Self::new(capacity, erase_size);
        {
            let mut cells = flash.cells.lock();
            let n = image.len().min(cells.len());
            cells[..n].copy_from_slice(&image[..n]);
        }
        flash
    }

    /// Copy of the whole chip
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.lock().clone()
    }

    pub fn stats(&self) -> FlashStats {
        *self.stats.lock()
    }

    fn span(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, FlashError> {
        let capacity = self.cells.lock().len();
        let start = addr as usize;
        let end = start.checked_add(len).filter(|&end| end <= capacity).ok_or(
            FlashError::OutOfRange {
                addr,
                len: len as u32,
            },
        )?;
        Ok(start..end)
    }
}

impl FlashDevice for RamFlash {
    fn capacity(&self) -> u32 {
        self.cells.lock().len() as u32
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let span = self.span(addr, buf.len())?;
        buf.copy_from_slice(&self.cells.lock()[span]);
        Ok(())
    }

    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        if self.erase_size == 0 || addr % self.erase_size != 0 || len % self.erase_size != 0 {
            return Err(FlashError::Misaligned(addr));
        }
        let span = self.span(addr, len as usize)?;
        self.cells.lock()[span].fill(0xFF);
        self.stats.lock().erases += 1;
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let span = self.span(addr, data.len())?;
        let mut cells = self.cells.lock();
        for (cell, byte) in cells[span].iter_mut().zip(data) {
            *cell &= *byte;
        }
        let mut stats = self.stats.lock();
        stats.writes += 1;
        stats.bytes_written += data.len();
        Ok(())
    }
}

/// File store held in memory.
///
/// Starts unformatted and unmounted. Opening for write requires the parent
/// directory to exist, the way littlefs does.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MemInner>>,
}

#[derive(Default)]
struct MemInner {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    formatted: bool,
    mounted: bool,
    listing_fault: Option<usize>,
    truncate_fault: bool,
}

impl MemInner {
    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formatted and mounted
    pub fn mounted() -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            inner.formatted = true;
            inner.mounted = true;
        }
        store
    }

    /// Add a file, creating its parent directories
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        {
            let mut inner = self.inner.lock();
            let mut prefix = String::new();
            for part in parent_of(path).split('/').filter(|p| !p.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                inner.dirs.insert(prefix.clone());
            }
            inner.files.insert(path.to_string(), data.to_vec());
        }
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.inner.lock().dirs.insert(path.to_string());
        self
    }

    /// Make directory iteration fail after `entries` entries
    pub fn fail_listing_after(self, entries: usize) -> Self {
        self.inner.lock().listing_fault = Some(entries);
        self
    }

    /// Make every truncate fail
    pub fn fail_truncate(self) -> Self {
        self.inner.lock().truncate_fault = true;
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.inner.lock().dirs.contains(path)
    }
}

impl FileStore for MemStore {
    fn is_mounted(&self) -> bool {
        self.inner.lock().mounted
    }

    fn mount(&self, create: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.formatted && !create {
            return Err(StoreError::NotMounted);
        }
        inner.formatted = true;
        inner.mounted = true;
        Ok(())
    }

    fn unmount(&self) {
        self.inner.lock().mounted = false;
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError> {
        let inner = self.inner.lock();
        if inner.is_dir(path) {
            return Err(StoreError::IsDir);
        }
        if !inner.files.contains_key(path) {
            return Err(StoreError::NotFound);
        }
        Ok(Box::new(MemFile {
            inner: self.inner.clone(),
            path: path.to_string(),
            pos: 0,
        }))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError> {
        let mut inner = self.inner.lock();
        if inner.is_dir(path) {
            return Err(StoreError::IsDir);
        }
        if !inner.is_dir(parent_of(path)) {
            return Err(StoreError::NotFound);
        }
        inner.files.entry(path.to_string()).or_default();
        Ok(Box::new(MemFile {
            inner: self.inner.clone(),
            path: path.to_string(),
            pos: 0,
        }))
    }

    fn read_dir(&self, path: &str) -> Result<Box<dyn DirCursor>, StoreError> {
        let inner = self.inner.lock();
        if !inner.is_dir(path) {
            return Err(if inner.files.contains_key(path) {
                StoreError::NotDir
            } else {
                StoreError::NotFound
            });
        }

        let mut entries: VecDeque<DirEntry> = VecDeque::new();
        for dir in inner.dirs.iter().filter(|d| parent_of(d) == path) {
            entries.push_back(DirEntry {
                name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
                kind: EntryKind::Dir,
                size: 0,
            });
        }
        for (file, data) in inner.files.iter().filter(|(f, _)| parent_of(f) == path) {
            entries.push_back(DirEntry {
                name: file.rsplit('/').next().unwrap_or(file).to_string(),
                kind: EntryKind::File,
                size: data.len() as u64,
            });
        }

        Ok(Box::new(MemDirCursor {
            entries,
            fault_after: inner.listing_fault,
            yielded: 0,
        }))
    }

    fn mkdir(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.is_dir(path) || inner.files.contains_key(path) {
            return Err(StoreError::Exists);
        }
        if !inner.is_dir(parent_of(path)) {
            return Err(StoreError::NotFound);
        }
        inner.dirs.insert(path.to_string());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.files.remove(path).is_some() {
            return Ok(());
        }
        if !inner.dirs.contains(path) {
            return Err(StoreError::NotFound);
        }
        let occupied = inner.dirs.iter().any(|d| parent_of(d) == path)
            || inner.files.keys().any(|f| parent_of(f) == path);
        if occupied {
            return Err(StoreError::Invalid(format!("directory '{}' not empty", path)));
        }
        inner.dirs.remove(path);
        Ok(())
    }
}

struct MemFile {
    inner: Arc<Mutex<MemInner>>,
    path: String,
    pos: usize,
}

impl StoreFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let inner = self.inner.lock();
        let data = inner.files.get(&self.path).ok_or(StoreError::NotFound)?;
        let n = data.len().saturating_sub(self.pos).min(buf.len());
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let file = inner.files.get_mut(&self.path).ok_or(StoreError::NotFound)?;
        let end = self.pos + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }

    fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.truncate_fault {
            return Err(StoreError::Io("truncate refused".to_string()));
        }
        let file = inner.files.get_mut(&self.path).ok_or(StoreError::NotFound)?;
        file.resize(len as usize, 0);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemDirCursor {
    entries: VecDeque<DirEntry>,
    fault_after: Option<usize>,
    yielded: usize,
}

impl DirCursor for MemDirCursor {
    fn next_entry(&mut self) -> Result<Option<DirEntry>, StoreError> {
        if self.fault_after == Some(self.yielded) {
            return Err(StoreError::Io("corrupted directory block".to_string()));
        }
        self.yielded += 1;
        Ok(self.entries.pop_front())
    }
}
