//! Streaming bridge between requests and the file store
//!
//! Paths are store-relative: the URL suffix after the routing prefix, used
//! verbatim. Reads never mount the store; a store that is not mounted simply
//! has nothing to serve. Writes mount it on first use.

use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::device::{BodyTransport, DirEntry, FileStore, StoreError, StoreFile};
use crate::error::{CoreError, CoreResult};
use crate::stream::StreamCursor;

/// Result of opening a path for reading
pub enum ReadTarget {
    File(FileReader),
    Directory(DirListing),
}

/// How a directory listing ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingEnd {
    /// Iteration reached the end of the directory
    Clean,
    /// Iteration failed with this store error code; entries are partial
    Error(i32),
}

/// Entries of one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub dir: String,
    pub entries: Vec<DirEntry>,
    pub end: ListingEnd,
}

impl DirListing {
    pub fn is_complete(&self) -> bool {
        self.end == ListingEnd::Clean
    }
}

/// Serialized as `{"dir": .., "content": [{"name","type","size"}.., {"error": code}?]}`
impl Serialize for DirListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("dir", &self.dir)?;
        map.serialize_entry("content", &Records(self))?;
        map.end()
    }
}

struct Records<'a>(&'a DirListing);

#[derive(Serialize)]
struct EntryRecord<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    size: u64,
}

#[derive(Serialize)]
struct ErrorRecord {
    error: i32,
}

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let listing = self.0;
        let trailer = matches!(listing.end, ListingEnd::Error(_)) as usize;
        let mut seq = serializer.serialize_seq(Some(listing.entries.len() + trailer))?;
        for entry in &listing.entries {
            seq.serialize_element(&EntryRecord {
                name: &entry.name,
                kind: entry.kind.wire_type(),
                size: entry.size,
            })?;
        }
        if let ListingEnd::Error(error) = listing.end {
            seq.serialize_element(&ErrorRecord { error })?;
        }
        seq.end()
    }
}

/// Acknowledgement of a completed file upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWritten {
    pub fname: String,
    pub size: u64,
}

/// Open file yielding its content page by page
pub struct FileReader {
    path: String,
    file: Option<Box<dyn StoreFile>>,
    page_size: usize,
    delivered: u64,
}

impl FileReader {
    pub fn mime(&self) -> &'static str {
        mime_for_path(&self.path)
    }

    /// Next page, `None` at end of file
    pub fn next_page(&mut self) -> CoreResult<Option<Vec<u8>>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut page = vec![0u8; self.page_size];
        let n = file
            .read(&mut page)
            .map_err(|e| CoreError::storage(self.path.clone(), e))?;
        if n == 0 {
            if let Some(file) = self.file.take() {
                file.close().map_err(|e| CoreError::storage(self.path.clone(), e))?;
            }
            tracing::debug!(path = %self.path, total = self.delivered, "file read complete");
            return Ok(None);
        }

        page.truncate(n);
        self.delivered += n as u64;
        Ok(Some(page))
    }
}

impl Iterator for FileReader {
    type Item = CoreResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_page() {
            Ok(page) => page.map(Ok),
            Err(e) => {
                self.file = None;
                Some(Err(e))
            }
        }
    }
}

/// Request-facing operations on the file store
#[derive(Clone)]
pub struct FileStoreBridge {
    store: Arc<dyn FileStore>,
    page_size: usize,
}

impl FileStoreBridge {
    pub fn new(store: Arc<dyn FileStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    fn require_mounted(&self, path: &str) -> CoreResult<()> {
        if self.store.is_mounted() {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("'{}': file store not mounted", path)))
        }
    }

    /// Open a file for streaming, or list a directory
    pub fn open_for_read(&self, path: &str) -> CoreResult<ReadTarget> {
        self.require_mounted(path)?;
        tracing::debug!(path, "file store read");

        match self.store.open_read(path) {
            Ok(file) => Ok(ReadTarget::File(FileReader {
                path: path.to_string(),
                file: Some(file),
                page_size: self.page_size,
                delivered: 0,
            })),
            Err(StoreError::IsDir) => self.list(path).map(ReadTarget::Directory),
            Err(e) => Err(CoreError::storage(path, e)),
        }
    }

    /// List a directory. Iteration errors end the listing instead of failing it.
    pub fn list(&self, path: &str) -> CoreResult<DirListing> {
        self.require_mounted(path)?;
        let mut cursor = self
            .store
            .read_dir(path)
            .map_err(|e| CoreError::storage(path, e))?;

        let mut entries = Vec::new();
        let end = loop {
            match cursor.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break ListingEnd::Clean,
                Err(e) => {
                    tracing::warn!(path, error = %e, listed = entries.len(), "directory listing cut short");
                    break ListingEnd::Error(e.code());
                }
            }
        };

        Ok(DirListing {
            dir: path.to_string(),
            entries,
            end,
        })
    }

    /// Store the request body at `path`.
    ///
    /// The file ends up exactly as long as the bytes received, also when the
    /// transport fails part way; in that case the transport error is returned.
    pub async fn write_file<T: BodyTransport + ?Sized>(
        &self,
        path: &str,
        cursor: &mut StreamCursor<'_, T>,
    ) -> CoreResult<FileWritten> {
        if path.is_empty() || path.ends_with('/') {
            return Err(CoreError::storage(
                path,
                StoreError::Invalid("missing file name".to_string()),
            ));
        }
        if !self.store.is_mounted() {
            tracing::info!("mounting file store for write");
            self.store
                .mount(true)
                .map_err(|e| CoreError::storage(path, e))?;
        }

        self.make_parents(path);
        let mut file = self
            .store
            .open_write(path)
            .map_err(|e| CoreError::storage(path, e))?;

        let mut written = 0u64;
        let outcome = loop {
            match cursor.pull(self.page_size).await {
                Ok(Some(chunk)) => {
                    if let Err(e) = write_all(file.as_mut(), chunk, &mut written) {
                        break Err(CoreError::storage(path, e));
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let truncated = file.truncate(written);
        let closed = file.close();

        if let Err(e) = outcome {
            tracing::warn!(path, written, error = %e, "file upload interrupted");
            if let Err(e) = &truncated {
                tracing::warn!(path, written, error = %e, "truncate after interrupted upload failed");
            }
            if let Err(e) = &closed {
                tracing::warn!(path, error = %e, "close after interrupted upload failed");
            }
            return Err(e);
        }
        truncated.map_err(|e| CoreError::storage(path, e))?;
        closed.map_err(|e| CoreError::storage(path, e))?;

        tracing::info!(path, size = written, "file written");
        Ok(FileWritten {
            fname: path.to_string(),
            size: written,
        })
    }

    /// Remove a file or an empty directory
    pub fn delete(&self, path: &str) -> CoreResult<()> {
        self.require_mounted(path)?;
        self.store
            .remove(path)
            .map_err(|e| CoreError::storage(path, e))?;
        tracing::info!(path, "deleted");
        Ok(())
    }

    /// Create every directory leading up to `path`, ignoring failures
    fn make_parents(&self, path: &str) {
        let mut end = 0;
        while let Some(pos) = path[end..].find('/') {
            end += pos;
            let dir = &path[..end];
            end += 1;
            if dir.is_empty() {
                continue;
            }
            match self.store.mkdir(dir) {
                Ok(()) | Err(StoreError::Exists) => {}
                Err(e) => tracing::debug!(dir, error = %e, "mkdir failed"),
            }
        }
    }
}

fn write_all(file: &mut dyn StoreFile, mut data: &[u8], written: &mut u64) -> Result<(), StoreError> {
    while !data.is_empty() {
        let n = file.write(data)?;
        if n == 0 {
            return Err(StoreError::NoSpace);
        }
        *written += n as u64;
        data = &data[n..];
    }
    Ok(())
}

/// Content type served for a stored file
pub fn mime_for_path(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext {
        "ico" => "image/x-icon",
        "js" => "text/javascript",
        "json" => "application/json",
        "html" => "text/html",
        "vue" => "application/javascript",
        _ => "application/octet-stream",
    }
}
