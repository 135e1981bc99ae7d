//! Collaborator interfaces consumed by the core
//!
//! The socket, the flash chip, the file store and the reset logic are owned
//! by the platform. The core only sees them through these traits, which keeps
//! the pipeline testable against RAM-backed fakes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::CoreResult;

// =============================================================================
// Transport
// =============================================================================

/// Errors reported by the body transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Blocking-style pull of body bytes that were not buffered with the request
/// head.
#[async_trait]
pub trait BodyTransport: Send {
    /// Receive up to `buf.len()` bytes.
    ///
    /// Fewer bytes than requested is normal. `Ok(0)` means the peer closed
    /// the connection.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Largest read worth asking for (the transport's packet unit).
    fn max_chunk(&self) -> usize {
        1460
    }
}

// =============================================================================
// Flash
// =============================================================================

/// Errors reported by the flash device
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("address range 0x{addr:06X}+0x{len:X} outside device")]
    OutOfRange { addr: u32, len: u32 },

    #[error("erase at 0x{0:06X} not aligned to sector")]
    Misaligned(u32),

    #[error("device error: {0}")]
    Device(String),
}

/// Raw NOR flash: erase sets bytes to `0xFF`, write can only clear bits.
pub trait FlashDevice: Send + Sync {
    /// Total addressable bytes
    fn capacity(&self) -> u32;

    /// Erase granularity in bytes
    fn erase_size(&self) -> u32;

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase `len` bytes starting at a sector-aligned `addr`
    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError>;

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), FlashError>;
}

// =============================================================================
// File store
// =============================================================================

/// File store errors, numbered like the littlefs error codes the device
/// reports to clients
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no such file or directory")]
    NotFound,

    #[error("is a directory")]
    IsDir,

    #[error("not a directory")]
    NotDir,

    #[error("entry already exists")]
    Exists,

    #[error("no space left in store")]
    NoSpace,

    #[error("store not mounted")]
    NotMounted,

    #[error("invalid path: {0}")]
    Invalid(String),

    #[error("store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    pub fn code(&self) -> i32 {
        match self {
            StoreError::NotFound => -2,
            StoreError::IsDir => -21,
            StoreError::NotDir => -20,
            StoreError::Exists => -17,
            StoreError::NoSpace => -28,
            StoreError::NotMounted => -19,
            StoreError::Invalid(_) => -22,
            StoreError::Io(_) => -5,
        }
    }
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    /// Numeric type used in listings (littlefs `LFS_TYPE_REG` / `LFS_TYPE_DIR`)
    pub fn wire_type(self) -> u8 {
        match self {
            EntryKind::File => 1,
            EntryKind::Dir => 2,
        }
    }
}

/// One entry produced by a directory iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// An open file. Dropping the handle closes it.
pub trait StoreFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, StoreError>;

    fn truncate(&mut self, len: u64) -> Result<(), StoreError>;

    /// Flush and close, reporting any deferred write error
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// Iteration over one directory
pub trait DirCursor: Send {
    /// Next entry, `Ok(None)` at the end of the directory
    fn next_entry(&mut self) -> Result<Option<DirEntry>, StoreError>;
}

/// Flash-backed file store with littlefs-like semantics
pub trait FileStore: Send + Sync {
    fn is_mounted(&self) -> bool;

    /// Mount the store, formatting a fresh one when `create` is set and none
    /// exists
    fn mount(&self, create: bool) -> Result<(), StoreError>;

    fn unmount(&self);

    /// Open for reading. A directory path yields [`StoreError::IsDir`].
    fn open_read(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError>;

    /// Open read-write, creating the file if missing. Existing content is
    /// kept until truncated.
    fn open_write(&self, path: &str) -> Result<Box<dyn StoreFile>, StoreError>;

    fn read_dir(&self, path: &str) -> Result<Box<dyn DirCursor>, StoreError>;

    fn mkdir(&self, path: &str) -> Result<(), StoreError>;

    fn remove(&self, path: &str) -> Result<(), StoreError>;
}

// =============================================================================
// Boot partitions and reset
// =============================================================================

/// A firmware slot in an A/B partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSlot {
    pub index: usize,
    pub start: u32,
    pub max_len: u32,
}

/// Boot partition table of targets that keep two firmware slots
pub trait PartitionTable: Send + Sync {
    /// The slot not currently booted, i.e. the update destination
    fn inactive_slot(&self) -> CoreResult<PartitionSlot>;

    /// Point boot logic at `slot` holding an image of `image_len` bytes
    fn activate(&self, slot: &PartitionSlot, image_len: u32) -> CoreResult<()>;
}

/// Deferred device reset
pub trait ResetScheduler: Send + Sync {
    fn schedule_reset(&self, delay: Duration);
}

// =============================================================================
// Configuration collaborators
// =============================================================================

/// Pin role and channel mapping held by the persisted configuration
pub trait PinConfig: Send + Sync {
    /// Display names of every pin role, indexed by role number
    fn role_names(&self) -> Vec<String>;

    /// Role of each pin
    fn roles(&self) -> Vec<u8>;

    fn set_role(&self, pin: usize, role: u8);

    /// Channel bound to each pin
    fn channels(&self) -> Vec<u8>;

    fn set_channel(&self, pin: usize, channel: u8);

    fn set_flag(&self, flag: u32);

    /// Store the short startup command and run it immediately
    fn set_startup_command(&self, command: &str);

    /// Persist pending changes after a short delay
    fn schedule_save(&self);
}

/// Live channel values
pub trait ChannelBank: Send + Sync {
    fn get(&self, channel: usize) -> i32;

    fn set(&self, channel: usize, value: i32);
}

/// Console command interpreter
pub trait CommandDispatcher: Send + Sync {
    fn execute(&self, command: &str) -> CoreResult<()>;
}
