//! fwrest-core - Streaming write pipeline for the device REST surface
//!
//! This crate holds everything that touches flash or the file store on behalf
//! of a request, independent of any HTTP framework:
//!
//! - [`routing`]: the ordered route table and path parameter parsing
//! - [`stream`]: [`StreamCursor`], the single pull-based view over a request body
//! - [`flash`]: bounded, paged reads and writes of raw flash regions
//! - [`ota`]: the firmware update state machine and its image formats
//! - [`files`]: streaming access to the flash-backed file store
//!
//! Hardware and transport live behind the collaborator traits in [`device`].

pub mod device;
pub mod error;
pub mod files;
pub mod flash;
pub mod ota;
pub mod request;
pub mod routing;
pub mod stream;
pub mod testing;

pub use device::{
    BodyTransport, ChannelBank, CommandDispatcher, DirCursor, DirEntry, EntryKind, FileStore,
    FlashDevice, FlashError, PartitionSlot, PartitionTable, PinConfig, ResetScheduler, StoreError, StoreFile,
    TransportError,
};
pub use error::{CoreError, CoreResult};
pub use files::{DirListing, FileReader, FileStoreBridge, FileWritten, ListingEnd, ReadTarget};
pub use flash::{FlashRegion, PageSink, PagedFlash, RegionWriter};
pub use ota::{run_update, ImageFormat, OtaDestination, OtaReport, OtaSession, OtaState, OtaTarget};
pub use request::{Method, RequestHead};
pub use routing::{Matcher, Resolution, RouteTable};
pub use stream::StreamCursor;
