//! Over-the-air firmware update pipeline
//!
//! An update runs as one [`OtaSession`]:
//!
//! ```text
//! AwaitingHeader ──► WritingPayload ──► Verifying ──► Committed
//!        │                  │               │
//!        └──────────────────┴───────────────┴──────► Aborted
//! ```
//!
//! The image container ([`ImageFormat`]) decides the header layout and the
//! digest; the destination ([`OtaDestination`]) decides where the payload
//! lands and what committing means. Scheduling the reboot afterwards is up to
//! the caller.

mod format;
mod session;

pub use format::{
    ExpectedDigest, ImageFormat, ImageHeader, BOOTER_HEADER_LEN, BOOTER_MAGIC, HEADERED_DEFAULT_LEN,
    HEADERED_DEFAULT_MAGIC, HEADERED_MIN_LEN,
};
pub use session::{run_update, OtaDestination, OtaReport, OtaSession, OtaState, OtaTarget};
