//! OTA image formats
//!
//! Each supported hardware target ships firmware in one of a small, closed
//! set of container formats. The format is picked once when an update
//! session starts; everything after header parsing is shared.
//!
//! # Headered image
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  magic (16 bytes, NUL padded)       │  offset 0
//! │  kind "RAW" / "XZ" (4 bytes)        │  offset 16
//! │  payload length (u32 LE)            │  offset 20
//! │  reserved (8 bytes)                 │  offset 24
//! │  hardware version (16 bytes)        │  offset 32
//! │  software version (16 bytes)        │  offset 48
//! │  SHA-256 of payload (32 bytes)      │  offset 64
//! │  padding up to header_len           │  offset 96
//! ├─────────────────────────────────────┤
//! │  payload (not including header)     │  offset header_len
//! └─────────────────────────────────────┘
//! ```
//!
//! # Booter image
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  magic 0xA0FFFF9F (u32 LE)          │  offset 0
//! │  image type (u32 LE)                │  offset 4
//! │  compression type (u32 LE)          │  offset 8
//! │  payload length (u32 LE)            │  offset 12
//! │  CRC-32 of payload (u32 LE)         │  offset 16
//! │  reserved (12 bytes)                │  offset 20
//! ├─────────────────────────────────────┤
//! │  payload                            │  offset 32
//! └─────────────────────────────────────┘
//! ```
//!
//! The booter header is written to flash ahead of the payload since the
//! bootloader reads it from there; the headered format keeps its header off
//! flash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

// ── Layout constants ───────────────────────────────────────────────────────

/// Default header size of headered images (one flash program unit)
pub const HEADERED_DEFAULT_LEN: usize = 512;
/// Magic used by headered images unless configured otherwise
pub const HEADERED_DEFAULT_MAGIC: &str = "BL60X_OTA";

const HEADERED_MAGIC_LEN: usize = 16;
const HEADERED_KIND: std::ops::Range<usize> = 16..20;
const HEADERED_LEN: std::ops::Range<usize> = 20..24;
const HEADERED_HW_VERSION: std::ops::Range<usize> = 32..48;
const HEADERED_SW_VERSION: std::ops::Range<usize> = 48..64;
const HEADERED_SHA256: std::ops::Range<usize> = 64..96;
/// Smallest header able to hold every headered field
pub const HEADERED_MIN_LEN: usize = 96;

/// Booter header magic
pub const BOOTER_MAGIC: u32 = 0xA0FF_FF9F;
/// Booter header size
pub const BOOTER_HEADER_LEN: usize = 32;

// ── Formats ────────────────────────────────────────────────────────────────

/// Container format of an uploaded firmware image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ImageFormat {
    /// No header and no digest: the whole body is the image
    #[default]
    Raw,
    /// Fixed-size header with magic, length and SHA-256 digest
    Headered { magic: String, header_len: usize },
    /// 32-byte bootloader header with CRC-32, stored in flash
    Booter,
}

impl ImageFormat {
    pub fn headered(magic: impl Into<String>) -> Self {
        ImageFormat::Headered {
            magic: magic.into(),
            header_len: HEADERED_DEFAULT_LEN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Headered { .. } => "headered",
            ImageFormat::Booter => "booter",
        }
    }

    /// Bytes of header preceding the payload
    pub fn header_len(&self) -> usize {
        match self {
            ImageFormat::Raw => 0,
            ImageFormat::Headered { header_len, .. } => *header_len,
            ImageFormat::Booter => BOOTER_HEADER_LEN,
        }
    }

    /// Whether the header is stored in flash in front of the payload
    pub fn header_in_flash(&self) -> bool {
        matches!(self, ImageFormat::Booter)
    }

    /// Check the format parameters themselves
    pub fn validate(&self) -> CoreResult<()> {
        if let ImageFormat::Headered { magic, header_len } = self {
            if magic.is_empty() || magic.len() > HEADERED_MAGIC_LEN {
                return Err(CoreError::Parse(format!(
                    "image magic must be 1..={} bytes, got {}",
                    HEADERED_MAGIC_LEN,
                    magic.len()
                )));
            }
            if *header_len < HEADERED_MIN_LEN {
                return Err(CoreError::Parse(format!(
                    "header length {} below minimum {}",
                    header_len, HEADERED_MIN_LEN
                )));
            }
        }
        Ok(())
    }

    /// Parse a complete header.
    ///
    /// `body_len` is the full request body length; raw images take their
    /// payload length from it.
    pub fn parse_header(&self, header: &[u8], body_len: u64) -> CoreResult<ImageHeader> {
        if header.len() != self.header_len() {
            return Err(CoreError::Parse(format!(
                "{} header needs {} bytes, got {}",
                self.name(),
                self.header_len(),
                header.len()
            )));
        }

        let parsed = match self {
            ImageFormat::Raw => {
                let payload_len = u32::try_from(body_len).map_err(|_| {
                    CoreError::Bounds(format!("{} byte image exceeds 32-bit flash space", body_len))
                })?;
                ImageHeader {
                    payload_len,
                    digest: ExpectedDigest::None,
                    description: "raw image".to_string(),
                }
            }
            ImageFormat::Headered { magic, .. } => parse_headered(magic, header)?,
            ImageFormat::Booter => parse_booter(header)?,
        };

        if parsed.payload_len == 0 {
            return Err(CoreError::Parse("image payload is empty".to_string()));
        }
        Ok(parsed)
    }

    /// Assemble a complete image around `payload`.
    ///
    /// Used to produce fixtures and by tooling that prepares uploads.
    pub fn build_image(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            ImageFormat::Raw => payload.to_vec(),
            ImageFormat::Headered { magic, header_len } => {
                let mut image = vec![0u8; *header_len];
                let magic = magic.as_bytes();
                let n = magic.len().min(HEADERED_MAGIC_LEN);
                image[..n].copy_from_slice(&magic[..n]);
                image[HEADERED_KIND][..3].copy_from_slice(b"RAW");
                image[HEADERED_LEN].copy_from_slice(&(payload.len() as u32).to_le_bytes());
                image[HEADERED_SHA256].copy_from_slice(&Sha256::digest(payload));
                image.extend_from_slice(payload);
                image
            }
            ImageFormat::Booter => {
                let mut image = Vec::with_capacity(BOOTER_HEADER_LEN + payload.len());
                image.extend_from_slice(&BOOTER_MAGIC.to_le_bytes());
                image.extend_from_slice(&0u32.to_le_bytes());
                image.extend_from_slice(&0u32.to_le_bytes());
                image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                image.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
                image.resize(BOOTER_HEADER_LEN, 0);
                image.extend_from_slice(payload);
                image
            }
        }
    }
}

fn parse_headered(magic: &str, header: &[u8]) -> CoreResult<ImageHeader> {
    if !header.starts_with(magic.as_bytes()) {
        return Err(CoreError::Parse(format!(
            "invalid header ident '{}'",
            text_field(&header[..HEADERED_MAGIC_LEN])
        )));
    }

    let kind = text_field(&header[HEADERED_KIND]);
    let payload_len = read_u32(header, HEADERED_LEN.start);
    let mut sha256 = [0u8; 32];
    sha256.copy_from_slice(&header[HEADERED_SHA256]);

    Ok(ImageHeader {
        payload_len,
        digest: ExpectedDigest::Sha256(sha256),
        description: format!(
            "{} image hw '{}' sw '{}'",
            kind,
            text_field(&header[HEADERED_HW_VERSION]),
            text_field(&header[HEADERED_SW_VERSION])
        ),
    })
}

fn parse_booter(header: &[u8]) -> CoreResult<ImageHeader> {
    let magic = read_u32(header, 0);
    if magic != BOOTER_MAGIC {
        return Err(CoreError::Parse(format!(
            "bad booter magic 0x{:08X}, expected 0x{:08X}",
            magic, BOOTER_MAGIC
        )));
    }

    Ok(ImageHeader {
        payload_len: read_u32(header, 12),
        digest: ExpectedDigest::Crc32(read_u32(header, 16)),
        description: format!(
            "booter image type {} compression {}",
            read_u32(header, 4),
            read_u32(header, 8)
        ),
    })
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn text_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

// ── Parsed header and digests ──────────────────────────────────────────────

/// Fields the update pipeline needs from a parsed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Payload bytes following the header
    pub payload_len: u32,
    pub digest: ExpectedDigest,
    /// Human-readable summary for logs
    pub description: String,
}

/// Digest an image declares for its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedDigest {
    None,
    Sha256([u8; 32]),
    Crc32(u32),
}

impl ExpectedDigest {
    pub fn to_hex(&self) -> Option<String> {
        match self {
            ExpectedDigest::None => None,
            ExpectedDigest::Sha256(bytes) => Some(hex::encode(bytes)),
            ExpectedDigest::Crc32(crc) => Some(format!("{:08x}", crc)),
        }
    }
}

/// Digest context fed alongside the flash writes
pub(crate) enum RunningDigest {
    None,
    Sha256(Sha256),
    Crc32(crc32fast::Hasher),
}

impl RunningDigest {
    pub(crate) fn for_expected(expected: &ExpectedDigest) -> Self {
        match expected {
            ExpectedDigest::None => RunningDigest::None,
            ExpectedDigest::Sha256(_) => RunningDigest::Sha256(Sha256::new()),
            ExpectedDigest::Crc32(_) => RunningDigest::Crc32(crc32fast::Hasher::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            RunningDigest::None => {}
            RunningDigest::Sha256(hasher) => hasher.update(data),
            RunningDigest::Crc32(hasher) => hasher.update(data),
        }
    }

    /// Finalize and compare, returning the computed digest in hex
    pub(crate) fn verify(self, expected: &ExpectedDigest) -> CoreResult<Option<String>> {
        let computed = match self {
            RunningDigest::None => return Ok(None),
            RunningDigest::Sha256(hasher) => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&hasher.finalize());
                ExpectedDigest::Sha256(out)
            }
            RunningDigest::Crc32(hasher) => ExpectedDigest::Crc32(hasher.finalize()),
        };

        let computed_hex = computed.to_hex();
        if computed != *expected {
            return Err(CoreError::Integrity {
                expected: expected.to_hex().unwrap_or_default(),
                computed: computed_hex.unwrap_or_default(),
            });
        }
        Ok(computed_hex)
    }
}
