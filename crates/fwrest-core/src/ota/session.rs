//! Update session state machine

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::format::{ExpectedDigest, ImageFormat, ImageHeader, RunningDigest};
use crate::device::{BodyTransport, PartitionSlot, PartitionTable};
use crate::error::{CoreError, CoreResult};
use crate::flash::{FlashRegion, PagedFlash, RegionWriter};
use crate::stream::StreamCursor;

/// Where an image is written
#[derive(Clone)]
pub enum OtaDestination {
    /// Fixed flash region; committing just reports the bytes written
    Region(FlashRegion),
    /// Inactive slot of an A/B partition table, activated on commit
    PartitionTable(Arc<dyn PartitionTable>),
}

impl fmt::Debug for OtaDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaDestination::Region(region) => f.debug_tuple("Region").field(region).finish(),
            OtaDestination::PartitionTable(_) => f.write_str("PartitionTable"),
        }
    }
}

/// Image format plus destination, fixed per device
#[derive(Debug, Clone)]
pub struct OtaTarget {
    pub format: ImageFormat,
    pub destination: OtaDestination,
}

impl OtaTarget {
    pub fn new(format: ImageFormat, destination: OtaDestination) -> Self {
        Self { format, destination }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaState {
    AwaitingHeader,
    WritingPayload,
    Verifying,
    Committed,
    Aborted,
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OtaState::AwaitingHeader => "awaiting header",
            OtaState::WritingPayload => "writing payload",
            OtaState::Verifying => "verifying",
            OtaState::Committed => "committed",
            OtaState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a committed update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaReport {
    /// Bytes written to flash, header included when the format stores it
    pub size: u64,
    /// Payload bytes
    pub image_len: u32,
    /// Verified payload digest in hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Activated partition slot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
}

struct Payload {
    header: ImageHeader,
    writer: RegionWriter,
    digest: RunningDigest,
    slot: Option<PartitionSlot>,
    written: u64,
}

/// One firmware update in progress.
///
/// Bytes are pushed in with [`feed`](Self::feed) in whatever chunk sizes the
/// transport produced; [`finish`](Self::finish) verifies and commits. Any
/// error moves the session to [`OtaState::Aborted`] for good. Flash content
/// already written stays as it is.
pub struct OtaSession {
    target: OtaTarget,
    flash: PagedFlash,
    state: OtaState,
    body_len: u64,
    header: Vec<u8>,
    payload: Option<Payload>,
}

impl OtaSession {
    /// Start a session for a body of `body_len` bytes
    pub fn new(target: OtaTarget, flash: PagedFlash, body_len: u64) -> CoreResult<Self> {
        target.format.validate()?;
        let header = Vec::with_capacity(target.format.header_len());
        Ok(Self {
            target,
            flash,
            state: OtaState::AwaitingHeader,
            body_len,
            header,
            payload: None,
        })
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Payload bytes written so far
    pub fn written(&self) -> u64 {
        self.payload.as_ref().map_or(0, |p| p.written)
    }

    /// Abandon the session
    pub fn abort(&mut self) {
        if self.state != OtaState::Committed {
            self.state = OtaState::Aborted;
        }
    }

    /// Consume the next chunk of the request body
    pub fn feed(&mut self, chunk: &[u8]) -> CoreResult<()> {
        let result = self.feed_inner(chunk);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn feed_inner(&mut self, chunk: &[u8]) -> CoreResult<()> {
        let mut data = chunk;

        match self.state {
            OtaState::AwaitingHeader => {
                let want = self.target.format.header_len() - self.header.len();
                let take = want.min(data.len());
                self.header.extend_from_slice(&data[..take]);
                data = &data[take..];
                if self.header.len() < self.target.format.header_len() {
                    return Ok(());
                }
                self.begin_payload()?;
            }
            OtaState::WritingPayload => {}
            OtaState::Verifying => {
                if !data.is_empty() {
                    return Err(CoreError::Parse(format!(
                        "{} bytes past the end of the image",
                        data.len()
                    )));
                }
                return Ok(());
            }
            OtaState::Committed | OtaState::Aborted => {
                return Err(CoreError::Parse(format!("update session already {}", self.state)));
            }
        }

        if data.is_empty() {
            return Ok(());
        }
        let payload = self
            .payload
            .as_mut()
            .ok_or_else(|| CoreError::Parse("payload before header".to_string()))?;

        let left = payload.header.payload_len as u64 - payload.written;
        if data.len() as u64 > left {
            return Err(CoreError::Parse(format!(
                "{} bytes past the end of the image",
                data.len() as u64 - left
            )));
        }

        payload.writer.write(data)?;
        payload.digest.update(data);
        payload.written += data.len() as u64;
        tracing::trace!(written = payload.written, "ota chunk");

        if payload.written == payload.header.payload_len as u64 {
            self.state = OtaState::Verifying;
        }
        Ok(())
    }

    /// Header complete: parse it, size the destination and open the writer
    fn begin_payload(&mut self) -> CoreResult<()> {
        let format = &self.target.format;
        let header = format.parse_header(&self.header, self.body_len)?;

        let image_body = format.header_len() as u64 + header.payload_len as u64;
        if self.body_len < image_body {
            return Err(CoreError::Parse(format!(
                "image declares {} bytes but body holds {}",
                image_body, self.body_len
            )));
        }
        if self.body_len > image_body {
            return Err(CoreError::Parse(format!(
                "{} bytes past the end of the image",
                self.body_len - image_body
            )));
        }

        let (area, slot) = match &self.target.destination {
            OtaDestination::Region(region) => (*region, None),
            OtaDestination::PartitionTable(table) => {
                let slot = table.inactive_slot()?;
                (FlashRegion::new(slot.start, slot.max_len), Some(slot))
            }
        };

        let stored_header = if format.header_in_flash() {
            format.header_len() as u64
        } else {
            0
        };
        let flash_len = stored_header + header.payload_len as u64;
        if flash_len > area.len as u64 {
            return Err(CoreError::Bounds(format!(
                "{} byte image does not fit destination 0x{:06X}+0x{:X}",
                flash_len, area.start, area.len
            )));
        }

        let mut writer = self.flash.writer(FlashRegion::new(area.start, flash_len as u32))?;
        if stored_header > 0 {
            writer.write(&self.header)?;
        }

        tracing::info!(
            format = format.name(),
            image = %header.description,
            payload_len = header.payload_len,
            start = format_args!("0x{:06X}", area.start),
            slot = ?slot.map(|s| s.index),
            "ota header accepted"
        );

        self.payload = Some(Payload {
            digest: RunningDigest::for_expected(&header.digest),
            header,
            writer,
            slot,
            written: 0,
        });
        self.state = OtaState::WritingPayload;
        Ok(())
    }

    /// Verify the digest and commit the image
    pub fn finish(&mut self) -> CoreResult<OtaReport> {
        let result = self.finish_inner();
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn finish_inner(&mut self) -> CoreResult<OtaReport> {
        match self.state {
            OtaState::Verifying => {}
            OtaState::AwaitingHeader => {
                return Err(CoreError::Parse(format!(
                    "no image header: {} of {} bytes received",
                    self.header.len(),
                    self.target.format.header_len()
                )));
            }
            OtaState::WritingPayload => {
                return Err(CoreError::Parse(format!(
                    "truncated image: {} payload bytes written",
                    self.written()
                )));
            }
            OtaState::Committed | OtaState::Aborted => {
                return Err(CoreError::Parse(format!("update session already {}", self.state)));
            }
        }

        let payload = self
            .payload
            .take()
            .ok_or_else(|| CoreError::Parse("no image payload".to_string()))?;
        let expected: ExpectedDigest = payload.header.digest;
        let digest = payload.digest.verify(&expected)?;

        let size = payload.writer.written();
        if let (Some(slot), OtaDestination::PartitionTable(table)) =
            (payload.slot, &self.target.destination)
        {
            table.activate(&slot, size as u32)?;
        }

        self.state = OtaState::Committed;
        Ok(OtaReport {
            size,
            image_len: payload.header.payload_len,
            digest,
            slot: payload.slot.map(|s| s.index),
        })
    }
}

/// Drive a complete update from a request body
pub async fn run_update<T: BodyTransport + ?Sized>(
    target: &OtaTarget,
    flash: &PagedFlash,
    cursor: &mut StreamCursor<'_, T>,
) -> CoreResult<OtaReport> {
    let mut session = OtaSession::new(target.clone(), flash.clone(), cursor.remaining())?;

    loop {
        let chunk = match cursor.pull(flash.page_size()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                session.abort();
                tracing::warn!(written = session.written(), error = %e, "ota transfer failed");
                return Err(e);
            }
        };
        if let Err(e) = session.feed(chunk) {
            tracing::warn!(state = %session.state(), written = session.written(), error = %e, "ota aborted");
            return Err(e);
        }
    }

    match session.finish() {
        Ok(report) => {
            tracing::info!(size = report.size, digest = ?report.digest, "ota committed");
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(error = %e, "ota verification failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::testing::{RamFlash, ScriptedTransport};

    const SLOT: FlashRegion = FlashRegion { start: 0x8000, len: 0x4000 };

    fn flash() -> (Arc<RamFlash>, PagedFlash) {
        let chip = Arc::new(RamFlash::new(0x10000, 0x1000));
        (chip.clone(), PagedFlash::new(chip, 1024))
    }

    fn payload() -> Vec<u8> {
        (0..100u8).collect()
    }

    fn region_target(format: ImageFormat) -> OtaTarget {
        OtaTarget::new(format, OtaDestination::Region(SLOT))
    }

    fn feed_chunks(session: &mut OtaSession, image: &[u8], sizes: &[usize]) -> CoreResult<()> {
        let mut offset = 0;
        for &size in sizes {
            session.feed(&image[offset..offset + size])?;
            offset += size;
        }
        session.feed(&image[offset..])
    }

    fn read_back(chip: &RamFlash, start: u32, len: usize) -> Vec<u8> {
        chip.snapshot()[start as usize..start as usize + len].to_vec()
    }

    #[test]
    fn headered_image_commits() {
        let (chip, paged) = flash();
        let format = ImageFormat::headered("OK_OTA");
        let image = format.build_image(&payload());
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        // header arrives in pieces, then the payload as 10, 40 and 50 bytes
        feed_chunks(&mut session, &image, &[200, 312, 10, 40]).unwrap();
        assert_eq!(session.state(), OtaState::Verifying);

        let report = session.finish().unwrap();
        assert_eq!(session.state(), OtaState::Committed);
        assert_eq!(report.size, 100);
        assert_eq!(report.image_len, 100);
        assert_eq!(read_back(&chip, SLOT.start, 100), payload());
    }

    #[test]
    fn corrupted_digest_aborts_but_keeps_payload() {
        let (chip, paged) = flash();
        let format = ImageFormat::headered("OK_OTA");
        let mut image = format.build_image(&payload());
        image[64] ^= 0x01;
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        feed_chunks(&mut session, &image, &[512, 10, 40]).unwrap();
        let err = session.finish().unwrap_err();

        assert!(matches!(err, CoreError::Integrity { .. }));
        assert_eq!(session.state(), OtaState::Aborted);
        assert_eq!(read_back(&chip, SLOT.start, 100), payload());
    }

    #[test]
    fn bad_magic_writes_nothing() {
        let (chip, paged) = flash();
        let image = ImageFormat::headered("NOT_OTA").build_image(&payload());
        let mut session =
            OtaSession::new(region_target(ImageFormat::headered("OK_OTA")), paged, image.len() as u64)
                .unwrap();

        assert!(matches!(session.feed(&image), Err(CoreError::Parse(_))));
        assert_eq!(session.state(), OtaState::Aborted);
        assert_eq!(chip.stats().writes, 0);
        assert_eq!(chip.stats().erases, 0);
    }

    #[test]
    fn image_larger_than_destination_is_bounds_error() {
        let (chip, paged) = flash();
        let format = ImageFormat::Booter;
        let image = format.build_image(&vec![0x5A; SLOT.len as usize]);
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        assert!(matches!(session.feed(&image[..64]), Err(CoreError::Bounds(_))));
        assert_eq!(chip.stats().writes, 0);
    }

    #[test]
    fn booter_header_is_stored_with_payload() {
        let (chip, paged) = flash();
        let format = ImageFormat::Booter;
        let image = format.build_image(&payload());
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        feed_chunks(&mut session, &image, &[7, 50]).unwrap();
        let report = session.finish().unwrap();

        assert_eq!(report.size, image.len() as u64);
        assert_eq!(report.digest, Some(format!("{:08x}", crc32fast::hash(&payload()))));
        assert_eq!(read_back(&chip, SLOT.start, image.len()), image);
    }

    #[test]
    fn surplus_body_is_rejected() {
        let (_, paged) = flash();
        let format = ImageFormat::headered("OK_OTA");
        let mut image = format.build_image(&payload());
        image.extend_from_slice(&[0u8; 4]);
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        assert!(matches!(session.feed(&image), Err(CoreError::Parse(_))));
    }

    #[test]
    fn truncated_image_fails_on_finish() {
        let (_, paged) = flash();
        let format = ImageFormat::Booter;
        let image = format.build_image(&payload());
        let mut session = OtaSession::new(region_target(format), paged, image.len() as u64).unwrap();

        session.feed(&image[..80]).unwrap();
        assert!(matches!(session.finish(), Err(CoreError::Parse(_))));
        assert_eq!(session.state(), OtaState::Aborted);
    }

    #[test]
    fn aborted_session_refuses_more_data() {
        let (_, paged) = flash();
        let mut session = OtaSession::new(region_target(ImageFormat::Raw), paged, 10).unwrap();
        session.abort();
        assert!(session.feed(&[0; 10]).is_err());
    }

    struct AbTable {
        activated: Mutex<Option<(usize, u32)>>,
    }

    impl PartitionTable for AbTable {
        fn inactive_slot(&self) -> CoreResult<PartitionSlot> {
            Ok(PartitionSlot {
                index: 1,
                start: 0xC000,
                max_len: 0x2000,
            })
        }

        fn activate(&self, slot: &PartitionSlot, image_len: u32) -> CoreResult<()> {
            *self.activated.lock() = Some((slot.index, image_len));
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_update_activates_inactive_slot() {
        let (chip, paged) = flash();
        let table = Arc::new(AbTable {
            activated: Mutex::new(None),
        });
        let format = ImageFormat::headered("OK_OTA");
        let target = OtaTarget::new(format.clone(), OtaDestination::PartitionTable(table.clone()));
        let image = format.build_image(&payload());

        let mut transport = ScriptedTransport::new()
            .chunk(image[300..550].to_vec())
            .chunk(image[550..].to_vec());
        let mut cursor = StreamCursor::new(
            image.len() as i64,
            Bytes::copy_from_slice(&image[..300]),
            &mut transport,
        )
        .unwrap();

        let report = run_update(&target, &paged, &mut cursor).await.unwrap();
        assert_eq!(report.slot, Some(1));
        assert_eq!(*table.activated.lock(), Some((1, 100)));
        assert_eq!(read_back(&chip, 0xC000, 100), payload());
    }

    #[tokio::test]
    async fn run_update_surfaces_transport_failure() {
        let (_, paged) = flash();
        let target = region_target(ImageFormat::Raw);
        let mut transport = ScriptedTransport::new()
            .chunk(vec![1u8; 40])
            .error(crate::TransportError::ReceiveFailed("reset".into()));
        let mut cursor = StreamCursor::new(100, Bytes::new(), &mut transport).unwrap();

        assert!(matches!(
            run_update(&target, &paged, &mut cursor).await,
            Err(CoreError::Io(_))
        ));
    }
}
