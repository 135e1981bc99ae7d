//! Paged, bounds-checked access to raw flash
//!
//! Reads and writes move through fixed-size pages so that peak memory stays
//! at one page no matter how large the region is. Destination bounds come
//! from request parameters, so a [`RegionWriter`] rechecks its region against
//! the device capacity on every write instead of trusting an earlier check.

use std::sync::Arc;

use serde::Serialize;

use crate::device::{BodyTransport, FlashDevice, FlashError};
use crate::error::{CoreError, CoreResult};
use crate::stream::StreamCursor;

/// Default page size for flash transfers
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// A bounded flash address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashRegion {
    pub start: u32,
    pub len: u32,
}

impl FlashRegion {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Region covering `[start, end)`
    pub fn from_bounds(start: u32, end: u32) -> CoreResult<Self> {
        if end < start {
            return Err(CoreError::Bounds(format!(
                "region end 0x{:06X} before start 0x{:06X}",
                end, start
            )));
        }
        Ok(Self::new(start, end - start))
    }

    /// One past the last address, widened so it cannot overflow
    pub fn end(&self) -> u64 {
        self.start as u64 + self.len as u64
    }

    /// Fail unless the whole region lies within `capacity` bytes
    pub fn check(&self, capacity: u32) -> CoreResult<()> {
        if self.end() > capacity as u64 {
            return Err(CoreError::Bounds(format!(
                "region 0x{:06X}+0x{:X} exceeds flash capacity 0x{:06X}",
                self.start, self.len, capacity
            )));
        }
        Ok(())
    }
}

impl From<FlashError> for CoreError {
    fn from(err: FlashError) -> Self {
        match err {
            FlashError::OutOfRange { .. } => CoreError::Bounds(err.to_string()),
            FlashError::Misaligned(_) | FlashError::Device(_) => CoreError::Io(err.to_string()),
        }
    }
}

/// Consumer of pages produced by [`PagedFlash::read_region`]
pub trait PageSink {
    fn accept(&mut self, page: &[u8]) -> CoreResult<()>;
}

impl PageSink for Vec<u8> {
    fn accept(&mut self, page: &[u8]) -> CoreResult<()> {
        self.extend_from_slice(page);
        Ok(())
    }
}

/// Page-oriented front end to a [`FlashDevice`]
#[derive(Clone)]
pub struct PagedFlash {
    device: Arc<dyn FlashDevice>,
    page_size: usize,
}

impl PagedFlash {
    pub fn new(device: Arc<dyn FlashDevice>, page_size: usize) -> Self {
        Self {
            device,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> u32 {
        self.device.capacity()
    }

    /// Iterate over `region` one page at a time
    pub fn pages(&self, region: FlashRegion) -> CoreResult<RegionPages> {
        region.check(self.device.capacity())?;
        Ok(RegionPages {
            device: self.device.clone(),
            next: region.start as u64,
            end: region.end(),
            page_size: self.page_size,
        })
    }

    /// Read `region` into `sink`, returning the bytes delivered
    pub fn read_region(&self, region: FlashRegion, sink: &mut impl PageSink) -> CoreResult<u64> {
        let mut total = 0u64;
        for page in self.pages(region)? {
            let page = page?;
            sink.accept(&page)?;
            total += page.len() as u64;
        }
        Ok(total)
    }

    /// Open a writer positioned at the start of `region`
    pub fn writer(&self, region: FlashRegion) -> CoreResult<RegionWriter> {
        region.check(self.device.capacity())?;
        Ok(RegionWriter {
            device: self.device.clone(),
            region,
            offset: 0,
            erased_until: region.start as u64,
            page_size: self.page_size,
        })
    }

    /// Drain `cursor` into `region`, returning the bytes written.
    ///
    /// A body that declares more bytes than the region holds is refused
    /// before anything is written.
    pub async fn write_region<T: BodyTransport + ?Sized>(
        &self,
        region: FlashRegion,
        cursor: &mut StreamCursor<'_, T>,
    ) -> CoreResult<u64> {
        let mut writer = self.writer(region)?;
        if cursor.remaining() > region.len as u64 {
            return Err(CoreError::Bounds(format!(
                "{} byte body does not fit region 0x{:06X}+0x{:X}",
                cursor.remaining(),
                region.start,
                region.len
            )));
        }

        while let Some(chunk) = cursor.pull(self.page_size).await? {
            writer.write(chunk)?;
        }

        tracing::debug!(
            start = format_args!("0x{:06X}", region.start),
            written = writer.written(),
            "flash region written"
        );
        Ok(writer.written())
    }
}

/// Iterator over the pages of a validated region
pub struct RegionPages {
    device: Arc<dyn FlashDevice>,
    next: u64,
    end: u64,
    page_size: usize,
}

impl Iterator for RegionPages {
    type Item = CoreResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let len = (self.end - self.next).min(self.page_size as u64) as usize;
        let mut page = vec![0u8; len];
        let addr = self.next as u32;
        self.next += len as u64;
        Some(self.device.read(addr, &mut page).map(|_| page).map_err(Into::into))
    }
}

/// Sequential writer into one region.
///
/// Erasure is sector-granular: the first write entering an erase sector
/// erases that whole sector. Bytes of a partially covered sector that lie
/// outside the region are read first and programmed back after the erase.
pub struct RegionWriter {
    device: Arc<dyn FlashDevice>,
    region: FlashRegion,
    offset: u32,
    erased_until: u64,
    page_size: usize,
}

impl RegionWriter {
    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.offset as u64
    }

    /// Append `data` at the current offset.
    ///
    /// Nothing is written when the region fails its capacity check or `data`
    /// would run past the end of the region.
    pub fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.region.check(self.device.capacity())?;

        let end = self.offset as u64 + data.len() as u64;
        if end > self.region.len as u64 {
            return Err(CoreError::Bounds(format!(
                "write of {} bytes at offset 0x{:X} overruns region 0x{:06X}+0x{:X}",
                data.len(),
                self.offset,
                self.region.start,
                self.region.len
            )));
        }

        let mut addr = self.region.start as u64 + self.offset as u64;
        self.erase_through(addr + data.len() as u64)?;

        for piece in data.chunks(self.page_size) {
            self.device.write(addr as u32, piece)?;
            addr += piece.len() as u64;
        }
        self.offset = end as u32;
        Ok(())
    }

    fn erase_through(&mut self, end: u64) -> CoreResult<()> {
        let sector = self.device.erase_size().max(1) as u64;
        while self.erased_until < end {
            let sector_start = self.erased_until / sector * sector;
            self.erase_sector(sector_start, sector)?;
            self.erased_until = sector_start + sector;
        }
        Ok(())
    }

    /// Erase one sector, keeping its bytes outside the region
    fn erase_sector(&self, sector_start: u64, sector: u64) -> CoreResult<()> {
        let sector_end = (sector_start + sector).min(self.device.capacity() as u64);
        let head = sector_start..(self.region.start as u64).max(sector_start);
        let tail = self.region.end().min(sector_end)..sector_end;

        let mut kept = Vec::new();
        for span in [head, tail] {
            if span.is_empty() {
                continue;
            }
            let mut bytes = vec![0u8; (span.end - span.start) as usize];
            self.device.read(span.start as u32, &mut bytes)?;
            if bytes.iter().any(|&b| b != 0xFF) {
                kept.push((span.start as u32, bytes));
            }
        }

        self.device.erase(sector_start as u32, sector as u32)?;
        tracing::trace!(sector = format_args!("0x{:06X}", sector_start), kept = kept.len(), "erased");

        for (addr, bytes) in kept {
            self.device.write(addr, &bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::testing::{RamFlash, ScriptedTransport};

    const CAPACITY: u32 = 0x10000;

    fn flash() -> (Arc<RamFlash>, PagedFlash) {
        let chip = Arc::new(RamFlash::new(CAPACITY, 0x1000));
        let paged = PagedFlash::new(chip.clone(), 1024);
        (chip, paged)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_, paged) = flash();
        let data = payload(5000);
        let region = FlashRegion::new(0x2000, data.len() as u32);

        let mut transport = ScriptedTransport::new().chunk(data[1000..].to_vec());
        let mut cursor =
            StreamCursor::new(5000, Bytes::copy_from_slice(&data[..1000]), &mut transport).unwrap();
        assert_eq!(paged.write_region(region, &mut cursor).await.unwrap(), 5000);

        let mut out = Vec::new();
        assert_eq!(paged.read_region(region, &mut out).unwrap(), 5000);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn region_past_capacity_writes_nothing() {
        let (chip, paged) = flash();
        let before = chip.snapshot();
        let region = FlashRegion::new(CAPACITY - 16, 32);

        let mut transport = ScriptedTransport::new();
        let mut cursor = StreamCursor::new(32, Bytes::from(vec![0u8; 32]), &mut transport).unwrap();
        let err = paged.write_region(region, &mut cursor).await.unwrap_err();

        assert!(matches!(err, CoreError::Bounds(_)));
        assert_eq!(chip.snapshot(), before);
        assert_eq!(chip.stats().writes, 0);
    }

    #[tokio::test]
    async fn body_larger_than_region_is_refused_up_front() {
        let (chip, paged) = flash();
        let region = FlashRegion::new(0, 100);

        let mut transport = ScriptedTransport::new();
        let mut cursor = StreamCursor::new(101, Bytes::from(vec![0u8; 101]), &mut transport).unwrap();
        assert!(matches!(
            paged.write_region(region, &mut cursor).await,
            Err(CoreError::Bounds(_))
        ));
        assert_eq!(chip.stats().writes, 0);
    }

    #[test]
    fn writer_rejects_overrun_without_writing_the_chunk() {
        let (chip, paged) = flash();
        let mut writer = paged.writer(FlashRegion::new(0, 10)).unwrap();

        writer.write(&[1; 8]).unwrap();
        let writes = chip.stats().writes;
        assert!(matches!(writer.write(&[2; 3]), Err(CoreError::Bounds(_))));
        assert_eq!(chip.stats().writes, writes);
        assert_eq!(writer.written(), 8);
    }

    #[test]
    fn writer_erases_each_sector_once() {
        let (chip, paged) = flash();
        let mut writer = paged.writer(FlashRegion::new(0x1000, 0x3000)).unwrap();

        for _ in 0..12 {
            writer.write(&[0xA5; 1024]).unwrap();
        }
        assert_eq!(chip.stats().erases, 3);

        let mut out = Vec::new();
        paged.read_region(FlashRegion::new(0x1000, 0x3000), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn unaligned_region_keeps_neighbouring_bytes() {
        let (chip, paged) = flash();
        paged.writer(FlashRegion::new(0x2000, 0x800)).unwrap().write(&[0x11; 0x800]).unwrap();
        paged.writer(FlashRegion::new(0x2900, 0x100)).unwrap().write(&[0x33; 0x100]).unwrap();

        paged.writer(FlashRegion::new(0x2800, 0x10)).unwrap().write(&[0x22; 0x10]).unwrap();

        let snapshot = chip.snapshot();
        assert!(snapshot[0x2000..0x2800].iter().all(|&b| b == 0x11));
        assert!(snapshot[0x2800..0x2810].iter().all(|&b| b == 0x22));
        assert!(snapshot[0x2810..0x2900].iter().all(|&b| b == 0xFF));
        assert!(snapshot[0x2900..0x2A00].iter().all(|&b| b == 0x33));
    }

    #[test]
    fn rewriting_a_region_replaces_old_content() {
        let (_, paged) = flash();
        let region = FlashRegion::new(0, 4);

        paged.writer(region).unwrap().write(&[0x0F; 4]).unwrap();
        paged.writer(region).unwrap().write(&[0xF0; 4]).unwrap();

        let mut out = Vec::new();
        paged.read_region(region, &mut out).unwrap();
        assert_eq!(out, vec![0xF0; 4]);
    }

    #[test]
    fn pages_are_bounded_by_page_size() {
        let (_, paged) = flash();
        let sizes: Vec<usize> = paged
            .pages(FlashRegion::new(0, 2500))
            .unwrap()
            .map(|p| p.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn read_out_of_range_is_bounds_error() {
        let (_, paged) = flash();
        let mut out = Vec::new();
        assert!(matches!(
            paged.read_region(FlashRegion::new(CAPACITY, 1), &mut out),
            Err(CoreError::Bounds(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn from_bounds_rejects_inverted_range() {
        assert!(FlashRegion::from_bounds(10, 5).is_err());
        assert_eq!(FlashRegion::from_bounds(5, 10).unwrap(), FlashRegion::new(5, 5));
    }
}
