//! Simulated NOR flash
//!
//! Cell contents live in RAM. When opened with an image file, every erase
//! and write is mirrored to the file so the chip survives a restart.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fwrest_core::testing::RamFlash;
use fwrest_core::{FlashDevice, FlashError};
use parking_lot::Mutex;

/// NOR flash chip of the simulated device
pub struct SimFlash {
    cells: RamFlash,
    image: Option<Mutex<ImageFile>>,
}

struct ImageFile {
    path: PathBuf,
    file: File,
}

impl ImageFile {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()
    }
}

impl SimFlash {
    /// Fully erased chip held only in memory
    pub fn new(capacity: u32, erase_size: u32) -> Self {
        Self {
            cells: RamFlash::new(capacity, erase_size),
            image: None,
        }
    }

    /// Chip backed by the image at `path`.
    ///
    /// An existing image is loaded (a shorter one is padded with erased
    /// bytes, a longer one is cut to `capacity`); a missing one is created
    /// fully erased.
    pub fn open(path: impl AsRef<Path>, capacity: u32, erase_size: u32) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut image = Vec::new();
        file.read_to_end(&mut image)?;
        let loaded = image.len();
        image.resize(capacity as usize, 0xFF);

        file.set_len(capacity as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&image)?;
        file.flush()?;

        tracing::info!(
            path = %path.display(),
            loaded,
            capacity,
            "flash image opened"
        );

        Ok(Self {
            cells: RamFlash::from_image(&image, capacity, erase_size),
            image: Some(Mutex::new(ImageFile { path, file })),
        })
    }

    /// Copy of the whole chip
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.snapshot()
    }

    /// Mirror `len` bytes at `addr` into the image file
    fn persist(&self, addr: u32, len: usize) -> Result<(), FlashError> {
        let Some(image) = &self.image else {
            return Ok(());
        };

        let mut span = vec![0u8; len];
        self.cells.read(addr, &mut span)?;

        let mut image = image.lock();
        image.write_at(addr as u64, &span).map_err(|e| {
            tracing::error!(path = %image.path.display(), addr, error = %e, "flash image update failed");
            FlashError::Device(format!("image file {}: {}", image.path.display(), e))
        })
    }
}

impl FlashDevice for SimFlash {
    fn capacity(&self) -> u32 {
        self.cells.capacity()
    }

    fn erase_size(&self) -> u32 {
        self.cells.erase_size()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.cells.read(addr, buf)
    }

    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        tracing::trace!(addr = format_args!("0x{:06X}", addr), len, "erase");
        self.cells.erase(addr, len)?;
        self.persist(addr, len as usize)
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.cells.write(addr, data)?;
        self.persist(addr, data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        {
            let flash = SimFlash::open(&path, 0x4000, 0x1000).unwrap();
            flash.erase(0x1000, 0x1000).unwrap();
            flash.write(0x1000, b"firmware").unwrap();
        }

        let flash = SimFlash::open(&path, 0x4000, 0x1000).unwrap();
        let mut buf = [0u8; 8];
        flash.read(0x1000, &mut buf).unwrap();
        assert_eq!(&buf, b"firmware");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x4000);
    }

    #[test]
    fn short_image_is_padded_erased() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        std::fs::write(&path, [0x00u8; 16]).unwrap();

        let flash = SimFlash::open(&path, 0x2000, 0x1000).unwrap();
        let snapshot = flash.snapshot();
        assert!(snapshot[..16].iter().all(|&b| b == 0x00));
        assert!(snapshot[16..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn nor_semantics_without_erase() {
        let flash = SimFlash::new(0x2000, 0x1000);
        flash.write(0, &[0x0F]).unwrap();
        flash.write(0, &[0xF1]).unwrap();
        let mut buf = [0u8; 1];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x01);
    }

    #[test]
    fn out_of_range_is_reported() {
        let flash = SimFlash::new(0x1000, 0x1000);
        assert!(matches!(
            flash.write(0xFFF, &[0, 0]),
            Err(FlashError::OutOfRange { .. })
        ));
    }
}
