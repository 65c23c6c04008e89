//! Positioned access to the block device (or image file) backing a volume.

use crate::crypto::SECTOR_SIZE;
use crate::error::{LuksError, LuksResult};
use crate::header::{LuksHeader, LUKS_PHDR_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BlockDevice {
    path: PathBuf,
    file: File,
    writable: bool,
}

impl BlockDevice {
    pub fn open(path: &Path, writable: bool) -> LuksResult<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            writable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device size in bytes. Seeks to the end so block devices, whose
    /// metadata reports zero, are measured correctly.
    pub fn size_bytes(&self) -> LuksResult<u64> {
        let mut handle = &self.file;
        Ok(handle.seek(SeekFrom::End(0))?)
    }

    pub fn size_sectors(&self) -> LuksResult<u64> {
        Ok(self.size_bytes()? / SECTOR_SIZE as u64)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> LuksResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> LuksResult<()> {
        if !self.writable {
            return Err(LuksError::InvalidArgument(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    pub fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> LuksResult<()> {
        self.read_at(sector * SECTOR_SIZE as u64, buf)
    }

    pub fn write_sectors(&self, sector: u64, buf: &[u8]) -> LuksResult<()> {
        self.write_at(sector * SECTOR_SIZE as u64, buf)
    }

    pub fn sync(&self) -> LuksResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Decode the header at offset 0, reporting any failure as `NotLuks`.
    pub fn read_header(&self) -> LuksResult<LuksHeader> {
        let mut buf = vec![0u8; LUKS_PHDR_SIZE];
        let read = self.file.read_at(&mut buf, 0).map_err(|err| self.not_luks(err))?;
        LuksHeader::decode(&buf[..read]).map_err(|err| self.not_luks(err))
    }

    pub fn write_header(&self, header: &LuksHeader) -> LuksResult<()> {
        let bytes = header.encode()?;
        self.write_at(0, &bytes)?;
        self.sync()
    }

    fn not_luks(&self, reason: impl ToString) -> LuksError {
        LuksError::NotLuks {
            device: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn size_and_positioned_io() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(64 * 1024).unwrap();

        let device = BlockDevice::open(image.path(), true).unwrap();
        assert_eq!(device.size_sectors().unwrap(), 128);

        device.write_sectors(3, &[0xabu8; 512]).unwrap();
        let mut back = [0u8; 512];
        device.read_sectors(3, &mut back).unwrap();
        assert_eq!(back, [0xabu8; 512]);
    }

    #[test]
    fn read_only_refuses_writes() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(4096).unwrap();
        let device = BlockDevice::open(image.path(), false).unwrap();
        assert!(matches!(
            device.write_at(0, &[1, 2, 3]).unwrap_err(),
            LuksError::InvalidArgument(_)
        ));
    }

    #[test]
    fn blank_device_is_not_luks() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(4096).unwrap();
        let device = BlockDevice::open(image.path(), false).unwrap();
        match device.read_header().unwrap_err() {
            LuksError::NotLuks { device: path, .. } => assert_eq!(path, image.path()),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
