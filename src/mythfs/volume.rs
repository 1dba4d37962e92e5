//! Byte-addressable I/O against the backing image.
//!
//! `Volume` owns a single [`File`] handle. It does not lock or otherwise
//! guard against concurrent access: nothing in this crate permits
//! concurrent operations on the same volume, and a caller that shares one
//! across threads or processes must serialize access itself.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A backing disk image, addressed by byte offset.
pub struct Volume {
    file: File,
}

impl Volume {
    /// Opens the image at `path` for reading and writing, creating it if
    /// `create` is set.
    pub fn open(path: &Path, create: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Truncates (or extends) the backing image to exactly `len` bytes.
    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    /// Reads `buf.len()` bytes starting at byte offset `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    /// Writes `buf` starting at byte offset `offset`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    /// Reads a single byte at `offset`.
    pub fn read_byte_at(&mut self, offset: u64) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_at(offset, &mut b)?;
        Ok(b[0])
    }

    /// Writes a single byte at `offset`.
    pub fn write_byte_at(&mut self, offset: u64, b: u8) -> io::Result<()> {
        self.write_at(offset, &[b])
    }
}
