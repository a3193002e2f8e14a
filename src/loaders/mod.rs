/*
 * Program Loaders
 *
 * The filesystem is an external collaborator; the loader reaches it
 * through the narrow `BlockFile` interface below. Opening a file by path
 * is the filesystem's business - callers hand the loader an already-open
 * file.
 */

mod elf;

pub use elf::{exec, exec_elf, ElfError};

use core::fmt;

/// A readable, seekable view of one stored file.
pub trait BlockFile {
    /// Move the read position to `offset` bytes from the start.
    fn seek(&mut self, offset: u32) -> Result<(), FileError>;

    /// Read up to `buf.len()` bytes at the current position. Returns the
    /// number of bytes actually read; short reads mean end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError>;
}

/// Failure surfaced by the block-device/file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// Seek target outside the file.
    OutOfRange,
    /// The device failed the transfer.
    Io,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::OutOfRange => write!(f, "seek out of range"),
            FileError::Io => write!(f, "block device I/O error"),
        }
    }
}
