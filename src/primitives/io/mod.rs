#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use crate::types::{ArborError, Result};

/// Positioned file I/O used by the pager.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` with the bytes stored at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, growing the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes.
    fn set_len(&self, len: u64) -> Result<()>;
}

/// Repeats a positioned transfer until `len` bytes have moved. A transfer
/// that moves nothing ends with `stalled`.
fn transfer_fully(
    len: usize,
    mut off: u64,
    stalled: io::ErrorKind,
    mut step: impl FnMut(usize, u64) -> io::Result<usize>,
) -> io::Result<()> {
    let mut done = 0;
    while done < len {
        match step(done, off)? {
            0 => return Err(io::Error::new(stalled, "page transfer stopped short")),
            n => {
                done += n;
                off += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
use std::os::unix::fs::FileExt as _;
#[cfg(windows)]
use std::os::windows::fs::FileExt as _;

#[cfg(unix)]
fn positional_read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    file.read_at(dst, off)
}

#[cfg(windows)]
fn positional_read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    file.seek_read(dst, off)
}

#[cfg(unix)]
fn positional_write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    file.write_at(src, off)
}

#[cfg(windows)]
fn positional_write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    file.seek_write(src, off)
}

/// [`FileIo`] over a shared `std::fs::File`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Creates a new file, failing if one already exists at `path`.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file for reading and writing.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }

    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        let len = dst.len();
        transfer_fully(len, off, io::ErrorKind::UnexpectedEof, |done, at| {
            positional_read(self.file(), &mut dst[done..], at)
        })
    }

    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        transfer_fully(src.len(), off, io::ErrorKind::WriteZero, |done, at| {
            positional_write(self.file(), &src[done..], at)
        })
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(ArborError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.write_all(off, src).map_err(ArborError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(ArborError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.file().set_len(len).map_err(ArborError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_at_offset() -> Result<()> {
        let dir = tempdir()?;
        let io = StdFileIo::create_new(dir.path().join("io.bin"))?;

        io.write_at(512, b"leaf bytes")?;
        io.sync_all()?;

        let mut buf = [0u8; 10];
        io.read_at(512, &mut buf)?;
        assert_eq!(&buf, b"leaf bytes");
        assert_eq!(io.len()?, 522);
        Ok(())
    }

    #[test]
    fn read_past_eof_returns_error() -> Result<()> {
        let dir = tempdir()?;
        let io = StdFileIo::create_new(dir.path().join("io.bin"))?;
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf) {
            Err(ArborError::Io(inner)) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn create_new_refuses_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("io.bin");
        StdFileIo::create_new(&path)?.set_len(1024)?;
        assert!(StdFileIo::create_new(&path).is_err());
        assert_eq!(StdFileIo::open_existing(&path)?.len()?, 1024);
        Ok(())
    }
}
