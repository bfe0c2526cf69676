//! Seekable byte-stream access to encoded audio, either windowed into a
//! bank or backed by a loose file in editor mode.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use symphonia::core::io::MediaSource;

/// A seekable reader over one encoded audio blob.
///
/// Extends `Read + Seek` with the stream length the decoding layer needs.
/// All implementations must be shippable across threads.
pub trait StreamReader: Read + Seek + Send + Sync {
    /// Total length of the underlying stream in bytes.
    fn stream_length(&self) -> u64;

    /// Current read position.
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

/// Host-supplied resolver from asset handles to byte streams, used when no
/// bank is mounted (editor mode) or as a fallback for missing entries.
pub trait AssetBackend: Send + Sync {
    fn create_reader(&self, handle: u64) -> Option<Box<dyn StreamReader>>;
    fn file_size(&self, handle: u64) -> usize;
}

/// Plain filesystem reader, the editor-mode fallback.
pub struct FileStreamReader {
    file: File,
    length: u64,
}

impl FileStreamReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Self { file, length })
    }
}

impl Read for FileStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileStreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl StreamReader for FileStreamReader {
    fn stream_length(&self) -> u64 {
        self.length
    }
}

/// Adapter exposing any [`StreamReader`] as a symphonia media source.
pub struct MediaSourceAdapter {
    inner: Box<dyn StreamReader>,
}

impl MediaSourceAdapter {
    pub fn new(inner: Box<dyn StreamReader>) -> Self {
        Self { inner }
    }
}

impl Read for MediaSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for MediaSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for MediaSourceAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.inner.stream_length())
    }
}

/// In-memory reader over an owned byte buffer. Used for preloaded blobs
/// and test fixtures.
pub struct MemoryStreamReader {
    cursor: io::Cursor<Vec<u8>>,
}

impl MemoryStreamReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: io::Cursor::new(bytes),
        }
    }
}

impl Read for MemoryStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryStreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StreamReader for MemoryStreamReader {
    fn stream_length(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reader_round_trips() {
        let mut reader = MemoryStreamReader::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.stream_length(), 5);

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert_eq!(reader.tell().unwrap(), 2);

        reader.seek(SeekFrom::End(-1)).unwrap();
        reader.read_exact(&mut buf[..1]).unwrap();
        assert_eq!(buf[0], 5);
    }
}
