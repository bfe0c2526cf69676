//! Reading a packaged sound bank: header validation, table of contents,
//! and windowed readers into the data section.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::{config, decode_from_slice};
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::format::{BankEntry, BankHeader, BANK_MAGIC, BANK_VERSION, HEADER_REGION};
use crate::reader::StreamReader;
use crate::BankError;

enum BankStorage {
    Mapped(Mmap),
    File(File),
}

impl BankStorage {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        match self {
            BankStorage::Mapped(map) => {
                let start = offset as usize;
                let end = start + buf.len();
                if end > map.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "read past end of mapped bank",
                    ));
                }
                buf.copy_from_slice(&map[start..end]);
                Ok(())
            }
            BankStorage::File(file) => {
                let mut file = file.try_clone()?;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
        }
    }
}

/// A mounted sound bank. Cheap to share; readers hold a reference to the
/// underlying storage.
pub struct SoundBank {
    storage: Arc<BankStorage>,
    entries: HashMap<u64, BankEntry>,
    path: PathBuf,
    file_len: u64,
}

impl SoundBank {
    /// Open and validate a bank file. The bank is valid when the header
    /// and TOC parse, the TOC hash matches, and every blob is in range.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BankError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < HEADER_REGION as u64 {
            return Err(BankError::InvalidBank("file too small for header".into()));
        }

        let storage = match unsafe { Mmap::map(&file) } {
            Ok(map) => BankStorage::Mapped(map),
            Err(_) => BankStorage::File(file),
        };

        let mut header_bytes = [0u8; HEADER_REGION];
        storage.read_exact_at(0, &mut header_bytes)?;
        let (header, _): (BankHeader, usize) =
            decode_from_slice(&header_bytes, config::standard())
                .map_err(|e| BankError::InvalidBank(format!("header decode: {e}")))?;

        if header.magic != BANK_MAGIC {
            return Err(BankError::InvalidBank("bad magic".into()));
        }
        if header.version != BANK_VERSION {
            return Err(BankError::InvalidBank(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.toc_offset.saturating_add(header.toc_size) > file_len {
            return Err(BankError::InvalidBank("toc out of range".into()));
        }

        let mut toc_bytes = vec![0u8; header.toc_size as usize];
        storage.read_exact_at(header.toc_offset, &mut toc_bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(&toc_bytes);
        if header.toc_hash != hasher.finalize().as_slice() {
            return Err(BankError::InvalidBank("toc hash mismatch".into()));
        }

        let (toc, _): (Vec<BankEntry>, usize) = decode_from_slice(&toc_bytes, config::standard())
            .map_err(|e| BankError::InvalidBank(format!("toc decode: {e}")))?;

        let mut entries = HashMap::with_capacity(toc.len());
        for entry in toc {
            if entry.offset.saturating_add(entry.file_size) > file_len {
                return Err(BankError::InvalidBank(format!(
                    "blob out of range for handle {:#x}",
                    entry.handle
                )));
            }
            entries.insert(entry.handle, entry);
        }

        info!(
            target: "audio::bank",
            path = %path.display(),
            files = entries.len(),
            "sound bank mounted"
        );

        Ok(Self {
            storage: Arc::new(storage),
            entries,
            path,
            file_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn file_info(&self, handle: u64) -> Option<&BankEntry> {
        self.entries.get(&handle)
    }

    pub fn file_size(&self, handle: u64) -> u64 {
        self.entries.get(&handle).map_or(0, |e| e.file_size)
    }

    pub fn handles(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Windowed reader over one blob. `None` when the handle is missing.
    pub fn create_reader_for(&self, handle: u64) -> Option<Box<dyn StreamReader>> {
        let entry = self.entries.get(&handle)?;
        Some(Box::new(BankBlobReader {
            storage: self.storage.clone(),
            offset: entry.offset,
            length: entry.file_size,
            pos: 0,
        }))
    }

    /// Read a whole blob into memory, for preloading.
    pub fn read_file_bytes(&self, handle: u64) -> Result<Vec<u8>, BankError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(BankError::NotFound(handle))?;
        let mut bytes = vec![0u8; entry.file_size as usize];
        self.storage.read_exact_at(entry.offset, &mut bytes)?;
        Ok(bytes)
    }
}

/// Reader restricted to one blob's byte window inside the bank.
struct BankBlobReader {
    storage: Arc<BankStorage>,
    offset: u64,
    length: u64,
    pos: u64,
}

impl Read for BankBlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        let take = (buf.len() as u64).min(remaining) as usize;
        if take == 0 {
            return Ok(0);
        }
        self.storage
            .read_exact_at(self.offset + self.pos, &mut buf[..take])?;
        self.pos += take as u64;
        Ok(take)
    }
}

impl Seek for BankBlobReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.length as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of blob",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl StreamReader for BankBlobReader {
    fn stream_length(&self) -> u64 {
        self.length
    }
}
