//! On-disk layout of the sound bank: a fixed-size header region, the
//! concatenated encoded audio blobs, and a bincode table of contents whose
//! integrity is pinned by a SHA-256 hash in the header.

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};

pub const BANK_MAGIC: u32 = 0x3142_5348; // "HSB1"
pub const BANK_VERSION: u16 = 1;

/// Default bank file name inside a project directory.
pub const BANK_FILE_NAME: &str = "SoundBank.hsb";

/// Size of the reserved header region at the start of the file.
pub const HEADER_REGION: usize = 128;

#[derive(Encode, Decode, Debug, Clone)]
pub struct BankHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub toc_offset: u64,
    pub toc_size: u64,
    pub toc_hash: [u8; 32],
}

impl BankHeader {
    pub fn new(toc_offset: u64, toc_bytes: &[u8], flags: u16) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(toc_bytes);
        let digest = hasher.finalize();
        let mut toc_hash = [0u8; 32];
        toc_hash.copy_from_slice(&digest);
        Self {
            magic: BANK_MAGIC,
            version: BANK_VERSION,
            flags,
            toc_offset,
            toc_size: toc_bytes.len() as u64,
            toc_hash,
        }
    }
}

/// One table-of-contents record describing an encoded audio blob.
#[derive(Encode, Decode, Debug, Clone)]
pub struct BankEntry {
    pub handle: u64,
    pub offset: u64,
    pub file_size: u64,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}
