//! Packaging encoded audio files into a bank: header region, data section,
//! trailing table of contents.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use bincode::{config, encode_to_vec};
use tracing::info;

use crate::format::{BankEntry, BankHeader, HEADER_REGION};
use crate::BankError;

/// One file to be packaged, with the metadata recorded in the TOC.
pub struct BankFileSpec<'a> {
    pub handle: u64,
    pub bytes: &'a [u8],
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Write a bank containing `files` to `path`, replacing any existing file.
pub fn write_bank(path: impl AsRef<Path>, files: &[BankFileSpec<'_>]) -> Result<(), BankError> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    // Reserve the header region; it is rewritten once offsets are known.
    out.write_all(&[0u8; HEADER_REGION])?;

    let mut entries = Vec::with_capacity(files.len());
    let mut offset = HEADER_REGION as u64;
    for spec in files {
        out.write_all(spec.bytes)?;
        entries.push(BankEntry {
            handle: spec.handle,
            offset,
            file_size: spec.bytes.len() as u64,
            duration: spec.duration,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        });
        offset += spec.bytes.len() as u64;
    }

    let toc_bytes = encode_to_vec(&entries, config::standard())
        .map_err(|e| BankError::InvalidBank(format!("toc encode: {e}")))?;
    out.write_all(&toc_bytes)?;

    let header = BankHeader::new(offset, &toc_bytes, 0);
    let header_bytes = encode_to_vec(&header, config::standard())
        .map_err(|e| BankError::InvalidBank(format!("header encode: {e}")))?;
    if header_bytes.len() > HEADER_REGION {
        return Err(BankError::InvalidBank("header exceeds reserved region".into()));
    }

    out.seek(SeekFrom::Start(0))?;
    out.write_all(&header_bytes)?;
    out.flush()?;

    info!(
        target: "audio::bank",
        path = %path.display(),
        files = files.len(),
        bytes = offset + toc_bytes.len() as u64,
        "sound bank written"
    );

    Ok(())
}
