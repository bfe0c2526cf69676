//! The packaged sound-bank asset: an asset-handle-keyed archive of encoded
//! audio blobs plus per-file metadata, consumed by the runtime instead of
//! loose files. Also home to the stream-reader abstraction the resource
//! manager hands out and the decoding layer on top of it.

pub mod bank;
pub mod decoder;
pub mod format;
pub mod reader;
pub mod streaming;
pub mod writer;

pub use bank::SoundBank;
pub use decoder::{decode_all, decode_reader, probe_info, AudioFileInfo, PcmBuffer};
pub use format::{BankEntry, BankHeader, BANK_FILE_NAME, BANK_MAGIC, BANK_VERSION};
pub use reader::{AssetBackend, FileStreamReader, StreamReader};
pub use streaming::{open_stream, StreamPump, StreamTap};
pub use writer::{write_bank, BankFileSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sound bank: {0}")]
    InvalidBank(String),
    #[error("asset {0:#x} not present in the bank")]
    NotFound(u64),
    #[error("failed to decode audio data: {0}")]
    Decode(String),
    #[error("unsupported audio data: {0}")]
    Unsupported(String),
}
