use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use super::BackupError;
use crate::domain::entities::backup::Backup;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Varint, length prefixed binary encoding compressed with gzip
pub fn encode(backup: &Backup) -> Result<Vec<u8>, BackupError> {
    let bytes = bincode::serde::encode_to_vec(backup, bincode::config::standard())?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes)?;
    Ok(encoder.finish()?)
}

/// Decodes a backup, plain uncompressed files are accepted too
pub fn decode(data: &[u8]) -> Result<Backup, BackupError> {
    let bytes = if data.starts_with(&GZIP_MAGIC) {
        let mut bytes = vec![];
        GzDecoder::new(data).read_to_end(&mut bytes)?;
        bytes
    } else {
        data.to_vec()
    };

    let (backup, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(backup)
}
