//! Checksummed binary blobs for index snapshots.
//!
//! Layout: `[payload][magic 4 bytes][u32 CRC32 LE]`. Writes go to a uniquely
//! named temp file that is renamed into place, so a crash leaves either the old
//! or the new blob.

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use crate::core::error::{Error, Result};

/// Replace `path` with `bytes` through a private temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn write_blob(path: &Path, magic: &[u8; 4], payload: &[u8]) -> Result<()> {
    let crc = crc32fast::hash(payload);
    let mut output = Vec::with_capacity(payload.len() + 8);
    output.extend_from_slice(payload);
    output.extend_from_slice(magic);
    output.extend_from_slice(&crc.to_le_bytes());

    write_atomic(path, &output)
}

pub fn read_blob(path: &Path, magic: &[u8; 4]) -> Result<Vec<u8>> {
    let mut data = fs::read(path)?;
    if data.len() < 8 {
        return Err(Error::internal(format!("snapshot {:?} too short", path)));
    }
    let footer = data.split_off(data.len() - 8);
    if &footer[..4] != magic {
        return Err(Error::internal(format!("snapshot {:?} has wrong magic", path)));
    }
    let stored = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(&data);
    if stored != computed {
        return Err(Error::internal(format!(
            "snapshot {:?} CRC mismatch: stored {:#010x}, computed {:#010x}", path, stored, computed
        )));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored);
    Ok(data)
}
