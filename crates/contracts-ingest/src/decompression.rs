//! Decompression helpers for snapshot archives
//!
//! Snapshots are published as bzip2-compressed tarballs (`.tar.bz2`).
//!
//! ```rust,ignore
//! use contracts_ingest::decompression::{decompress_bzip2, extract_tar_members};
//!
//! let tar = decompress_bzip2(&compressed)?;
//! let members = extract_tar_members(&tar, &["contracts.csv", "contract_items.csv"])?;
//! ```

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use bzip2::read::MultiBzDecoder;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Decompress bzip2-compressed data (parallel compressors emit several
/// concatenated streams; all of them are read)
pub fn decompress_bzip2(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiBzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SyncError::decode(format!("failed to decompress bzip2 data: {}", e)))?;
    debug!(compressed = data.len(), decompressed = decompressed.len(), "Decompressed bzip2");
    Ok(decompressed)
}

/// Extract the named members from an uncompressed tar archive.
///
/// Members are matched on the last component of their path, so
/// `snapshot/contracts.csv` matches `contracts.csv`. Names that are not in the
/// archive are simply absent from the result.
pub fn extract_tar_members(data: &[u8], names: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let wanted: HashSet<&str> = names.iter().copied().collect();
    let mut archive = tar::Archive::new(Cursor::new(data));
    let mut found = HashMap::new();

    let entries = archive
        .entries()
        .map_err(|e| SyncError::decode(format!("failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| SyncError::decode(format!("failed to read tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let file_name = entry
            .path()
            .map_err(|e| SyncError::decode(format!("invalid tar entry path: {}", e)))?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        let Some(file_name) = file_name.filter(|n| wanted.contains(n.as_str())) else {
            continue;
        };

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| SyncError::decode(format!("failed to read {}: {}", file_name, e)))?;
        debug!(member = %file_name, bytes = contents.len(), "Extracted tar member");
        found.insert(file_name, contents);
    }

    Ok(found)
}

/// Decompress a `.tar.bz2` and extract the named members
pub fn extract_tar_bz2_members(data: &[u8], names: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let tar = decompress_bzip2(data)?;
    extract_tar_members(&tar, names)
}
