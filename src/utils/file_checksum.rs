//! File checksum calculation module.
//!
//! This module provides functionality to calculate SHA256 checksums of files. Uploaded archives
//! are hashed while installing so that the installed content can be traced back to its upload.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Calculates the SHA256 checksum of a file.
///
/// The file is read in chunks, so large archives are never held in memory as a whole.
///
/// # Arguments
///
/// * `path` - The path to the file for which to calculate the checksum.
///
/// # Returns
///
/// * `Ok(String)` - The SHA256 checksum of the file as a hexadecimal string.
/// * `Err` - If the file cannot be opened or read.
pub(crate) fn calculate_sha256_checksum<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    // Convert the hash to a hexadecimal string
    Ok(format!("{:x}", hasher.finalize()))
}

//
// Tests
