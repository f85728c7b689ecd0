use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Streamed BLAKE3 digest of a file's content, hex-encoded.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
