//! BLAKE3 hashing for descriptors, templates, and build artifacts.

use crate::core::error::{Error, Result};
use crate::core::template::{ResourceDescriptor, Template};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash of a descriptor's serialized form (type, properties, dependencies).
pub fn hash_descriptor(descriptor: &ResourceDescriptor) -> Result<String> {
    Ok(hash_string(&serde_json::to_string(descriptor)?))
}

/// Hash of the pretty-printed template, identical to hashing the
/// `template.json` artifact written by `build`.
pub fn hash_template(template: &Template) -> Result<String> {
    Ok(hash_string(&template.to_json_pretty()?))
}
