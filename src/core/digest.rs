use sha2::{Digest, Sha256};

/// `sha256:<hex>` digest used for cloned files and content checks.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("sha256:{:x}", hasher.finalize())
}
