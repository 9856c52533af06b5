use std::io::Cursor;

use log::warn;

/// A deterministic 32-bit hash of `(data, seed)`.
///
/// Implementations must be pure: bucketing relies on every SDK producing the same hash for the
/// same input.
pub trait Hasher: Send + Sync {
    fn hash(&self, data: &str, seed: i32) -> i32;
}

/// MurmurHash3 x86 32-bit over the UTF-8 bytes of the input.
#[derive(Clone, Copy, Debug, Default)]
pub struct Murmur3Hasher;

impl Hasher for Murmur3Hasher {
    fn hash(&self, data: &str, seed: i32) -> i32 {
        match murmur3::murmur3_32(&mut Cursor::new(data.as_bytes()), seed as u32) {
            Ok(hash) => hash as i32,
            Err(e) => {
                warn!("failed to hash '{}' with seed {}: {}", data, seed, e);
                0
            }
        }
    }
}
