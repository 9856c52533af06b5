use serde::Deserialize;

use crate::hash::{Hasher, Murmur3Hasher};

/// A contiguous range of slot numbers assigned to one variation (or, in a container bucket, to
/// one container group).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub start_inclusive: i32,
    pub end_exclusive: i32,
    /// The allocated variation id, or the container group id for container buckets.
    pub variation_id: i64,
}

impl Slot {
    pub fn contains(&self, slot_number: i32) -> bool {
        self.start_inclusive <= slot_number && slot_number < self.end_exclusive
    }
}

/// A hash-sliced space of `slot_size` slots.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: i64,
    pub seed: i32,
    pub slot_size: i32,
    pub slots: Vec<Slot>,
}

impl Bucket {
    /// Returns the slot covering `slot_number`. A number outside every slot is unallocated.
    pub fn slot(&self, slot_number: i32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.contains(slot_number))
    }
}

/// Computes `|hash(identifier, seed)| mod slot_size`.
///
/// The absolute value is taken in 64 bits so that `i32::MIN` maps to a valid slot. `slot_size`
/// must be positive; buckets with a non-positive size are rejected when the workspace is built.
pub fn slot_number(hasher: &dyn Hasher, seed: i32, slot_size: i32, identifier: &str) -> i32 {
    let hash = hasher.hash(identifier, seed) as i64;
    (hash.abs() % slot_size as i64) as i32
}

/// Assigns identifiers to slots of a [Bucket].
pub trait Bucketer: Send + Sync {
    fn bucketing<'a>(&self, bucket: &'a Bucket, identifier: &str) -> Option<&'a Slot>;
}

/// [Bucketer] backed by a [Hasher], MurmurHash3 unless configured otherwise.
pub struct DefaultBucketer {
    hasher: Box<dyn Hasher>,
}

impl DefaultBucketer {
    pub fn new() -> Self {
        Self::with_hasher(Box::new(Murmur3Hasher))
    }

    pub fn with_hasher(hasher: Box<dyn Hasher>) -> Self {
        Self { hasher }
    }
}

impl Default for DefaultBucketer {
    fn default() -> Self {
        Self::new()
    }
}

impl Bucketer for DefaultBucketer {
    fn bucketing<'a>(&self, bucket: &'a Bucket, identifier: &str) -> Option<&'a Slot> {
        let number = slot_number(self.hasher.as_ref(), bucket.seed, bucket.slot_size, identifier);
        bucket.slot(number)
    }
}
