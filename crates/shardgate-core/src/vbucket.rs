//! Key to vbucket hashing.
//!
//! The service assigns every key to one of a bucket's vbuckets with a CRC32
//! of the key. Using the exact same function on the client lets a call go
//! straight to the node that holds the vbucket locally. A mismatch would
//! still be served correctly, just with an extra hop on the server side.

/// Default number of vbuckets per bucket.
pub const DEFAULT_NUM_VBUCKETS: u32 = 1024;

/// Mask clearing the top bit of the middle 16 bits of the checksum.
const VBUCKET_HASH_MASK: u32 = 0x7FFF;

/// Largest vbucket count a bucket may declare. The hash never yields an id
/// at or above this value.
pub const MAX_NUM_VBUCKETS: u32 = VBUCKET_HASH_MASK + 1;

/// Compute the vbucket id for a key.
///
/// The id is `((crc32(key) >> 16) & 0x7FFF) % num_vbuckets`, using the
/// IEEE CRC32 polynomial.
///
/// Returns `None` when `num_vbuckets` is 0.
///
/// # Example
///
/// ```
/// use shardgate_core::vbucket::vbucket_for_key;
///
/// let vb = vbucket_for_key(b"123456789", 1024);
/// assert_eq!(vb, Some(1012));
/// ```
pub fn vbucket_for_key(key: &[u8], num_vbuckets: u32) -> Option<u32> {
    if num_vbuckets == 0 {
        return None;
    }

    let crc = crc32fast::hash(key);
    Some(((crc >> 16) & VBUCKET_HASH_MASK) % num_vbuckets)
}
