//! Feed data integrity hashing.
//!
//! `FeedAction` messages may carry a `FeedMd5` field: the Base64 encoding of
//! the MD5 digest of the canonical JSON form of the post-delta feed data.
//! The client recomputes the hash after applying the deltas and tears the
//! connection down on a mismatch.
//!
//! Canonical JSON here means compact encoding with object keys in sorted
//! order, which is what `serde_json` produces for [`Value`] (its object type
//! is backed by a `BTreeMap`). Array order is preserved.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

/// Returns the canonical JSON encoding of `value`.
///
/// Compact separators, object keys sorted. This must match the encoding the
/// server hashed, byte for byte.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Computes the `FeedMd5` hash of a feed data value.
///
/// # Example
///
/// ```
/// use feedlink_core::integrity::feed_data_hash;
/// use serde_json::json;
///
/// let hash = feed_data_hash(&json!({}));
/// assert_eq!(hash, "mZFLkyvTelC5g8XnyQrpOw==");
/// ```
pub fn feed_data_hash(value: &Value) -> String {
    let digest = md5::compute(canonical_json(value).as_bytes());
    STANDARD.encode(digest.0)
}
