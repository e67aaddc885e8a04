//! Hash slot calculation and pre-dispatch key validation.
//!
//! Cluster nodes use CRC16 to map keys to slots (0-16383). A key containing a
//! `{...}` hash tag hashes only the tag, which lets callers co-locate related
//! keys. Everything here is pure: no I/O, no shared state.

use bytes::Bytes;
use crc::{Crc, CRC_16_XMODEM};

use crate::{Error, Result};

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM (poly 0x1021, init 0), the variant cluster nodes hash with.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Glob metacharacters recognised by KEYS and SCAN MATCH.
const GLOB_META: &[u8] = b"*?[\\";

/// Calculates the cluster slot for a given key.
///
/// If the key contains `{...}` with a non-empty interior, only the interior
/// of the first such pair is hashed. An empty key hashes to slot 0.
///
/// # Examples
///
/// ```
/// use shardline::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// assert_eq!(key_slot(""), 0);
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Extracts the hash tag from a key.
///
/// - `{user1000}.following` → `user1000`
/// - `foo{bar}baz` → `bar`
/// - `foo{}{bar}` → the whole key (first pair is empty)
/// - `foo` → the whole key
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    hash_tag_bounds(key)
        .map(|(start, end)| &key[start..end])
        .unwrap_or(key)
}

/// Byte range of a non-empty hash tag: the first `{` and the next `}` after it.
fn hash_tag_bounds(key: &[u8]) -> Option<(usize, usize)> {
    let open = key.iter().position(|&b| b == b'{')?;
    let start = open + 1;
    let len = key[start..].iter().position(|&b| b == b'}')?;
    (len > 0).then_some((start, start + len))
}

/// Confirms that every key maps to the same slot and returns that slot.
///
/// Fails with [`Error::CrossSlot`] on the first key whose slot differs from
/// the first key's, and with [`Error::InvalidArgument`] for an empty key set.
///
/// # Examples
///
/// ```
/// use shardline::cluster::validate_single_slot;
///
/// let slot = validate_single_slot(&["{t}a", "{t}b"]).unwrap();
/// assert_eq!(slot, shardline::key_slot("t"));
/// assert!(validate_single_slot(&["a", "b"]).is_err());
/// ```
pub fn validate_single_slot<K: AsRef<[u8]>>(keys: &[K]) -> Result<u16> {
    let (first, rest) = keys.split_first().ok_or_else(|| Error::InvalidArgument {
        message: "command requires at least one key".to_string(),
    })?;

    let slot = key_slot(first);
    for key in rest {
        let other = key_slot(key);
        if other != slot {
            return Err(Error::CrossSlot { first: slot, other });
        }
    }
    Ok(slot)
}

/// Merges the destination key of a STORE-style command into its source keys.
///
/// The destination goes first so that validation reports its slot as the
/// reference slot.
pub fn merge_keys(dst: impl Into<Bytes>, srcs: &[Bytes]) -> Vec<Bytes> {
    let mut keys = Vec::with_capacity(srcs.len() + 1);
    keys.push(dst.into());
    keys.extend(srcs.iter().cloned());
    keys
}

/// Returns true if every key matching `pattern` is guaranteed to share one hash tag.
///
/// The pattern must be non-empty, the text before its first `{` must be free of
/// glob metacharacters, and a closing `}` must follow a non-empty, literal tag.
pub fn is_anchored_pattern(pattern: impl AsRef<[u8]>) -> bool {
    let pattern = pattern.as_ref();
    let Some(open) = pattern.iter().position(|&b| b == b'{') else {
        return false;
    };
    if has_glob_meta(&pattern[..open]) {
        return false;
    }
    match hash_tag_bounds(pattern) {
        Some((start, end)) => !has_glob_meta(&pattern[start..end]),
        None => false,
    }
}

/// Slot that a KEYS / SCAN MATCH pattern routes to.
///
/// Fails with [`Error::RoutingUnsupported`] unless the pattern is anchored to a
/// hash tag (see [`is_anchored_pattern`]).
///
/// # Examples
///
/// ```
/// use shardline::cluster::pattern_slot;
///
/// assert_eq!(pattern_slot("{shard1}*").unwrap(), shardline::key_slot("shard1"));
/// assert!(pattern_slot("*").is_err());
/// ```
pub fn pattern_slot(pattern: impl AsRef<[u8]>) -> Result<u16> {
    let pattern = pattern.as_ref();
    if !is_anchored_pattern(pattern) {
        return Err(Error::RoutingUnsupported {
            message: format!(
                "pattern '{}' is not anchored to a hash tag; keys may live on any node",
                String::from_utf8_lossy(pattern)
            ),
        });
    }
    Ok(key_slot(pattern))
}

fn has_glob_meta(bytes: &[u8]) -> bool {
    bytes.iter().any(|b| GLOB_META.contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count() {
        assert_eq!(SLOT_COUNT, 16384);
    }

    #[test]
    fn test_key_slot_known_values() {
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("bar"), 5061);
        assert_eq!(key_slot("hello"), 866);
        assert_eq!(key_slot("123456789"), 12739);
    }

    #[test]
    fn test_key_slot_in_range_and_deterministic() {
        for i in 0..2000 {
            let key = format!("key:{}", i);
            let slot = key_slot(&key);
            assert!(slot < SLOT_COUNT);
            assert_eq!(slot, key_slot(key.as_bytes()));
        }
    }

    #[test]
    fn test_key_slot_empty_key() {
        assert_eq!(key_slot(""), 0);
        assert_eq!(key_slot(b""), 0);
    }

    #[test]
    fn test_key_slot_with_hash_tag() {
        let slot1 = key_slot("{user1000}.following");
        let slot2 = key_slot("{user1000}.followers");
        let slot3 = key_slot("{user1000}.posts");

        assert_eq!(slot1, slot2);
        assert_eq!(slot2, slot3);
        assert_eq!(slot1, key_slot("user1000"));
    }

    #[test]
    fn test_key_slot_binary_key() {
        let key: &[u8] = &[0xff, b'{', 0x00, 0x01, b'}', 0xfe];
        assert_eq!(key_slot(key), key_slot([0x00u8, 0x01]));
    }

    #[test]
    fn test_extract_hash_tag() {
        assert_eq!(extract_hash_tag(b"foo{bar}"), b"bar");
        assert_eq!(extract_hash_tag(b"prefix{tag}suffix"), b"tag");
        assert_eq!(extract_hash_tag(b"simple_key"), b"simple_key");
        assert_eq!(extract_hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(extract_hash_tag(b"foo{}{bar}"), b"foo{}{bar}");
        assert_eq!(extract_hash_tag(b"foo{bar}{zap}"), b"bar");
        assert_eq!(extract_hash_tag(b"{{bar}}"), b"{bar");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"foo}bar{"), b"foo}bar{");
    }

    #[test]
    fn test_validate_single_slot_same_tag() {
        let slot = validate_single_slot(&["{tag}dst", "{tag}a", "{tag}b"]).unwrap();
        assert_eq!(slot, key_slot("tag"));
    }

    #[test]
    fn test_validate_single_slot_cross_slot() {
        match validate_single_slot(&["foo", "bar"]) {
            Err(Error::CrossSlot { first, other }) => {
                assert_eq!(first, 12182);
                assert_eq!(other, 5061);
            }
            other => panic!("expected CrossSlot, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_single_slot_single_key() {
        assert_eq!(validate_single_slot(&["foo"]).unwrap(), 12182);
    }

    #[test]
    fn test_validate_single_slot_empty() {
        let keys: [&str; 0] = [];
        assert!(matches!(
            validate_single_slot(&keys),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_merge_keys_puts_destination_first() {
        let merged = merge_keys("dst", &[Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(
            merged,
            vec![Bytes::from("dst"), Bytes::from("a"), Bytes::from("b")]
        );
        assert!(validate_single_slot(&merged).is_err());

        let merged = merge_keys("{t}dst", &[Bytes::from("{t}a"), Bytes::from("{t}b")]);
        assert_eq!(validate_single_slot(&merged).unwrap(), key_slot("t"));
    }

    #[test]
    fn test_anchored_patterns() {
        assert!(is_anchored_pattern("{shard1}*"));
        assert!(is_anchored_pattern("user:{shard1}:*"));
        assert!(is_anchored_pattern("{a}[bc]?"));
    }

    #[test]
    fn test_unanchored_patterns() {
        assert!(!is_anchored_pattern(""));
        assert!(!is_anchored_pattern("*"));
        assert!(!is_anchored_pattern("user:*"));
        assert!(!is_anchored_pattern("*{shard1}"));
        assert!(!is_anchored_pattern("?{shard1}"));
        assert!(!is_anchored_pattern("{}*"));
        assert!(!is_anchored_pattern("{shard*}"));
        assert!(!is_anchored_pattern("{shard1"));
        assert!(!is_anchored_pattern("\\{x}"));
    }

    #[test]
    fn test_pattern_slot() {
        assert_eq!(pattern_slot("{shard1}*").unwrap(), key_slot("shard1"));
        assert!(matches!(
            pattern_slot("*"),
            Err(Error::RoutingUnsupported { .. })
        ));
    }
}
