//! Tests for ProfileMeta encoding and decoding
//!
//! These tests verify:
//! - Exact byte layout of the version-1 format
//! - Round trips at integer extremes and for non-ASCII strings
//! - Every structural defect is rejected as MalformedRecord

use profmeta::record::{FIXED_LEN, RECORD_VERSION};
use profmeta::{MetaError, ProfileMeta};

// =============================================================================
// Helper Functions
// =============================================================================

fn sample() -> ProfileMeta {
    ProfileMeta::new(1, 1_700_000_000_123, 1_700_000_000_123_456_789, "alloc_objects", "count")
}

fn assert_malformed(bytes: &[u8]) {
    match ProfileMeta::decode(bytes) {
        Err(MetaError::MalformedRecord(_)) => {}
        other => panic!("expected MalformedRecord, got {:?}", other),
    }
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_encode_layout() {
    let record = ProfileMeta::new(0x0102, -2, 3, "ab", "c");
    let bytes = record.encode().unwrap();

    let mut expected = vec![RECORD_VERSION];
    expected.extend_from_slice(&0x0102u64.to_be_bytes());
    expected.extend_from_slice(&(-2i64).to_be_bytes());
    expected.extend_from_slice(&3i64.to_be_bytes());
    expected.extend_from_slice(&2u32.to_be_bytes());
    expected.extend_from_slice(b"ab");
    expected.extend_from_slice(&1u32.to_be_bytes());
    expected.extend_from_slice(b"c");

    assert_eq!(bytes.as_ref(), expected.as_slice());
}

#[test]
fn test_encoded_len_matches_output() {
    let record = sample();

    assert_eq!(record.encode().unwrap().len(), record.encoded_len());
    assert_eq!(ProfileMeta::default().encode().unwrap().len(), FIXED_LEN);
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_roundtrip_sample() {
    let record = sample();
    let decoded = ProfileMeta::decode(&record.encode().unwrap()).unwrap();

    assert_eq!(decoded.profile_id, record.profile_id);
    assert_eq!(decoded.timestamp, record.timestamp);
    assert_eq!(decoded.duration, record.duration);
    assert_eq!(decoded.sample_type, record.sample_type);
    assert_eq!(decoded.sample_type_unit, record.sample_type_unit);
}

#[test]
fn test_roundtrip_integer_extremes() {
    let cases = [
        ProfileMeta::new(0, 0, 0, "", ""),
        ProfileMeta::new(u64::MAX, i64::MAX, i64::MAX, "inuse_space", "bytes"),
        ProfileMeta::new(u64::MAX, i64::MIN, i64::MIN, "cpu", "nanoseconds"),
        // Clock skew can make the duration negative
        ProfileMeta::new(7, 1_700_000_000_000, -250, "samples", "count"),
        ProfileMeta::new(7, -86_400_000, 1, "samples", "count"),
    ];

    for record in cases {
        let decoded = ProfileMeta::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }
}

#[test]
fn test_roundtrip_non_ascii_strings() {
    let record = ProfileMeta::new(3, 10, 20, "délai_µs", "秒");
    let decoded = ProfileMeta::decode(&record.encode().unwrap()).unwrap();

    assert_eq!(decoded, record);
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_decode_empty_buffer() {
    assert_malformed(&[]);
}

#[test]
fn test_decode_shorter_than_first_field() {
    // Version byte plus part of profile_id
    let bytes = sample().encode().unwrap();
    assert_malformed(&bytes[..3]);
}

#[test]
fn test_decode_every_truncation_fails() {
    let bytes = sample().encode().unwrap();

    for len in 0..bytes.len() {
        assert_malformed(&bytes[..len]);
    }
}

#[test]
fn test_decode_rejects_unknown_version() {
    let mut bytes = sample().encode().unwrap().to_vec();
    bytes[0] = RECORD_VERSION + 1;

    assert_malformed(&bytes);
}

#[test]
fn test_decode_rejects_length_past_end() {
    let mut bytes = sample().encode().unwrap().to_vec();
    // sample_type length prefix sits right after the fixed integers
    let at = 1 + 8 * 3;
    bytes[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());

    assert_malformed(&bytes);
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = sample().encode().unwrap().to_vec();
    bytes.push(0);

    assert_malformed(&bytes);
}

#[test]
fn test_decode_rejects_invalid_utf8() {
    let record = ProfileMeta::new(1, 2, 3, "xx", "y");
    let mut bytes = record.encode().unwrap().to_vec();
    let at = 1 + 8 * 3 + 4;
    bytes[at] = 0xff;

    assert_malformed(&bytes);
}
