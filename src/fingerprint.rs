//! Request fingerprinting.
//!
//! Mirrors `original_source/response_cache/hash_request.go` field-for-field:
//! method, URL, protocol, then headers sorted by field name (each name and
//! value 0x00-terminated, an extra 0x00 after each field), then the body.
//! Permuting header *names* doesn't change the digest; permuting *values
//! within* a field does, because values are hashed in their given order.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const TERMINATOR: [u8; 1] = [0];

/// An HTTP request as seen by the fingerprinter: just enough structure to
/// hash it, nothing more. The driver is responsible for buffering the body
/// before constructing one of these.
pub struct FingerprintInput<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub protocol: &'a str,
    /// Header field name -> ordered list of values, as received.
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
}

/// Compute the 64-character lowercase hex SHA-256 fingerprint of a request.
pub fn fingerprint(input: &FingerprintInput<'_>) -> String {
    let mut hasher = Sha256::new();

    hasher.update(input.method.as_bytes());
    hasher.update(TERMINATOR);

    hasher.update(input.url.as_bytes());
    hasher.update(TERMINATOR);

    hasher.update(input.protocol.as_bytes());
    hasher.update(TERMINATOR);

    // group values by field name, preserving per-field value order, then
    // iterate fields in ascending lexicographic order
    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in input.headers {
        by_name.entry(name.as_str()).or_default().push(value.as_str());
    }

    for (name, values) in &by_name {
        hasher.update(name.as_bytes());
        hasher.update(TERMINATOR);
        for value in values {
            hasher.update(value.as_bytes());
            hasher.update(TERMINATOR);
        }
        hasher.update(TERMINATOR);
    }

    hasher.update(input.body);
    hasher.update(TERMINATOR);

    hex::encode(hasher.finalize())
}
