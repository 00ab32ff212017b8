//! Persisted entry header codec.
//!
//! On disk, a cache entry is a `u64` little-endian length prefix, followed
//! by that many bytes of `bincode`-encoded [`EntryHeader`], followed by the
//! raw response body. The length prefix is what makes the format
//! self-delimiting: a decoder that has read the prefix and the header bytes
//! is positioned exactly at the first body byte, without needing a
//! streaming msgpack-style decoder.
//!
//! Grounded on `original_source/response_cache/disk_cache_header.go` (the
//! `{version, status, header}` shape) and `disk_cache_header_gen.go` (the
//! generated msgpack codec this replaces).

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const FORMAT_VERSION: u32 = 1;

/// The persisted header: format version, HTTP status, and headers as an
/// ordered list of (name, value) pairs — one pair per value, so multi-valued
/// headers round-trip exactly and field order within a name is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub version: u32,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl EntryHeader {
    pub fn new(status: u16, headers: Vec<(String, String)>) -> Self {
        Self { version: FORMAT_VERSION, status, headers }
    }

    /// Encode `self` and write it to `w` as `[u64 length][bincode bytes]`.
    pub fn encode_to<W: Write>(&self, mut w: W) -> Result<(), CacheError> {
        let payload = bincode::serialize(self).map_err(|e| CacheError::HeaderDecode(e.to_string()))?;
        let len = payload.len() as u64;
        w.write_all(&len.to_le_bytes()).map_err(CacheError::from)?;
        w.write_all(&payload).map_err(CacheError::from)?;
        Ok(())
    }

    /// Decode a header from `r`. On return, `r` is positioned at the first
    /// body byte. A missing or malformed header returns
    /// [`CacheError::HeaderDecode`].
    pub fn decode_from<R: Read>(mut r: R) -> Result<Self, CacheError> {
        let mut len_bytes = [0u8; 8];
        r.read_exact(&mut len_bytes).map_err(|e| CacheError::HeaderDecode(e.to_string()))?;
        let len = u64::from_le_bytes(len_bytes);

        // guard against a corrupt length prefix trying to allocate absurdly
        const MAX_HEADER_BYTES: u64 = 16 * 1024 * 1024;
        if len > MAX_HEADER_BYTES {
            return Err(CacheError::HeaderDecode(format!("implausible header length {len}")));
        }

        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload).map_err(|e| CacheError::HeaderDecode(e.to_string()))?;

        let header: EntryHeader =
            bincode::deserialize(&payload).map_err(|e| CacheError::HeaderDecode(e.to_string()))?;

        if header.version != FORMAT_VERSION {
            return Err(CacheError::HeaderDecode(format!(
                "unsupported header version {}",
                header.version
            )));
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_status_and_headers() {
        let header = EntryHeader::new(
            200,
            vec![
                ("Content-Type".to_string(), "text/html".to_string()),
                ("X-Served-By".to_string(), "test case".to_string()),
            ],
        );

        let mut buf = Vec::new();
        header.encode_to(&mut buf).unwrap();
        buf.extend_from_slice(b"body follows");

        let mut cursor = Cursor::new(&buf);
        let decoded = EntryHeader::decode_from(&mut cursor).unwrap();
        assert_eq!(decoded, header);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"body follows");
    }

    #[test]
    fn preserves_multi_valued_headers_in_order() {
        let header = EntryHeader::new(
            200,
            vec![("X-Foo".to_string(), "1".to_string()), ("X-Foo".to_string(), "2".to_string())],
        );
        let mut buf = Vec::new();
        header.encode_to(&mut buf).unwrap();
        let decoded = EntryHeader::decode_from(Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.headers, header.headers);
    }

    #[test]
    fn corrupt_data_fails_to_decode() {
        let garbage = vec![1, 2, 3];
        assert!(EntryHeader::decode_from(Cursor::new(&garbage)).is_err());
    }

    #[test]
    fn truncated_payload_fails_to_decode() {
        let header = EntryHeader::new(200, vec![]);
        let mut buf = Vec::new();
        header.encode_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1); // drop the last payload byte
        assert!(EntryHeader::decode_from(Cursor::new(&buf)).is_err());
    }
}
