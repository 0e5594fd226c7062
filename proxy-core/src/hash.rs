//! Chunk-insensitive hashing and case-insensitive comparison over [`Chunk`] sequences.
//!
//! The forwarding engine hashes header values and URIs that may arrive split
//! across an arbitrary number of non-contiguous buffers (see [`crate::message`]).
//! A request re-sent with the same bytes but a different chunk split must hash
//! identically (P5), so every routine here folds bytes into a single running
//! accumulator and never hashes a chunk in isolation.

use crate::message::Chunk;

/// 64-bit offset basis / prime for the FNV-1a folding hash.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// A running FNV-1a accumulator. Folding the same byte sequence through this
/// accumulator always produces the same final value regardless of how the
/// caller chooses to split the `update` calls — that's the whole point.
#[derive(Debug, Clone, Copy)]
pub struct RunningHash(u64);

impl RunningHash {
    pub fn new() -> Self {
        RunningHash(FNV_OFFSET)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    /// Fold in a single byte lowercased, for case-insensitive hashing.
    pub fn update_ascii_lower(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b.to_ascii_lowercase());
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a plain byte slice.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h = RunningHash::new();
    h.update(bytes);
    h.finish()
}

/// Hash a chunked string. `H(s) == H(s')` whenever `s` and `s'` carry the same
/// bytes split differently into chunks (P5).
pub fn hash_chunks(chunks: &[Chunk]) -> u64 {
    let mut h = RunningHash::new();
    for c in chunks {
        h.update(c.as_bytes());
    }
    h.finish()
}

/// Case-insensitive hash, used when the comparison context (e.g. Host) is
/// itself case-insensitive and we want `H(s) == H(s.to_upper())`.
pub fn hash_chunks_ascii_lower(chunks: &[Chunk]) -> u64 {
    let mut h = RunningHash::new();
    for c in chunks {
        h.update_ascii_lower(c.as_bytes());
    }
    h.finish()
}

/// Case-insensitive equality between a chunked string and a plain literal.
pub fn eq_ignore_ascii_case_chunked(chunks: &[Chunk], lit: &[u8]) -> bool {
    let mut lit = lit;
    for c in chunks {
        let bytes = c.as_bytes();
        if bytes.len() > lit.len() {
            return false;
        }
        if !bytes.eq_ignore_ascii_case(&lit[..bytes.len()]) {
            return false;
        }
        lit = &lit[bytes.len()..];
    }
    lit.is_empty()
}

/// Case-insensitive prefix match: does the chunked string start with `lit`?
pub fn starts_with_ignore_ascii_case_chunked(chunks: &[Chunk], lit: &[u8]) -> bool {
    let mut remaining = lit;
    for c in chunks {
        if remaining.is_empty() {
            return true;
        }
        let bytes = c.as_bytes();
        let take = bytes.len().min(remaining.len());
        if !bytes[..take].eq_ignore_ascii_case(&remaining[..take]) {
            return false;
        }
        remaining = &remaining[take..];
    }
    remaining.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Chunk;
    use std::sync::Arc;

    fn chunks_from_splits(s: &str, splits: &[usize]) -> Vec<Chunk> {
        let buf: Arc<[u8]> = Arc::from(s.as_bytes());
        let mut out = Vec::new();
        let mut start = 0;
        for &at in splits {
            out.push(Chunk::new(buf.clone(), start, at - start));
            start = at;
        }
        out.push(Chunk::new(buf.clone(), start, buf.len() - start));
        out
    }

    #[test]
    fn chunk_insensitive_hash_matches_across_splits() {
        let s = "www.example.com/some/long/path?query=1";
        let whole = chunks_from_splits(s, &[]);
        let split_a = chunks_from_splits(s, &[3, 15, 20]);
        let split_b = chunks_from_splits(s, &[1, 2, 3, 4, 5, 30]);
        assert_eq!(hash_chunks(&whole), hash_chunks(&split_a));
        assert_eq!(hash_chunks(&whole), hash_chunks(&split_b));
    }

    #[test]
    fn different_bytes_hash_differently_with_overwhelming_probability() {
        let a = chunks_from_splits("/foo/bar", &[4]);
        let b = chunks_from_splits("/foo/baz", &[4]);
        assert_ne!(hash_chunks(&a), hash_chunks(&b));
    }

    #[test]
    fn case_insensitive_eq_across_chunk_boundaries() {
        let chunks = chunks_from_splits("Keep-Alive", &[4]);
        assert!(eq_ignore_ascii_case_chunked(&chunks, b"keep-alive"));
        assert!(!eq_ignore_ascii_case_chunked(&chunks, b"close"));
    }

    #[test]
    fn prefix_match_across_chunk_boundaries() {
        let chunks = chunks_from_splits("/static/img/logo.png", &[3, 11]);
        assert!(starts_with_ignore_ascii_case_chunked(&chunks, b"/STATIC/"));
        assert!(!starts_with_ignore_ascii_case_chunked(&chunks, b"/other/"));
    }
}
