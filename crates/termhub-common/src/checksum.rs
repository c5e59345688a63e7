//! Content hashing for cache keys
//!
//! Every field is framed with its length before it enters the digest, so two
//! different field sequences can never produce the same byte stream
//! (`["ab", "c"]` and `["a", "bc"]` hash differently).

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over length-framed fields
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    hasher: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one framed field
    pub fn field(&mut self, value: impl AsRef<[u8]>) -> &mut Self {
        let value = value.as_ref();
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Add a section tag; keeps optional groups of fields unambiguous
    pub fn section(&mut self, tag: &str) -> &mut Self {
        self.hasher.update([0xff]);
        self.field(tag)
    }

    /// Hex digest
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_framing_separates_boundaries() {
        let mut a = ContentHasher::new();
        a.field("ab").field("c");
        let mut b = ContentHasher::new();
        b.field("a").field("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_hasher_is_deterministic() {
        let build = || {
            let mut h = ContentHasher::new();
            h.section("resources").field("mesh").field("1700000000");
            h.finish()
        };
        assert_eq!(build(), build());
        assert_eq!(build().len(), 64);
    }
}
