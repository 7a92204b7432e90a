//! Fnv hasher, stable across runs and platforms, used to key compiled kernels

use core::hash::{Hash, Hasher};

/// FNV-1a 64 bit hasher
#[derive(Debug, Clone, Copy)]
pub struct CHasher(u64);

impl Default for CHasher {
    fn default() -> CHasher {
        CHasher(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for CHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        let CHasher(mut hash) = *self;
        for byte in bytes.iter() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100_0000_01b3);
        }
        *self = CHasher(hash);
    }
}

/// Hash of kernel source or any other text
pub fn hash_str(s: &str) -> u64 {
    let mut hasher = CHasher::default();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Name of file holding compiled kernel in the cache directory
pub fn hash_filename(compilation_hash: u64, source_hash: u64, extension: &str) -> alloc::string::String {
    alloc::format!("{compilation_hash:x}_{source_hash:x}{extension}")
}

#[test]
fn fnv_is_stable() {
    let mut hasher = CHasher::default();
    hasher.write(b"a");
    assert_eq!(hasher.finish(), 0xaf63_dc4c_8601_ec8c);
    assert_eq!(hash_str("kernel"), hash_str("kernel"));
    assert_ne!(hash_str("kernel"), hash_str("kernel "));
    assert_eq!(hash_filename(0xab, 0x12, ".so"), "ab_12.so");
}
