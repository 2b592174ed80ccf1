use std::hash::Hasher;

/// hash_key computes a hash of key. Hash is always non-zero.
///
/// The seed is fixed so that hashes are stable across processes, anything
/// persisted from them stays valid after a restart.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut xx_hash = twox_hash::XxHash64::with_seed(0);
    xx_hash.write(key);
    let mut h = xx_hash.finish();

    if h == 0 {
        h = 1;
    }

    h
}
