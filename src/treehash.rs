use sha2::{Digest, Sha256};

/// Leaf size of the SHA-256 tree hash.
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub type Hash = [u8; 32];

fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA-256 of every 1 MiB chunk of `data`.
pub fn leaf_hashes(data: &[u8]) -> Vec<Hash> {
    if data.is_empty() {
        return vec![sha256(data)];
    }
    data.chunks(CHUNK_SIZE).map(sha256).collect()
}

/// Combine hashes pairwise, level by level, until one remains. An odd hash
/// at the end of a level is promoted unchanged.
pub fn combine(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return sha256(&[]);
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                }
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

pub fn tree_hash(data: &[u8]) -> Hash {
    combine(&leaf_hashes(data))
}

pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}
