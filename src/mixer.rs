use blake2::{
    digest::{consts::U32, Digest},
    Blake2b,
};

type Blake2b256 = Blake2b<U32>;

/// Width of a conditioned sample; also the largest `add_entropy` payload.
pub const CONDITIONED_LEN: usize = 32;

/// Compresses raw, possibly long or biased input into one 32-byte sample for
/// `add_entropy`. Inputs are length-prefixed and labelled so different
/// sources never hash the same byte stream.
pub fn condition(inputs: &[(&str, &[u8])]) -> [u8; CONDITIONED_LEN] {
    let mut hasher = Blake2b256::new();

    hasher.update(b"fortunad-condition-v1");

    for (label, data) in inputs {
        let label_bytes = label.as_bytes();
        hasher.update((label_bytes.len() as u64).to_le_bytes());
        hasher.update(label_bytes);

        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
    }

    let mut out = [0u8; CONDITIONED_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}
