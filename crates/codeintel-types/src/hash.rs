//! Result-chunk routing.
//!
//! A result id is owned by exactly one result chunk, chosen by hashing the id
//! modulo the bundle's `num_result_chunks`. The chunk count is fixed when a
//! bundle's meta row is written; changing it afterwards would reroute every
//! existing id.

/// Return the index of the result chunk that owns `id`.
///
/// Uses a 32-bit wrapping `hash * 31 + c` over the id's characters, so the
/// mapping is stable across processes and platforms.
///
/// ```
/// use codeintel_types::hash_key;
///
/// let index = hash_key("42", 8);
/// assert!(index < 8);
/// assert_eq!(index, hash_key("42", 8));
/// ```
pub fn hash_key(id: &str, num_result_chunks: usize) -> usize {
    if num_result_chunks == 0 {
        return 0;
    }

    let mut hash: i32 = 0;
    for c in id.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
    }

    hash.unsigned_abs() as usize % num_result_chunks
}
