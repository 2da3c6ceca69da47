//! FNV-1a based hashing used to place words in the filter.
//!
//! Words are hashed over their UTF-16 code units so filters stay compatible
//! with readers that hash JavaScript strings.

/// Seed of the second hash used for double hashing.
const SECOND_SEED: u32 = 1_576_284_489;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;

fn fnv_multiply(a: u32) -> u32 {
    a.wrapping_add(a << 1)
        .wrapping_add(a << 4)
        .wrapping_add(a << 7)
        .wrapping_add(a << 8)
        .wrapping_add(a << 24)
}

fn fnv_mix(mut a: u32) -> u32 {
    a = a.wrapping_add(a << 13);
    a ^= a >> 7;
    a = a.wrapping_add(a << 3);
    a ^= a >> 17;
    a = a.wrapping_add(a << 5);
    a
}

/// FNV-1a over the UTF-16 code units of `word`, with a final avalanche mix.
pub(crate) fn fnv_1a(word: &str, seed: u32) -> u32 {
    let mut a = FNV_OFFSET_BASIS ^ seed;
    for unit in word.encode_utf16() {
        let unit = u32::from(unit);
        let high = unit & 0xff00;
        if high != 0 {
            a = fnv_multiply(a ^ (high >> 8));
        }
        a = fnv_multiply(a ^ (unit & 0xff));
    }
    fnv_mix(a)
}

/// Bit positions of `word` in a filter of `num_bits` bits.
///
/// Position `i` is `(h1 + i * h2) mod num_bits`. Because filter sizes are
/// powers of two, positions in a filter of `2m` bits reduce to the positions
/// in a filter of `m` bits, which is what makes folding possible.
pub(crate) fn locations(word: &str, num_hash_functions: u32, num_bits: u64) -> Vec<u64> {
    let a = u64::from(fnv_1a(word, 0));
    let b = u64::from(fnv_1a(word, SECOND_SEED));

    (0..u64::from(num_hash_functions))
        .map(|i| (a + i * b) % num_bits)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_is_deterministic() {
        assert_eq!(fnv_1a("ident A", 0), fnv_1a("ident A", 0));
        assert_ne!(fnv_1a("ident A", 0), fnv_1a("ident A", SECOND_SEED));
    }

    #[test]
    fn test_non_ascii_words_hash() {
        // Code units above 0xff take the two-step path
        assert_ne!(fnv_1a("日本", 0), fnv_1a("", 0));
    }

    #[test]
    fn test_locations_fold() {
        let big = locations("some.identifier", 16, 1 << 14);
        let small = locations("some.identifier", 16, 1 << 13);
        let folded: Vec<u64> = big.iter().map(|loc| loc % (1 << 13)).collect();
        assert_eq!(folded, small);
    }
}
