//! Membership guarantees of encoded filters over randomized vocabularies.

use std::collections::HashSet;

use rand::distr::Alphanumeric;
use rand::Rng;

use codeintel_bloom::{create_filter, decode};

fn random_words(rng: &mut impl Rng, count: usize, prefix: &str) -> Vec<String> {
    (0..count)
        .map(|_| {
            let len = rng.random_range(4..24);
            let suffix: String = (&mut *rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            format!("{}{}", prefix, suffix)
        })
        .collect()
}

#[test]
fn test_no_false_negatives() {
    let mut rng = rand::rng();
    for size in [1, 10, 100, 1_000, 20_000] {
        let words = random_words(&mut rng, size, "pkg.");
        let test = decode(&create_filter(&words).unwrap()).unwrap();
        for word in &words {
            assert!(test(word), "false negative for {} (set size {})", word, size);
        }
    }
}

#[test]
fn test_disjoint_vocabulary_mostly_negative() {
    let mut rng = rand::rng();
    let members = random_words(&mut rng, 2_000, "member.");
    let member_set: HashSet<&String> = members.iter().collect();
    let controls: Vec<String> = random_words(&mut rng, 2_000, "control#")
        .into_iter()
        .filter(|w| !member_set.contains(w))
        .collect();

    let test = decode(&create_filter(&members).unwrap()).unwrap();
    let false_positives = controls.iter().filter(|w| test(w)).count();

    // Filters target a 1% rate; allow generous slack for randomness
    assert!(
        false_positives * 100 <= controls.len() * 5,
        "{} false positives out of {}",
        false_positives,
        controls.len()
    );
}

#[test]
fn test_unicode_identifiers() {
    let words = ["naïve", "日本語", "emoji🙂", ""];
    let test = decode(&create_filter(&words).unwrap()).unwrap();
    for word in words {
        assert!(test(word));
    }
}
