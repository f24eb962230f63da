//! Sequence-similarity scoring used to recognise human-labelled folders and files.
//!
//! The score is the Ratcliff/Obershelp ratio `2*M / T`, where `M` counts the
//! characters in the recursively found longest common blocks and `T` is the
//! combined length of both strings.

/// Similarity of two strings in `[0, 1]`, after uppercasing both.
///
/// The ratio is taken in both argument orders and the larger kept, so the
/// result does not depend on which side is the reference.
pub fn similarity(reference: &str, candidate: &str) -> f64 {
    let a: Vec<char> = reference.to_uppercase().chars().collect();
    let b: Vec<char> = candidate.to_uppercase().chars().collect();
    ratio(&a, &b).max(ratio(&b, &a))
}

/// Similarity of two labels compared on their ASCII letters only.
///
/// Digits, punctuation and accented letters are dropped first so that
/// "08_Agosto 2018" and "AGOSTO" compare equal.
pub fn label_similarity(reference: &str, candidate: &str) -> f64 {
    similarity(&letters_only(reference), &letters_only(candidate))
}

pub fn letters_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphabetic()).collect()
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(a, b) as f64 / total as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`; earliest in `a` wins ties.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    for i in alo..ahi {
        let mut cur = vec![0usize; width];
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = prev[j - blo] + 1;
                cur[j - blo + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        prev = cur;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_scores_one() {
        assert_eq!(similarity("MENSUAL", "mensual"), 1.0);
        assert_eq!(label_similarity("AGOSTO", "08_Agosto 2018"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_known_ratios() {
        // "REVISIN" shares 7 of 8 + 7 characters with "REVISION".
        let s = label_similarity("REVISION", "Revisión 02");
        assert!((s - 14.0 / 15.0).abs() < 1e-9);
        assert!(s > 0.90);

        // difflib: SequenceMatcher(None, "abcd", "bcde").ratio() == 0.75
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert_eq!(similarity("ABC", "XYZ"), 0.0);
        assert_eq!(similarity("ABC", ""), 0.0);
    }

    #[test]
    fn test_range_and_symmetry() {
        let pairs = [
            ("SEPTIEMBRE", "SETIEMBRE"),
            ("RESUMENCUADROS", "RESUMENCUADRO"),
            ("MENSUAL", "REVISION"),
            ("ABAB", "BABA"),
            ("tide", "diet"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b);
            let ba = similarity(b, a);
            assert!((0.0..=1.0).contains(&ab), "{} vs {} -> {}", a, b, ab);
            assert_eq!(ab, ba, "{} vs {}", a, b);
            assert!(ab < 1.0);
        }
    }

    #[test]
    fn test_month_label_beats_neighbours() {
        let target = label_similarity("JUNIO", "06_Junio 2019");
        let neighbour = label_similarity("JUNIO", "07_Julio 2019");
        assert!(target > neighbour);
    }
}
