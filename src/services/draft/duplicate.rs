use std::collections::HashSet;

pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.85;

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of the lowercased word sets; 0.0 if either side is empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}

pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    similarity(a, b) >= NEAR_DUPLICATE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_spans() {
        assert_eq!(similarity("the cat sat", "the cat sat"), 1.0);
        assert!(is_near_duplicate("The  cat\nsat", "the cat sat"));
    }

    #[test]
    fn test_different_spans() {
        assert!(similarity("the cat sat", "a dog ran") < NEAR_DUPLICATE_THRESHOLD);
        assert!(!is_near_duplicate("the cat sat", "a dog ran"));
    }

    #[test]
    fn test_empty_input_is_never_duplicate() {
        assert!(!is_near_duplicate("", "anything"));
        assert!(!is_near_duplicate("anything", "   "));
        assert!(!is_near_duplicate("", ""));
    }

    #[test]
    fn test_symmetric() {
        let a = "one two three four five six seven";
        let b = "one two three four five six eight";
        assert_eq!(similarity(a, b), similarity(b, a));
        assert_eq!(similarity(a, b), 6.0 / 8.0);
    }
}
