/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The last `max_words` words of `text`, joined by single spaces.
///
/// Text already within the window is returned unchanged so that paragraph
/// breaks survive when there is nothing to trim.
pub fn last_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[words.len() - max_words..].join(" ")
}
