//! Topic-exchange routing key matching.
//!
//! Binding keys and routing keys are lists of words separated by `.`.
//! In a binding key `*` matches exactly one word and `#` matches zero or more
//! words.

const SEPARATOR: char = '.';

pub fn matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split(SEPARATOR).collect();
    let words: Vec<&str> = routing_key.split(SEPARATOR).collect();
    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs any number of words, including none.
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((word, rest)) => match words.split_first() {
            Some((first, remaining)) if first == word => match_words(rest, remaining),
            _ => false,
        },
    }
}
