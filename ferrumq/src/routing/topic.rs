//! Topic pattern matching
//!
//! Patterns and routing keys split on `.` into words. A literal word must
//! match exactly, `*` matches exactly one word, and `#` matches zero or
//! more words with backtracking across word boundaries. Compiled patterns
//! are cached by their text; equivalence is purely textual.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternWord {
    Literal(String),
    /// `*`
    Single,
    /// `#`
    Multi,
}

/// A compiled topic pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TopicPattern {
    words: Vec<PatternWord>,
}

impl TopicPattern {
    /// Compiles a pattern string
    pub(crate) fn parse(pattern: &str) -> Self {
        let words = split_words(pattern)
            .into_iter()
            .map(|word| match word {
                "*" => PatternWord::Single,
                "#" => PatternWord::Multi,
                literal => PatternWord::Literal(literal.to_string()),
            })
            .collect();
        Self { words }
    }

    /// Whether the routing key matches this pattern
    pub(crate) fn matches(&self, routing_key: &str) -> bool {
        let key = split_words(routing_key);
        matches_at(&self.words, &key)
    }
}

fn split_words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

fn matches_at(pattern: &[PatternWord], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((PatternWord::Multi, rest)) => {
            // try consuming 0..=len(key) words
            (0..=key.len()).any(|skip| matches_at(rest, &key[skip..]))
        }
        Some((PatternWord::Single, rest)) => {
            !key.is_empty() && matches_at(rest, &key[1..])
        }
        Some((PatternWord::Literal(word), rest)) => {
            key.first() == Some(&word.as_str()) && matches_at(rest, &key[1..])
        }
    }
}

/// Cache of compiled patterns keyed by pattern text
#[derive(Debug, Default)]
pub(crate) struct TopicCache {
    patterns: HashMap<String, TopicPattern>,
}

impl TopicCache {
    /// Matches `routing_key` against `pattern`, compiling and caching the
    /// pattern on first sight
    pub(crate) fn matches(&mut self, pattern: &str, routing_key: &str) -> bool {
        if let Some(compiled) = self.patterns.get(pattern) {
            return compiled.matches(routing_key);
        }
        let compiled = TopicPattern::parse(pattern);
        let result = compiled.matches(routing_key);
        self.patterns.insert(pattern.to_string(), compiled);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(pattern: &str, key: &str, expected: bool) {
        let compiled = TopicPattern::parse(pattern);
        assert_eq!(
            compiled.matches(key),
            expected,
            "pattern {pattern:?} vs key {key:?}"
        );
        // idempotent re-evaluation
        assert_eq!(compiled.matches(key), expected);
    }

    #[test]
    fn literals_require_exact_words() {
        check("stock.nasdaq", "stock.nasdaq", true);
        check("stock.nasdaq", "stock.nyse", false);
        check("stock.nasdaq", "stock.nasdaq.tech", false);
        check("stock", "stock", true);
    }

    #[test]
    fn star_matches_exactly_one_word() {
        check("stock.*", "stock.nasdaq", true);
        check("stock.*", "stock", false);
        check("stock.*", "stock.nasdaq.tech", false);
        check("*.nasdaq", "stock.nasdaq", true);
        check("*", "stock", true);
        check("*", "", false);
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        check("#", "stock.nasdaq", true);
        check("#", "", true);
        check("stock.#", "stock", true);
        check("stock.#", "stock.nasdaq.tech", true);
        check("#.nasdaq", "stock.nasdaq", true);
        check("#.nasdaq", "nasdaq", true);
        check("#.nasdaq", "stock.nyse", false);
    }

    #[test]
    fn hash_backtracks_across_word_boundaries() {
        check("#.b.#", "a.b.c", true);
        check("#.b.#", "b", true);
        check("#.b.#", "a.c", false);
        check("a.#.b", "a.x.y.b", true);
        check("a.#.b", "a.b", true);
        check("#.#", "a", true);
    }

    #[test]
    fn empty_key_matches_only_hash_patterns() {
        check("", "", true);
        check("#", "", true);
        check("#.#", "", true);
        check("*", "", false);
        check("a", "", false);
        check("a.#", "", false);
    }

    #[test]
    fn cache_returns_the_same_answers() {
        let mut cache = TopicCache::default();
        assert!(cache.matches("stock.*", "stock.nasdaq"));
        assert!(cache.matches("stock.*", "stock.nyse"));
        assert!(!cache.matches("stock.*", "weather.usa"));
        assert_eq!(cache.patterns.len(), 1);
    }
}
