//! Cheap text heuristics used when ingesting conversation turns.

use kindred_core::sentiment::words;

/// Function words that carry no topic. Skipped by [`content_words`] and by
/// the hashing embedder.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "so", "of", "to", "in", "on", "at",
    "for", "with", "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "am",
    "it", "its", "it's", "this", "that", "these", "those", "i", "i'm", "me", "my", "you", "your",
    "we", "our", "they", "their", "he", "she", "his", "her", "him", "them", "do", "does", "did",
    "have", "has", "had", "not", "no", "just", "very", "really", "about", "user", "s", "what",
    "how", "when", "where", "who", "which", "can", "could", "would", "should", "will", "there",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercased words of `text` that are not stopwords.
pub fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
    words(text).filter(|w| !is_stopword(w))
}

/// Whether a user turn carries enough substance to be worth storing.
pub fn is_memorable(text: &str, min_content_words: usize) -> bool {
    content_words(text).take(min_content_words).count() >= min_content_words
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Likes,
    Dislikes,
}

/// A standing preference stated by the user, e.g. "I love hiking".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub polarity: Polarity,
    pub object: String,
}

impl Preference {
    /// The semantic fact stored for this preference.
    pub fn statement(&self) -> String {
        match self.polarity {
            Polarity::Likes => format!("user likes {}", self.object),
            Polarity::Dislikes => format!("user dislikes {}", self.object),
        }
    }

    pub fn sentiment(&self) -> f32 {
        match self.polarity {
            Polarity::Likes => 0.5,
            Polarity::Dislikes => -0.5,
        }
    }
}

const PATTERNS: &[(&str, Polarity)] = &[
    ("i don't like ", Polarity::Dislikes),
    ("i do not like ", Polarity::Dislikes),
    ("i dislike ", Polarity::Dislikes),
    ("i hate ", Polarity::Dislikes),
    ("i really like ", Polarity::Likes),
    ("i like ", Polarity::Likes),
    ("i love ", Polarity::Likes),
    ("i enjoy ", Polarity::Likes),
    ("i prefer ", Polarity::Likes),
];

const MAX_OBJECT_CHARS: usize = 80;

/// Pull "I like X" / "I hate X" style statements out of a message.
///
/// The object runs until the end of the clause. Objects that are empty
/// or longer than a short phrase are dropped.
pub fn extract_preferences(text: &str) -> Vec<Preference> {
    let lower = text.to_lowercase().replace('\u{2019}', "'");
    let mut found: Vec<Preference> = Vec::new();

    for (pattern, polarity) in PATTERNS {
        for (start, _) in lower.match_indices(pattern) {
            let at_word_start = lower[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric() && c != '\'');
            if !at_word_start {
                continue;
            }
            let rest = &lower[start + pattern.len()..];
            let end = rest
                .find(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | '\n'))
                .unwrap_or(rest.len());
            let object = rest[..end].trim();
            let object = object
                .strip_suffix(" too")
                .or_else(|| object.strip_suffix(" a lot"))
                .unwrap_or(object)
                .trim();
            if object.is_empty() || object.chars().count() > MAX_OBJECT_CHARS {
                continue;
            }
            // "i really like" also matches "i like" further right; keep one.
            if found.iter().any(|p| p.object == object) {
                continue;
            }
            found.push(Preference {
                polarity: *polarity,
                object: object.to_string(),
            });
        }
    }

    found
}
