//! Simple keyword-based turn signal extraction.
//!
//! Stands in for the conversation engine's analyser in the CLI and tests.
//! In production, this should be replaced with an ML model.

use crate::personality::TurnSignal;

const POSITIVE: &[&str] = &[
    "happy", "good", "great", "excellent", "wonderful", "love", "like", "enjoy", "glad", "thanks",
    "awesome",
];

const NEGATIVE: &[&str] = &[
    "sad", "bad", "terrible", "awful", "hate", "dislike", "angry", "upset", "worried", "tired",
    "lonely",
];

const QUESTION: &[&str] = &["what", "why", "how", "when", "where", "who", "which"];

/// Lowercased alphanumeric words (apostrophes kept inside words).
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Analyze a message into a [`TurnSignal`].
///
/// - `sentiment` = (pos - neg) / (pos + neg), 0 when no keyword matches
/// - `engagement` = 0.3 base, +0.3 for a question, + up to 0.4 for length
pub fn analyze_turn(text: &str) -> TurnSignal {
    let mut pos = 0usize;
    let mut neg = 0usize;
    let mut questions = 0usize;
    let mut count = 0usize;

    for word in words(text) {
        count += 1;
        if POSITIVE.contains(&word.as_str()) {
            pos += 1;
        } else if NEGATIVE.contains(&word.as_str()) {
            neg += 1;
        }
        if QUESTION.contains(&word.as_str()) {
            questions += 1;
        }
    }

    let sentiment = if pos + neg > 0 {
        (pos as f32 - neg as f32) / (pos + neg) as f32
    } else {
        0.0
    };

    let asks = questions > 0 || text.trim_end().ends_with('?');
    let engagement = 0.3 + if asks { 0.3 } else { 0.0 } + (count as f32 / 40.0).min(0.4);

    TurnSignal::new(sentiment, engagement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_text() {
        let s = analyze_turn("going out tomorrow");
        assert!((s.sentiment - 0.0).abs() < 0.01);
        assert!(s.engagement < 0.6);
    }

    #[test]
    fn test_positive_text() {
        assert!(analyze_turn("I am so happy, thanks!").sentiment > 0.0);
    }

    #[test]
    fn test_negative_text() {
        assert!(analyze_turn("I feel sad and tired").sentiment < 0.0);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "badminton" must not count as "bad"
        assert!((analyze_turn("playing badminton").sentiment - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_question_raises_engagement() {
        let flat = analyze_turn("tell me about stars");
        let asked = analyze_turn("why do stars shine");
        assert!(asked.engagement > flat.engagement);
    }

    #[test]
    fn test_empty_text() {
        let s = analyze_turn("");
        assert!((s.sentiment - 0.0).abs() < 0.01);
        assert!((s.engagement - 0.3).abs() < 0.01);
    }
}
