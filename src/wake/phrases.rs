//! Phrase matching for wake and end phrases
//!
//! Recognizers disagree on punctuation and spacing ("你好，小薇" vs
//! "你好 小薇。"), so both sides are folded to alphanumerics before a
//! substring test.

/// A set of trigger phrases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhraseSet {
    /// Normalized phrases, empties removed
    phrases: Vec<String>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `text` contains any phrase
    pub fn matches(&self, text: &str) -> bool {
        if self.phrases.is_empty() {
            return false;
        }
        let text = normalize(text);
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
