// src/language/mod.rs
// Language detection for routing responses into the user's script

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    // Bengali/Assamese block
    static ref ASSAMESE_PATTERN: Regex = Regex::new(r"[\u{0985}-\u{09FF}]").unwrap();
    // Devanagari block
    static ref HINDI_PATTERN: Regex = Regex::new(r"[\u{0900}-\u{097F}]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Assamese,
    Hindi,
    English,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Assamese => "assamese",
            Language::Hindi => "hindi",
            Language::English => "english",
        }
    }

    pub fn iso_code(&self) -> &'static str {
        match self {
            Language::Assamese => "as",
            Language::Hindi => "hi",
            Language::English => "en",
        }
    }

    pub fn parse(s: &str) -> Option<Language> {
        match s.trim().to_lowercase().as_str() {
            "assamese" | "as" => Some(Language::Assamese),
            "hindi" | "hi" => Some(Language::Hindi),
            "english" | "en" => Some(Language::English),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detect the language of input text by script ranges.
///
/// Script detection runs before anything else: a single Devanagari or
/// Bengali-script character outweighs any amount of Latin text, which is what
/// Hinglish-heavy chats need. Everything else defaults to English.
pub fn detect_language(text: &str) -> Language {
    let text = text.trim();
    if text.is_empty() {
        return Language::English;
    }

    if ASSAMESE_PATTERN.is_match(text) {
        return Language::Assamese;
    }
    if HINDI_PATTERN.is_match(text) {
        return Language::Hindi;
    }

    Language::English
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_english_by_default() {
        assert_eq!(detect_language("hello, how are you?"), Language::English);
        assert_eq!(detect_language(""), Language::English);
        assert_eq!(detect_language("   "), Language::English);
    }

    #[test]
    fn test_detects_hindi_script() {
        assert_eq!(detect_language("मेरा नाम रवि है"), Language::Hindi);
        // Mixed Hinglish with any Devanagari goes to Hindi
        assert_eq!(detect_language("mera naam क्या hai?"), Language::Hindi);
    }

    #[test]
    fn test_detects_assamese_script() {
        assert_eq!(detect_language("মোৰ নাম কওক"), Language::Assamese);
    }

    #[test]
    fn test_romanized_hinglish_stays_english() {
        // No script signal; romanized Hindi is answered per profile preference
        assert_eq!(
            detect_language("batao aaj ka mausam kaisa hai"),
            Language::English
        );
    }

    #[test]
    fn test_language_round_trip() {
        for lang in [Language::Assamese, Language::Hindi, Language::English] {
            assert_eq!(Language::parse(lang.as_str()), Some(lang));
            assert_eq!(Language::parse(lang.iso_code()), Some(lang));
        }
    }
}
