// src/profile/mod.rs

//! Rule-based profile learner.
//!
//! Pure functions over the user's message text: extract durable facts (name,
//! location, likes, interests) into a `ProfileDelta` that merges
//! idempotently. Runs after every admitted turn; for guests the delta only
//! lives in the orchestrator's session map.

use serde_json::json;

use crate::language::Language;
use crate::memory::ProfileDelta;

const SPORT_KEYWORDS: &[&str] = &[
    "cricket",
    "football",
    "basketball",
    "tennis",
    "sports",
    "match",
    "game",
];
const TECH_KEYWORDS: &[&str] = &[
    "technology",
    "coding",
    "programming",
    "python",
    "rust",
    "ai",
    "machine learning",
];
const ENTERTAINMENT_KEYWORDS: &[&str] = &["movie", "film", "music", "song", "series", "show"];
const EDUCATION_KEYWORDS: &[&str] = &[
    "study",
    "exam",
    "course",
    "learning",
    "school",
    "college",
    "university",
];

/// Declarative phrases that mark a message as carrying personal information.
/// Shared with the memory pipeline's `is_personal_info` flag and the RAG
/// ranker's personal boost.
pub const PERSONAL_PATTERNS: &[&str] = &[
    "my name is",
    "i am ",
    "i'm ",
    "call me",
    "remember",
    "dont forget",
    "don't forget",
    "my birthday",
    "i live in",
    "my age",
    "years old",
    "my job",
    "i work",
];

/// True when the message contains a declarative pattern about the user
pub fn contains_personal_info(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERSONAL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Extract a profile delta from one user message.
///
/// `increment_messages` is always set: the caller decides whether the delta
/// reaches the durable store or only the session profile.
pub fn learn_from_message(message: &str, detected_language: Language) -> ProfileDelta {
    let lower = message.to_lowercase();
    let mut delta = ProfileDelta {
        increment_messages: true,
        ..Default::default()
    };

    // English is the fallback, not a signal; only a scripted message moves
    // the language preference
    if detected_language != Language::English {
        delta
            .preferences
            .insert("preferred_language".into(), json!(detected_language.as_str()));
    }

    if let Some(name) = extract_after_phrase(message, &lower, &["my name is", "call me"]) {
        if let Some(first) = name.split_whitespace().next() {
            let cleaned = first.trim_matches(|c: char| ",.!?".contains(c));
            if !cleaned.is_empty() {
                delta.preferences.insert("name".into(), json!(cleaned));
            }
        }
    }

    if let Some(rest) = extract_after_phrase(message, &lower, &["i live in", "i'm from"]) {
        let location = rest.split(',').next().unwrap_or("").trim();
        let location: String = location
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ");
        let location = location.trim_end_matches(|c: char| ".!?".contains(c));
        if !location.is_empty() {
            delta.preferences.insert("location".into(), json!(location));
        }
    }

    extract_interests(&lower, &mut delta);

    if let Some(liked) = extract_after_phrase(message, &lower, &["i like", "i love"]) {
        let liked = clamp_fragment(&liked);
        if !liked.is_empty() {
            delta.preferences.insert("likes".into(), json!([liked]));
        }
    }

    if let Some(disliked) = extract_after_phrase(message, &lower, &["i hate", "i don't like", "i dont like"])
    {
        let disliked = clamp_fragment(&disliked);
        if !disliked.is_empty() {
            delta.preferences.insert("dislikes".into(), json!([disliked]));
        }
    }

    delta
}

/// Scan history (newest first) for the last stated name. Used when the
/// profile store is degraded but the session still knows who the user is.
pub fn find_name_in_history<'a, I>(user_messages: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    for content in user_messages {
        let lower = content.to_lowercase();
        if let Some(name) = extract_after_phrase(content, &lower, &["my name is", "call me"]) {
            if let Some(first) = name.split_whitespace().next() {
                let cleaned = first.trim_matches(|c: char| ",. ".contains(c));
                if !cleaned.is_empty() {
                    return Some(cleaned.to_string());
                }
            }
        }
    }
    None
}

/// Find the first matching phrase and return the original-cased text after it
fn extract_after_phrase(original: &str, lower: &str, phrases: &[&str]) -> Option<String> {
    for phrase in phrases {
        if let Some(pos) = lower.find(phrase) {
            // Offsets into `lower` can drift from `original` for exotic
            // casings; a checked slice keeps this panic-free.
            if let Some(after) = original.get(pos + phrase.len()..) {
                let after = after.trim();
                if !after.is_empty() {
                    return Some(after.to_string());
                }
            }
        }
    }
    None
}

/// First sentence fragment, bounded to 100 chars
fn clamp_fragment(text: &str) -> String {
    let fragment = text.split('.').next().unwrap_or("").trim();
    fragment.chars().take(100).collect()
}

fn extract_interests(lower: &str, delta: &mut ProfileDelta) {
    for sport in SPORT_KEYWORDS {
        if lower.contains(sport) {
            delta.interests.push("sports".to_string());
            if *sport != "sports" && *sport != "match" && *sport != "game" {
                // Keep the specific sport as its own tag
                delta.interests.push(sport.to_string());
            }
            break;
        }
    }

    for keyword in TECH_KEYWORDS {
        if lower.contains(keyword) {
            delta.interests.push("technology".to_string());
            break;
        }
    }

    for keyword in ENTERTAINMENT_KEYWORDS {
        if lower.contains(keyword) {
            delta.interests.push("entertainment".to_string());
            break;
        }
    }

    for keyword in EDUCATION_KEYWORDS {
        if lower.contains(keyword) {
            delta.interests.push("education".to_string());
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::UserProfile;

    #[test]
    fn test_extracts_name_from_declaration() {
        let delta = learn_from_message("My name is Ravi and I like cricket.", Language::English);
        assert_eq!(
            delta.preferences.get("name").and_then(|v| v.as_str()),
            Some("Ravi")
        );
    }

    #[test]
    fn test_extracts_name_from_call_me() {
        let delta = learn_from_message("please call me Anu", Language::English);
        assert_eq!(
            delta.preferences.get("name").and_then(|v| v.as_str()),
            Some("Anu")
        );
    }

    #[test]
    fn test_extracts_location_up_to_comma() {
        let delta = learn_from_message("I live in Guwahati, Assam", Language::English);
        assert_eq!(
            delta.preferences.get("location").and_then(|v| v.as_str()),
            Some("Guwahati")
        );
    }

    #[test]
    fn test_extracts_sport_interest_with_specific_tag() {
        let delta = learn_from_message("I watched cricket yesterday", Language::English);
        assert!(delta.interests.contains(&"sports".to_string()));
        assert!(delta.interests.contains(&"cricket".to_string()));
    }

    #[test]
    fn test_extracts_likes_bounded() {
        let long_tail = "x".repeat(300);
        let delta = learn_from_message(&format!("I love {}", long_tail), Language::English);
        let likes = delta.preferences.get("likes").unwrap().as_array().unwrap();
        assert_eq!(likes.len(), 1);
        assert!(likes[0].as_str().unwrap().len() <= 100);
    }

    #[test]
    fn test_extracts_dislikes() {
        let delta = learn_from_message("I hate traffic. Anyway.", Language::English);
        let dislikes = delta.preferences.get("dislikes").unwrap().as_array().unwrap();
        assert_eq!(dislikes[0].as_str(), Some("traffic"));
    }

    #[test]
    fn test_language_preference_recorded_for_scripted_input() {
        let delta = learn_from_message("kuch bhi", Language::Hindi);
        assert_eq!(
            delta
                .preferences
                .get("preferred_language")
                .and_then(|v| v.as_str()),
            Some("hindi")
        );

        // An English turn must not clobber a stored preference
        let delta = learn_from_message("hello there", Language::English);
        assert!(!delta.preferences.contains_key("preferred_language"));
    }

    #[test]
    fn test_personal_info_detection() {
        assert!(contains_personal_info("My name is Ravi"));
        assert!(contains_personal_info("don't forget my birthday"));
        assert!(!contains_personal_info("what is the capital of France?"));
    }

    #[test]
    fn test_scenario_s1_profile_after_first_message() {
        // "My name is Ravi and I like cricket." -> name=Ravi, interests include sports+cricket
        let delta = learn_from_message("My name is Ravi and I like cricket.", Language::English);
        let mut profile = UserProfile::empty("user-a");
        profile.apply_delta(&delta);

        assert_eq!(profile.preference_str("name"), Some("Ravi"));
        assert!(profile.interests.contains(&"sports".to_string()));
        assert!(profile.interests.contains(&"cricket".to_string()));
        assert_eq!(profile.total_messages, 1);
    }

    #[test]
    fn test_find_name_in_history_takes_most_recent() {
        let history = vec![
            "call me Anu please",
            "what's the weather",
            "my name is Ravi",
        ];
        // Caller passes newest-first
        assert_eq!(
            find_name_in_history(history.iter().map(|s| *s)),
            Some("Anu".to_string())
        );
    }
}
