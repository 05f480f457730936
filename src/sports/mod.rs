// src/sports/mod.rs

//! Sports-query parsing and freshness signals.
//!
//! These heuristics decide when a turn is a sports/prediction turn (which
//! keys the shared prediction cache) and when it needs fresh web data at all.

use chrono::Utc;

/// Words around "vs" that are query phrasing, not team names
const TEAM_STOPWORDS: &[&str] = &[
    "who", "will", "win", "wins", "won", "today", "tonight", "tomorrow", "match", "the",
    "prediction", "predict", "predictions", "between", "for", "of", "probable", "xi", "playing",
    "odds", "forecast", "preview", "analysis", "latest", "news",
];

const CRICKET_KEYWORDS: &[&str] = &[
    "cricket",
    "ipl",
    "t20",
    "test match",
    "odi",
    "wicket",
    "bowler",
    "batsman",
];
const FOOTBALL_KEYWORDS: &[&str] = &[
    "football",
    "soccer",
    "goal",
    "striker",
    "midfielder",
    "premier league",
    "la liga",
];

const SPORTS_SIGNAL_KEYWORDS: &[&str] = &[
    "cricket", "football", "match", "prediction", "vs", "versus", "team", "ipl", "t20", "odds",
    "betting", "probable xi", "playing 11", "forecast",
];

const TIME_KEYWORDS: &[&str] = &[
    "latest",
    "recent",
    "today",
    "now",
    "current",
    "this week",
    "this month",
    "yesterday",
    "tonight",
    "right now",
    "currently",
    "breaking",
    "update",
    "news",
    "headline",
    "top stories",
    "live",
];

const INFO_KEYWORDS: &[&str] = &[
    "what is happening",
    "what happened",
    "who won",
    "when is",
    "how much",
    "price of",
    "cost of",
    "weather in",
    "temperature",
    "forecast",
    "result",
];

const DOMAIN_KEYWORDS: &[&str] = &[
    "stock",
    "market",
    "cryptocurrency",
    "bitcoin",
    "election",
    "score",
    "tournament",
    "release",
    "flight",
    "ticket",
];

/// Extract match details like "india vs australia", normalized (lowercased,
/// whitespace-collapsed) so the prediction-cache tuple is stable across users.
///
/// Team names are the 1-2 non-stopword words on each side of the separator;
/// "who wins PRS vs SYS?" and "prs vs sys prediction" key the same bundle.
pub fn extract_match_details(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    let tokens: Vec<String> = lower
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_string()
        })
        .collect();

    if let Some(vs_pos) = tokens
        .iter()
        .position(|t| t.as_str() == "vs" || t.as_str() == "versus")
    {
        let mut team1: Vec<&str> = tokens[..vs_pos]
            .iter()
            .rev()
            .map(|t| t.as_str())
            .take_while(|t| is_team_word(t))
            .take(2)
            .collect();
        team1.reverse();

        let team2: Vec<&str> = tokens[vs_pos + 1..]
            .iter()
            .map(|t| t.as_str())
            .take_while(|t| is_team_word(t))
            .take(2)
            .collect();

        if !team1.is_empty() && !team2.is_empty() {
            return Some(format!("{} vs {}", team1.join(" "), team2.join(" ")));
        }
    }

    // Short form "ind-aus" (exactly one hyphen, alphabetic halves)
    for token in query.split_whitespace() {
        let parts: Vec<&str> = token.split('-').collect();
        if parts.len() == 2
            && parts.iter().all(|p| {
                p.len() >= 2 && p.chars().all(|c| c.is_ascii_alphabetic())
            })
        {
            return Some(format!(
                "{} vs {}",
                parts[0].to_lowercase(),
                parts[1].to_lowercase()
            ));
        }
    }

    None
}

fn is_team_word(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_alphabetic())
        && !TEAM_STOPWORDS.contains(&token)
}

/// Sport classification for the prediction-cache key. Cricket is the default
/// audience.
pub fn detect_sport(query: &str) -> &'static str {
    let lower = query.to_lowercase();

    if CRICKET_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return "cricket";
    }
    if FOOTBALL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return "football";
    }
    "cricket"
}

/// Sports query sub-type for the prediction-cache key
pub fn detect_query_type(query: &str) -> &'static str {
    let lower = query.to_lowercase();

    if lower.contains("head to head") || lower.contains("h2h") {
        "head_to_head"
    } else if lower.contains("stats") || lower.contains("statistics") || lower.contains("performance")
    {
        "stats"
    } else if lower.contains("compare") || lower.contains("comparison") {
        "comparison"
    } else if lower.contains("upcoming") || lower.contains("schedule") {
        "upcoming"
    } else {
        "prediction"
    }
}

/// Whether the turn is a sports turn at all (keys the shared cache and the
/// 6-hour freshness window)
pub fn is_sports_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    SPORTS_SIGNAL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Auto-detect whether the turn needs fresh web data, independent of sports
pub fn needs_fresh_data(message: &str) -> bool {
    let lower = message.to_lowercase();
    TIME_KEYWORDS
        .iter()
        .chain(INFO_KEYWORDS.iter())
        .chain(DOMAIN_KEYWORDS.iter())
        .any(|kw| lower.contains(kw))
}

/// Widen a sports query with the expert preview sites worth scraping
pub fn enhance_sports_query(query: &str) -> String {
    if let Some(details) = extract_match_details(query) {
        let sport = detect_sport(query);
        let expert_sites = "crictracker sportskeeda espncricinfo cricbuzz insidesport";
        return format!(
            "{} {} match preview prediction analysis {}",
            details, sport, expert_sites
        );
    }
    query.to_string()
}

/// Build a concise, search-friendly query instead of shipping the raw
/// message to the provider.
pub fn refine_search_query(message: &str, sports: bool) -> String {
    let msg = message.trim();
    let lower = msg.to_lowercase();
    let today = Utc::now().format("%B %d, %Y");

    if sports {
        if let Some(details) = extract_match_details(msg) {
            return format!("{} latest match news and probable XI {}", details, today);
        }
        return format!("latest sports match updates and probable XI {}", today);
    }

    if lower.contains("news")
        || lower.contains("today")
        || lower.contains("headline")
        || lower.contains("breaking")
    {
        return format!("top news headlines {}", today);
    }

    // Generic fallback: keep only the first 10 words
    msg.split_whitespace().take(10).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_vs_match_details() {
        assert_eq!(
            extract_match_details("India vs Australia prediction"),
            Some("india vs australia".to_string())
        );
        assert_eq!(
            extract_match_details("who wins PRS vs SYS?"),
            Some("prs vs sys".to_string())
        );
    }

    #[test]
    fn test_match_details_are_normalized() {
        // Same tuple regardless of spacing and case
        let a = extract_match_details("INDIA   vs  AUSTRALIA today").unwrap();
        let b = extract_match_details("india vs australia").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_match_details_in_plain_question() {
        assert_eq!(extract_match_details("what is the capital of France"), None);
    }

    #[test]
    fn test_hyphenated_match_shorthand() {
        assert_eq!(
            extract_match_details("ind-aus score update"),
            Some("ind vs aus".to_string())
        );
    }

    #[test]
    fn test_phrasing_does_not_leak_into_match_key() {
        assert_eq!(
            extract_match_details("prediction for India vs Australia today"),
            Some("india vs australia".to_string())
        );
    }

    #[test]
    fn test_sport_detection() {
        assert_eq!(detect_sport("ipl match tonight"), "cricket");
        assert_eq!(detect_sport("premier league striker form"), "football");
        assert_eq!(detect_sport("abc vs xyz"), "cricket"); // default
    }

    #[test]
    fn test_query_type_detection() {
        assert_eq!(detect_query_type("who will win india vs australia"), "prediction");
        assert_eq!(detect_query_type("virat kohli stats this year"), "stats");
        assert_eq!(detect_query_type("india vs australia h2h record"), "head_to_head");
        assert_eq!(detect_query_type("upcoming ipl schedule"), "upcoming");
    }

    #[test]
    fn test_sports_signal() {
        assert!(is_sports_query("India vs Australia prediction"));
        assert!(!is_sports_query("explain photosynthesis"));
    }

    #[test]
    fn test_fresh_data_signals() {
        assert!(needs_fresh_data("latest news today"));
        assert!(needs_fresh_data("who won the election"));
        assert!(!needs_fresh_data("explain recursion to me"));
    }

    #[test]
    fn test_refine_news_query_carries_date() {
        let refined = refine_search_query("any news today?", false);
        assert!(refined.starts_with("top news headlines"));
    }

    #[test]
    fn test_refine_generic_query_trims_words() {
        let long = "one two three four five six seven eight nine ten eleven twelve";
        let refined = refine_search_query(long, false);
        assert_eq!(refined.split_whitespace().count(), 10);
    }

    #[test]
    fn test_enhanced_sports_query_mentions_experts() {
        let enhanced = enhance_sports_query("India vs Australia prediction");
        assert!(enhanced.contains("india vs australia"));
        assert!(enhanced.contains("cricbuzz"));
    }
}
