// src/rag/gate.rs

//! Cost gate: decide whether a turn warrants full retrieval.
//!
//! Embedding and index calls are the expensive part of a turn; short generic
//! queries skip them and still get the cheap profile header. Trigger lists
//! cover English, Hinglish, Hindi, and Assamese phrasings because the user
//! base mixes scripts freely.

/// Queries that always need memory: personal facts, past references, recall
const MEMORY_TRIGGERS: &[&str] = &[
    // Name queries (English + Hinglish + Hindi)
    "my name",
    "who am i",
    "about me",
    "remember me",
    "you know me",
    "mera naam",
    "naam batao",
    "naam kya",
    "naam hai",
    "मेरा नाम",
    "नाम बताओ",
    "नाम क्या",
    "मैं कौन",
    "main kaun",
    "mere naam",
    "apna naam",
    "tell me my name",
    "what is my name",
    "what's my name",
    "do you know my name",
    "naam yaad",
    "bhool gaye",
    "याद है",
    "भूल गए",
    // Name queries (Assamese)
    "মোৰ নাম",
    "নাম কওক",
    "মই কোন",
    // Location and personal details
    "where do i live",
    "my location",
    "my city",
    "kaha rehta",
    "कहाँ रहता",
    "my age",
    "how old",
    "kitne saal",
    "कितने साल",
    "meri umar",
    "मेरी उम्र",
    "my job",
    "what do i do",
    "mera kaam",
    "मेरा काम",
    "my birthday",
    "janmdin",
    "जन्मदिन",
    "date of birth",
    // Past conversation references
    "we talked",
    "we discussed",
    "mentioned",
    "said before",
    "told you",
    "earlier",
    "previously",
    "last time",
    "pichli baar",
    "पिछली बार",
    "yesterday",
    "last week",
    "pichhle hafte",
    "पिछले हफ्ते",
    "last month",
    "pichhle mahine",
    "पिछले महीने",
    "pehle",
    "पहले",
    "purani baatein",
    "पुरानी बातें",
    // Recall verbs
    "remember",
    "yaad hai",
    "recall",
    "yaad karo",
    "याद करो",
    "forgot",
    "bhool gaya",
    "भूल गया",
    "what did i",
    "maine kya",
    "मैंने क्या",
    "did i tell",
    "maine bataya",
    "bataya tha",
    "बताया था",
    "kaha tha",
    "कहा था",
    // Preferences
    "my favorite",
    "my favourite",
    "mera pasandida",
    "मेरा पसंदीदा",
    "i like",
    "i love",
    "mujhe pasand",
    "मुझे पसंद",
    "i prefer",
    "mujhe chahiye",
    "मुझे चाहिए",
    "my interest",
    "mera shauk",
    "मेरा शौक",
    "i hate",
    "i dont like",
    "i don't like",
    "mujhe nahi pasand",
    "मुझे नहीं पसंद",
    // Profile queries
    "about myself",
    "apne baare",
    "अपने बारे",
    "my profile",
    "mera profile",
    "my details",
    "meri jankari",
    "मेरी जानकारी",
    "what do you know",
    "tumhe kya pata",
    "तुम्हें क्या पता",
    // Conversation continuity
    "continue",
    "aage batao",
    "आगे बताओ",
    "and then",
    "uske baad",
    "उसके बाद",
    "after that",
];

/// Generic queries that can skip retrieval when short
const SKIP_TRIGGERS: &[&str] = &[
    // General knowledge, no personal context needed
    "what is the definition",
    "what does it mean",
    "explain the concept",
    "how to make",
    "how to create",
    "how to build",
    // Math
    "calculate",
    "compute",
    " + ",
    " - ",
    " * ",
    " / ",
    " = ",
    // Bare greetings
    "hello",
    "hi there",
    "hey there",
    "namaste",
    "namaskar",
];

/// Question words that escalate to retrieval by default
const QUESTION_WORDS: &[&str] = &[
    "who", "what", "when", "where", "why", "how", // English
    "kaun", "kya", "kab", "kahan", "kaise", "kyun", // Hinglish
    "कौन", "क्या", "कब", "कहाँ", "कैसे", "क्यों", // Hindi
    "কোন", "কি", "কেতিয়া", "কত", "কেনেকৈ", // Assamese
];

/// Whether the query needs full RAG retrieval.
///
/// Returns false only for short, clearly-generic queries; question-shaped
/// input defaults to retrieval (better safe than missing context).
pub fn should_use_rag(query: &str) -> bool {
    let lower = query.to_lowercase();

    if MEMORY_TRIGGERS.iter().any(|t| lower.contains(t)) {
        return true;
    }

    let is_generic = SKIP_TRIGGERS.iter().any(|t| lower.contains(t));
    let is_short = query.split_whitespace().count() < 5;
    if is_generic && is_short {
        return false;
    }

    if query.contains('?') || QUESTION_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }

    // Statements and commands with no memory signal
    false
}

/// Personal-info queries get a lower relevance threshold and pin personal
/// facts to the top of the context block
pub fn is_personal_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    const PERSONAL_QUERY_KEYWORDS: &[&str] = &[
        "my name",
        "i am",
        "i'm",
        "call me",
        "who am i",
        "about me",
        "my birthday",
        "my age",
        "i live",
        "my address",
        "my job",
        "remember",
        "dont forget",
        "don't forget",
    ];
    PERSONAL_QUERY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_queries_use_rag() {
        assert!(should_use_rag("What's my name?"));
        assert!(should_use_rag("mera naam batao"));
        assert!(should_use_rag("मेरा नाम क्या है"));
        assert!(should_use_rag("where do I live"));
    }

    #[test]
    fn test_recall_queries_use_rag() {
        assert!(should_use_rag("remember what we discussed yesterday"));
        assert!(should_use_rag("what did i tell you last week"));
    }

    #[test]
    fn test_short_generic_queries_skip_rag() {
        assert!(!should_use_rag("hello"));
        assert!(!should_use_rag("calculate 2 + 2"));
        assert!(!should_use_rag("namaste"));
    }

    #[test]
    fn test_questions_default_to_rag() {
        assert!(should_use_rag("why does the moon change shape every night"));
        assert!(should_use_rag(
            "something happened with my account today can you check it please?"
        ));
    }

    #[test]
    fn test_plain_statements_skip_rag() {
        assert!(!should_use_rag("ok thanks a lot for that"));
    }

    #[test]
    fn test_personal_query_detection() {
        assert!(is_personal_query("what's my name?"));
        assert!(is_personal_query("don't forget my birthday"));
        assert!(!is_personal_query("top cricket news"));
    }
}
