// src/prompt/mod.rs

//! Domain classification and system-prompt composition.
//!
//! The prompt is assembled in fixed layers: persona, today's date,
//! personalization, domain response schema, web evidence with citation
//! rules, then the retrieval context. The conversation history tail is
//! passed to the LLM as messages, not prompt text.

use chrono::Utc;

use crate::language::Language;
use crate::memory::UserProfile;

/// Base persona and honesty rules
pub const DEFAULT_PERSONA: &str = "You are Samvad, a helpful and friendly AI assistant. \
You are conversational, warm, and supportive, and you help users across education, sports, news, and everyday questions. \
You provide accurate, thoughtful answers and admit when you're unsure about something. \
You respond in the same language as the user's input (Assamese, Hindi, English, or Hinglish) to make them feel comfortable. \
Hinglish (Hindi-English mix) is fully supported - users can mix Hindi and English freely.\n\n\
IMPORTANT RULES:\n\
- Only answer what the user asks. Don't volunteer unrelated information.\n\
- Stay focused on their question. Don't suggest other topics unless relevant.\n\
- Be helpful for THEIR question, not all possible questions.";

/// Turn categories driving the response schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Prediction,
    Education,
    News,
    Horoscope,
    Notes,
    Generic,
}

const ZODIAC_SIGNS: &[&str] = &[
    "aries",
    "taurus",
    "gemini",
    "cancer",
    "leo",
    "virgo",
    "libra",
    "scorpio",
    "sagittarius",
    "capricorn",
    "aquarius",
    "pisces",
];

/// Tag the turn by keyword heuristics
pub fn classify_domain(message: &str) -> Domain {
    let lower = message.to_lowercase();

    if crate::sports::is_sports_query(message)
        || ["probable 11", "probable xi", "playing 11", "win probability", "forecast"]
            .iter()
            .any(|k| lower.contains(k))
    {
        return Domain::Prediction;
    }
    if ["explain", "lesson", "homework", "notes", "diagram", "study", "learn"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Domain::Education;
    }
    if ["news", "headline", "top stories", "breaking"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Domain::News;
    }
    if lower.contains("horoscope")
        || lower.contains("zodiac")
        || ZODIAC_SIGNS.iter().any(|sign| lower.contains(sign))
    {
        return Domain::Horoscope;
    }
    if ["note this", "save this", "todo", "task list", "reminder"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Domain::Notes;
    }

    Domain::Generic
}

/// Strict response schema per domain
fn domain_template(domain: Domain) -> &'static str {
    match domain {
        Domain::Prediction => {
            "FORMAT AS:\n\
             1) Quick verdict: one line win probability or outcome.\n\
             2) Probable XIs: two bullet lists (Team A, Team B) with up to 11 names each.\n\
             3) Key factors (3 bullets): pitch/conditions, form, matchups.\n\
             4) Confidence: single % number.\n\
             5) Next actions (2 bullets): what the user can do/track.\n\
             Always cite sources with [n]. Keep concise."
        }
        Domain::Education => {
            "FORMAT AS:\n\
             1) TL;DR: 2 sentences.\n\
             2) Steps: short numbered list.\n\
             3) Example/analogy: 2 sentences.\n\
             4) Visual idea: describe a diagram/animation in one sentence.\n\
             5) Practice next: 2 bullet prompts the user can try."
        }
        Domain::News => {
            "FORMAT AS:\n\
             1) Top 5 headlines (bullets with [n] source tags, include time if available).\n\
             2) One-liner takeaway for each.\n\
             3) If data is older than 24h, say 'latest available' and proceed.\n\
             4) End with 'Want business, sports, or local next?'"
        }
        Domain::Horoscope => {
            "FORMAT AS:\n\
             1) Overall vibe (1 line)\n\
             2) Lucky color/number\n\
             3) Focus for today\n\
             4) Watch out for\n\
             5) One-line action"
        }
        Domain::Notes => {
            "FORMAT AS:\n\
             1) Title\n\
             2) Bullets (3-5 concise points)\n\
             3) Action items (checkbox style)\n\
             4) Tags (comma-separated)\n\
             Keep it short and ready to save."
        }
        Domain::Generic => "",
    }
}

/// Inputs for one prompt assembly
pub struct PromptInputs<'a> {
    pub persona: &'a str,
    pub profile: Option<&'a UserProfile>,
    pub detected_language: Language,
    pub domain: Domain,
    /// Numbered web evidence, when the pipeline produced any
    pub evidence: Option<&'a str>,
    /// Retrieval context block from the RAG ranker
    pub rag_block: Option<&'a str>,
    /// Fresh data was required for this turn (controls the fallback directive)
    pub fresh_data_required: bool,
    pub sports_mode: bool,
}

/// The response language: an explicit profile preference wins over script
/// detection
pub fn effective_language(profile: Option<&UserProfile>, detected: Language) -> Language {
    profile
        .and_then(|p| p.preference_str("preferred_language"))
        .and_then(Language::parse)
        .unwrap_or(detected)
}

/// Assemble the layered system prompt
pub fn compose_system_prompt(inputs: &PromptInputs) -> String {
    let mut prompt = String::with_capacity(2048);

    // 1. Persona and honesty rules
    prompt.push_str(inputs.persona);

    // 2. Today's date, to curb hallucinated recency
    let now = Utc::now();
    prompt.push_str(&format!(
        "\n\nToday's date: {} ({}). Always use this date when referencing 'today'.",
        now.format("%B %d, %Y"),
        now.format("%A")
    ));

    // 3. Personalization
    let language = effective_language(inputs.profile, inputs.detected_language);
    match language {
        Language::Hindi => prompt.push_str(
            "\n\nIMPORTANT: Respond primarily in Hindi (हिंदी). Use Devanagari script.",
        ),
        Language::Assamese => prompt.push_str(
            "\n\nIMPORTANT: Respond primarily in Assamese (অসমীয়া). Use Bengali script.",
        ),
        Language::English => {}
    }

    if let Some(profile) = inputs.profile {
        if let Some(name) = profile.preference_str("name") {
            prompt.push_str(&format!("\n\nUser's name is {}.", name));
        }

        let tone = profile.preference_str("tone").unwrap_or("friendly");
        let tone_instruction = match tone {
            "professional" => {
                "Maintain a clear, formal, and professional tone. Be precise and businesslike."
            }
            "supportive" => {
                "Be empathetic, caring, and encouraging. Provide emotional support when needed."
            }
            _ => "Use a warm, casual, and friendly tone. Be conversational like talking to a friend.",
        };
        prompt.push_str(&format!("\n\nTone: {}", tone_instruction));

        let style = profile.preference_str("response_style").unwrap_or("balanced");
        let style_instruction = match style {
            "concise" => {
                "Keep responses short and to the point. Maximum 2-3 sentences unless more detail is explicitly requested."
            }
            "detailed" => {
                "Provide comprehensive, in-depth explanations with examples and additional context."
            }
            _ => "Provide moderate detail. Balance brevity with completeness.",
        };
        prompt.push_str(&format!("\n\nResponse Style: {}", style_instruction));

        if !profile.interests.is_empty() {
            prompt.push_str(&format!(
                "\n\nUser's main interests: {}. Tailor responses to align with these interests when relevant.",
                profile.interests.join(", ")
            ));
        }
    }

    prompt.push_str(
        "\n\nUse conversation memory first. Only rely on web evidence when it adds new or more \
         recent info; if you cite web, use [n] tied to sources.",
    );

    // 4. Domain response schema
    let template = domain_template(inputs.domain);
    if !template.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(template);
    }

    // 5. Evidence block with anti-deflection and citation rules
    match inputs.evidence {
        Some(evidence) if !evidence.trim().is_empty() => {
            prompt.push_str("\n\nYOU HAVE EXPERT DATA - ANALYZE AND USE IT.");
            if inputs.sports_mode {
                prompt.push_str(
                    "\n\nSPORTS ANALYSIS MODE:\n\
                     You have expert match previews from multiple sources.\n\
                     Analyze ALL sources - combine insights, compare predictions, provide comprehensive analysis.\n\
                     Provide: team form, player analysis, pitch conditions, head-to-head, predictions, win probability.\n\
                     Say 'Based on my analysis...' - NEVER mention 'web search' or 'searching'.",
                );
            } else {
                prompt.push_str(
                    "\nYou have information from multiple sources. Analyze and synthesize it.\n\
                     Say 'Based on my analysis...' - NEVER say 'web search', 'searching', or 'I cannot generate'.",
                );
            }
            prompt.push_str(
                "\n\nCITATION REQUIREMENTS:\n\
                 - Cite only when using web evidence; use [1], [2], [3] linked to provided sources.\n\
                 - Place citations immediately after the fact.\n\
                 - If a claim is from memory, do NOT attach a web citation.\n\
                 - Don't list sources separately; weave them inline.",
            );
            prompt.push_str("\n\n");
            prompt.push_str(evidence);
        }
        _ if inputs.fresh_data_required => {
            // Fresh data was needed but nothing came back
            prompt.push_str(
                "\n\n[No live web data fetched; rely on memory/known info only. Do NOT fabricate \
                 fresh facts. If asked about live data, say it could not be fetched right now.]",
            );
        }
        _ => {}
    }

    // 6. Retrieval context
    if let Some(rag) = inputs.rag_block {
        if !rag.trim().is_empty() {
            prompt.push_str("\n\nContext information:\n");
            prompt.push_str(rag);
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile_with(prefs: &[(&str, serde_json::Value)]) -> UserProfile {
        let mut profile = UserProfile::empty("u1");
        for (k, v) in prefs {
            profile.preferences.insert(k.to_string(), v.clone());
        }
        profile
    }

    #[test]
    fn test_domain_classification() {
        assert_eq!(classify_domain("India vs Australia prediction"), Domain::Prediction);
        assert_eq!(classify_domain("explain photosynthesis"), Domain::Education);
        assert_eq!(classify_domain("top stories today"), Domain::News);
        assert_eq!(classify_domain("leo horoscope"), Domain::Horoscope);
        assert_eq!(classify_domain("note this: buy milk"), Domain::Notes);
        assert_eq!(classify_domain("tell me a joke"), Domain::Generic);
    }

    #[test]
    fn test_prompt_contains_todays_date() {
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: None,
            detected_language: Language::English,
            domain: Domain::Generic,
            evidence: None,
            rag_block: None,
            fresh_data_required: false,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        let year = Utc::now().format("%Y").to_string();
        assert!(prompt.contains("Today's date"));
        assert!(prompt.contains(&year));
    }

    #[test]
    fn test_hindi_preference_adds_devanagari_directive() {
        let profile = profile_with(&[("preferred_language", json!("hindi"))]);
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: Some(&profile),
            detected_language: Language::English,
            domain: Domain::Generic,
            evidence: None,
            rag_block: None,
            fresh_data_required: false,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("Respond primarily in Hindi"));
        assert!(prompt.contains("Devanagari"));
    }

    #[test]
    fn test_detected_language_used_when_no_preference() {
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: None,
            detected_language: Language::Assamese,
            domain: Domain::Generic,
            evidence: None,
            rag_block: None,
            fresh_data_required: false,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("Respond primarily in Assamese"));
    }

    #[test]
    fn test_evidence_block_brings_citation_rules() {
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: None,
            detected_language: Language::English,
            domain: Domain::News,
            evidence: Some("[1] Headline\nSource: https://news.example"),
            rag_block: None,
            fresh_data_required: true,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("CITATION REQUIREMENTS"));
        assert!(prompt.contains("I cannot generate"));
        assert!(prompt.contains("[1] Headline"));
        // Fallback directive must not fire when evidence exists
        assert!(!prompt.contains("No live web data fetched"));
    }

    #[test]
    fn test_missing_fresh_data_adds_fallback_directive() {
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: None,
            detected_language: Language::English,
            domain: Domain::News,
            evidence: None,
            rag_block: None,
            fresh_data_required: true,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("Do NOT fabricate"));
    }

    #[test]
    fn test_prediction_domain_schema_present() {
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: None,
            detected_language: Language::English,
            domain: Domain::Prediction,
            evidence: None,
            rag_block: None,
            fresh_data_required: false,
            sports_mode: true,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("Probable XIs"));
        assert!(prompt.contains("Confidence"));
    }

    #[test]
    fn test_name_and_interests_injected() {
        let mut profile = profile_with(&[("name", json!("Ravi"))]);
        profile.interests = vec!["sports".into(), "cricket".into()];
        let inputs = PromptInputs {
            persona: DEFAULT_PERSONA,
            profile: Some(&profile),
            detected_language: Language::English,
            domain: Domain::Generic,
            evidence: None,
            rag_block: None,
            fresh_data_required: false,
            sports_mode: false,
        };
        let prompt = compose_system_prompt(&inputs);
        assert!(prompt.contains("User's name is Ravi"));
        assert!(prompt.contains("sports, cricket"));
    }
}
