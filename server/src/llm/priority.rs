//! Rule-based priority detection. Deterministic: no LLM involvement.

use crate::server_config::cfg;

const GOVERNMENT_SCORE: i32 = 50;
const PRIORITY_SENDER_SCORE: i32 = 40;
const URGENCY_SCORE: i32 = 30;

// Suffix entries start with '.', the rest match the domain exactly.
const GOVERNMENT_DOMAINS: &[&str] = &[
    ".gov",
    ".gov.uk",
    ".gouv.fr",
    ".gc.ca",
    ".admin.ch",
    ".bund.de",
    ".europa.eu",
    "berlin.de",
    "muenchen.de",
    "hamburg.de",
];

const URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "deadline",
    "immediately",
    "action required",
    "срочно",
    "важно",
    "терміново",
    "dringend",
    "eilig",
    "frist",
];

#[derive(Debug, Clone, Default)]
pub struct PriorityAssessment {
    pub score_delta: i32,
    pub reasons: Vec<&'static str>,
}

pub fn assess(
    sender: &str,
    subject: &str,
    body_preview: &str,
    priority_senders: &[String],
) -> PriorityAssessment {
    let mut assessment = PriorityAssessment::default();
    let sender_lower = sender.to_lowercase();
    let domain = sender_lower.rsplit('@').next().unwrap_or("");

    if GOVERNMENT_DOMAINS.iter().any(|entry| {
        if let Some(suffix) = entry.strip_prefix('.') {
            domain == suffix || domain.ends_with(entry)
        } else {
            domain == *entry || domain.ends_with(&format!(".{entry}"))
        }
    }) {
        assessment.score_delta += GOVERNMENT_SCORE;
        assessment.reasons.push("government_domain");
    }

    if priority_senders
        .iter()
        .any(|p| !p.is_empty() && sender_lower.contains(&p.to_lowercase()))
    {
        assessment.score_delta += PRIORITY_SENDER_SCORE;
        assessment.reasons.push("configured_priority_sender");
    }

    let haystack = format!("{} {}", subject, body_preview).to_lowercase();
    if URGENCY_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        assessment.score_delta += URGENCY_SCORE;
        assessment.reasons.push("urgency_keywords");
    }

    assessment
}

pub fn combine(base_score: i32, delta: i32) -> i32 {
    (base_score + delta).clamp(0, 100)
}

pub fn is_priority(score: i32) -> bool {
    score >= cfg.priority_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_government_domain_scores() {
        let a = assess("finanzamt@berlin.de", "Steuererklärung 2024", "", &[]);
        assert_eq!(a.score_delta, GOVERNMENT_SCORE);
        assert_eq!(a.reasons, vec!["government_domain"]);
    }

    #[test]
    fn test_government_plus_llm_score_clamps_to_100() {
        let a = assess("finanzamt@berlin.de", "Steuererklärung 2024", "", &[]);
        assert_eq!(combine(85, a.score_delta), 100);
        assert!(is_priority(100));
    }

    #[test]
    fn test_urgency_keywords_multilingual() {
        for subject in ["URGENT: reply", "срочно ответьте", "Dringend!", "deadline tomorrow"] {
            let a = assess("someone@example.com", subject, "", &[]);
            assert_eq!(a.score_delta, URGENCY_SCORE, "subject: {subject}");
        }
    }

    #[test]
    fn test_configured_priority_sender() {
        let senders = vec!["boss@firm.de".to_string()];
        let a = assess("boss@firm.de", "hi", "", &senders);
        assert_eq!(a.score_delta, PRIORITY_SENDER_SCORE);
    }

    #[test]
    fn test_stacked_rules_below_threshold_alone() {
        // Urgency alone (30) must not mark priority
        let a = assess("someone@example.com", "deadline", "", &[]);
        assert!(!is_priority(combine(0, a.score_delta)));
        // Gov + urgency (80) does
        let b = assess("office@muenchen.de", "deadline", "", &[]);
        assert!(is_priority(combine(0, b.score_delta)));
    }

    #[test]
    fn test_plain_sender_no_delta() {
        let a = assess("colleague@firm.de", "lunch", "see you", &[]);
        assert_eq!(a.score_delta, 0);
        assert!(a.reasons.is_empty());
    }
}
