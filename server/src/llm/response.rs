use entity::sea_orm_active_enums::Tone;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::DatabaseConnection;

use crate::{
    db_core::prelude::email_processing_queue,
    error::{AppError, AppResult},
    llm::{client::LlmClient, prompts},
    model::email_queue::EmailQueueCtrl,
    rag::context::RagContext,
    rate_limiters::RateLimiters,
    server_config::cfg,
    HttpClient,
};

#[derive(Debug, thiserror::Error)]
pub enum DraftValidationError {
    #[error("draft too short: {0} chars")]
    TooShort(usize),
    #[error("draft too long: {0} chars")]
    TooLong(usize),
    #[error("draft language {detected} does not match expected {expected}")]
    LanguageMismatch { detected: String, expected: String },
}

pub struct ResponseGenerationService {
    conn: DatabaseConnection,
    llm: LlmClient,
}

impl ResponseGenerationService {
    pub fn new(
        conn: DatabaseConnection,
        http_client: HttpClient,
        rate_limiters: RateLimiters,
    ) -> Self {
        ResponseGenerationService {
            conn,
            llm: LlmClient::new(http_client, rate_limiters),
        }
    }

    /// Drafts a reply for a needs_response email that received no draft from
    /// the classification call. Persists the validated draft.
    pub async fn generate(
        &self,
        email: &email_processing_queue::Model,
        body: &str,
        rag: &RagContext,
    ) -> AppResult<String> {
        let language = email
            .detected_language
            .clone()
            .unwrap_or_else(|| detect_language(body));
        let tone = email.tone.unwrap_or_else(|| detect_tone(&email.sender, &email.subject));
        let tone_str = tone_label(tone);

        let rag_text = prompts::format_rag_context(rag);
        let system = prompts::response_system_prompt(&language, tone_str);
        let user = prompts::build_response_prompt(&email.sender, &email.subject, body, &rag_text);

        let completion = self.llm.send_text_prompt(&system, &user).await.map_err(AppError::from)?;
        let draft = completion.content.trim().to_string();

        validate_draft(&draft, &language)
            .map_err(|e| AppError::BadRequest(format!("Draft validation failed: {e}")))?;

        EmailQueueCtrl::set_draft(&self.conn, email.id, &draft).await?;

        Ok(draft)
    }
}

pub fn tone_label(tone: Tone) -> &'static str {
    match tone {
        Tone::Formal => "formal",
        Tone::Professional => "professional",
        Tone::Casual => "casual",
    }
}

/// Content-based language heuristic; falls back to "en". Only the languages
/// the greeting table knows are distinguished.
pub fn detect_language(text: &str) -> String {
    static RE_CYRILLIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{0400}-\u{04FF}]").unwrap());
    static RE_GERMAN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)[äöüß]|\b(und|nicht|sehr|geehrte|grüße|vielen|dank|bitte)\b").unwrap()
    });

    let total = text.chars().filter(|c| c.is_alphabetic()).count().max(1);
    let cyrillic = RE_CYRILLIC.find_iter(text).count();
    if cyrillic * 5 >= total {
        return "ru".to_string();
    }

    if RE_GERMAN.find_iter(text).count() >= 2 {
        return "de".to_string();
    }

    "en".to_string()
}

/// Rule-based tone from the sender/subject style; falls back to
/// professional.
pub fn detect_tone(sender: &str, subject: &str) -> Tone {
    let subject_lower = subject.to_lowercase();
    let sender_lower = sender.to_lowercase();

    const FORMAL_MARKERS: &[&str] = &[
        "invoice",
        "contract",
        "rechnung",
        "vertrag",
        "steuer",
        "official",
        "application",
        "antrag",
    ];
    const FORMAL_DOMAINS: &[&str] = &[".gov", "berlin.de", ".bund.de", "amt"];
    const CASUAL_MARKERS: &[&str] = &["hey", "hi!", ":)", "fyi", "quick question", "lunch"];

    if FORMAL_DOMAINS.iter().any(|d| sender_lower.contains(d))
        || FORMAL_MARKERS.iter().any(|m| subject_lower.contains(m))
    {
        return Tone::Formal;
    }

    if CASUAL_MARKERS.iter().any(|m| subject_lower.contains(m)) {
        return Tone::Casual;
    }

    Tone::Professional
}

/// Acceptance rules for a generated draft. Length and language are hard
/// requirements; a missing greeting/closing only logs a warning.
pub fn validate_draft(draft: &str, expected_language: &str) -> Result<(), DraftValidationError> {
    let length = draft.chars().count();
    if length < cfg.draft_min_len {
        return Err(DraftValidationError::TooShort(length));
    }
    if length > cfg.draft_max_len {
        return Err(DraftValidationError::TooLong(length));
    }

    let detected = detect_language(draft);
    if detected != expected_language {
        return Err(DraftValidationError::LanguageMismatch {
            detected,
            expected: expected_language.to_string(),
        });
    }

    if !has_greeting_or_closing(draft, expected_language) {
        tracing::warn!("Draft has no recognizable greeting or closing");
    }

    Ok(())
}

pub fn has_greeting_or_closing(draft: &str, language: &str) -> bool {
    let draft_lower = draft.to_lowercase();
    for tone in ["formal", "professional", "casual"] {
        let (greeting, closing) = prompts::exemplars(language, tone);
        if draft_lower.contains(&greeting.to_lowercase())
            || draft_lower.contains(&closing.to_lowercase())
        {
            return true;
        }
    }
    // Short generic openers shared across tones
    const GENERIC: &[&str] = &["hello", "hi", "dear", "hallo", "привет", "здравствуйте"];
    GENERIC.iter().any(|g| draft_lower.starts_with(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_russian() {
        assert_eq!(detect_language("Здравствуйте, как дела? Спасибо."), "ru");
    }

    #[test]
    fn test_detect_language_german() {
        assert_eq!(
            detect_language("Sehr geehrte Damen und Herren, vielen Dank für Ihre Nachricht."),
            "de"
        );
    }

    #[test]
    fn test_detect_language_default_english() {
        assert_eq!(detect_language("Hello, the deadline is December 15th."), "en");
    }

    #[test]
    fn test_detect_tone() {
        assert_eq!(detect_tone("finanzamt@berlin.de", "Steuererklärung"), Tone::Formal);
        assert_eq!(detect_tone("friend@gmail.com", "hey lunch tomorrow?"), Tone::Casual);
        assert_eq!(detect_tone("colleague@firm.de", "Project update"), Tone::Professional);
    }

    #[test]
    fn test_validate_draft_length_boundaries() {
        // Exactly 50 chars passes, 49 fails
        let body_50 = format!("Hello, {}Best regards", "x".repeat(50 - 7 - 12));
        assert_eq!(body_50.chars().count(), 50);
        assert!(validate_draft(&body_50, "en").is_ok());

        let body_49 = format!("Hello, {}Best regards", "x".repeat(49 - 7 - 12));
        assert!(matches!(
            validate_draft(&body_49, "en"),
            Err(DraftValidationError::TooShort(49))
        ));
    }

    #[test]
    fn test_validate_draft_too_long() {
        let body = format!("Hello, {} Best regards", "word ".repeat(500));
        assert!(matches!(
            validate_draft(&body, "en"),
            Err(DraftValidationError::TooLong(_))
        ));
    }

    #[test]
    fn test_validate_draft_language_mismatch() {
        let draft = "Здравствуйте, отправляю вам документы. Хорошего дня! С уважением, Анна";
        assert!(matches!(
            validate_draft(draft, "en"),
            Err(DraftValidationError::LanguageMismatch { .. })
        ));
    }

    #[test]
    fn test_spec_sample_draft_passes() {
        let draft = "Hello,\nthe deadline is December 15th. Best regards";
        assert_eq!(draft.chars().count(), 50);
        assert!(validate_draft(draft, "en").is_ok());
        assert!(has_greeting_or_closing(draft, "en"));
    }
}
