use sea_orm::DatabaseConnection;
use serde::Deserialize;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    llm::{client::LlmClient, prompts},
    model::{
        email_queue::{ClassificationUpdate, EmailQueueCtrl},
        folder::FolderCategoryCtrl,
    },
    rag::context::RagContext,
    rate_limiters::RateLimiters,
    HttpClient,
};

/// Sender patterns that never need a response; matching mail skips the LLM
/// entirely.
const AUTOMATED_SENDER_PATTERNS: &[&str] = &[
    "noreply@",
    "no-reply@",
    "donotreply@",
    "notifications@",
    "alerts@",
    "updates@",
    "@send.",
    "@email.",
    "@marketing.",
    "@newsletter.",
    "@promo.",
    "newsletter@",
    "subscribe@",
    "digest@",
];

#[derive(Debug, Deserialize)]
struct RawClassification {
    suggested_folder: String,
    reasoning: Option<String>,
    priority_score: Option<f64>,
    confidence: Option<f64>,
    #[serde(default)]
    needs_response: bool,
    response_draft: Option<String>,
    detected_language: Option<String>,
    tone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub classification: EmailClassification,
    pub folder_id: i32,
    pub folder_name: String,
    pub reasoning: String,
    pub priority_score: i32,
    pub confidence: f32,
    pub needs_response: bool,
    pub response_draft: Option<String>,
    pub detected_language: String,
    pub tone: Tone,
    pub llm_called: bool,
}

pub struct ClassificationService {
    conn: DatabaseConnection,
    llm: LlmClient,
}

impl ClassificationService {
    pub fn new(
        conn: DatabaseConnection,
        http_client: HttpClient,
        rate_limiters: RateLimiters,
    ) -> Self {
        ClassificationService {
            conn,
            llm: LlmClient::new(http_client, rate_limiters),
        }
    }

    pub fn is_automated_sender(sender: &str) -> bool {
        let sender_lower = sender.to_lowercase();
        AUTOMATED_SENDER_PATTERNS
            .iter()
            .any(|pattern| sender_lower.contains(pattern))
    }

    /// Classifies one queue row: pre-filter, prompt assembly, LLM call,
    /// validation, then persistence of the result into the queue row.
    pub async fn classify(
        &self,
        email: &email_processing_queue::Model,
        body: &str,
        rag: &RagContext,
    ) -> AppResult<ClassificationOutcome> {
        let folders = FolderCategoryCtrl::all_for_user(&self.conn, email.user_id).await?;
        if folders.is_empty() {
            return Err(AppError::NotFound(format!(
                "User {} has no folder categories",
                email.user_id
            )));
        }

        let outcome = if Self::is_automated_sender(&email.sender) {
            tracing::info!(
                "Automated sender {} matched pre-filter, skipping LLM",
                email.sender
            );
            let folder = folders
                .iter()
                .find(|f| f.name == "Important")
                .unwrap_or(&folders[0]);
            ClassificationOutcome {
                classification: EmailClassification::SortOnly,
                folder_id: folder.id,
                folder_name: folder.name.clone(),
                reasoning: "Automated email (newsletter/notification) - no response needed"
                    .to_string(),
                priority_score: 10,
                confidence: 1.0,
                needs_response: false,
                response_draft: None,
                detected_language: "en".to_string(),
                tone: Tone::Professional,
                llm_called: false,
            }
        } else {
            self.classify_with_llm(email, body, rag, &folders).await?
        };

        EmailQueueCtrl::store_classification(
            &self.conn,
            email.id,
            &ClassificationUpdate {
                classification: outcome.classification,
                proposed_folder_id: outcome.folder_id,
                reasoning: outcome.reasoning.clone(),
                priority_score: outcome.priority_score,
                detected_language: outcome.detected_language.clone(),
                tone: outcome.tone,
                draft_response: outcome.response_draft.clone(),
            },
        )
        .await?;

        Ok(outcome)
    }

    async fn classify_with_llm(
        &self,
        email: &email_processing_queue::Model,
        body: &str,
        rag: &RagContext,
        folders: &[folder_category::Model],
    ) -> AppResult<ClassificationOutcome> {
        let folder_prompts = folders
            .iter()
            .map(|f| {
                let keywords = FolderCategoryCtrl::keywords(f);
                let description = if keywords.is_empty() {
                    String::new()
                } else {
                    format!("Keywords: {}", keywords.join(", "))
                };
                (f.name.clone(), description)
            })
            .collect::<Vec<_>>();

        let rag_text = prompts::format_rag_context(rag);
        let system = prompts::classification_system_prompt();
        let user = prompts::build_classification_prompt(
            &folder_prompts,
            &email.sender,
            &email.subject,
            body,
            &rag_text,
        );

        // Parse failures propagate: a malformed completion is an error, not
        // a silent fallback
        let (value, token_usage) = self.llm.send_json_prompt(&system, &user).await?;
        let raw: RawClassification = serde_json::from_value(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid classification JSON: {e}")))?;

        tracing::debug!(
            "Classified email {} into {:?} using {} tokens",
            email.id,
            raw.suggested_folder,
            token_usage
        );

        let (folder_id, folder_name) =
            match folders.iter().find(|f| f.name == raw.suggested_folder) {
                Some(folder) => (folder.id, folder.name.clone()),
                None => {
                    tracing::warn!(
                        "LLM suggested unknown folder {:?} for email {}, falling back",
                        raw.suggested_folder,
                        email.id
                    );
                    let fallback = folders
                        .iter()
                        .find(|f| f.name == "Important")
                        .unwrap_or(&folders[0]);
                    (fallback.id, fallback.name.clone())
                }
            };

        let reasoning: String = raw.reasoning.unwrap_or_default().chars().take(300).collect();

        let needs_response = raw.needs_response;
        let response_draft = raw
            .response_draft
            .filter(|d| needs_response && !d.trim().is_empty());

        Ok(ClassificationOutcome {
            classification: if needs_response {
                EmailClassification::NeedsResponse
            } else {
                EmailClassification::SortOnly
            },
            folder_id,
            folder_name,
            reasoning,
            priority_score: (raw.priority_score.unwrap_or(50.0) as i32).clamp(0, 100),
            confidence: (raw.confidence.unwrap_or(0.0) as f32).clamp(0.0, 1.0),
            needs_response,
            response_draft,
            detected_language: normalize_language(raw.detected_language.as_deref()),
            tone: parse_tone(raw.tone.as_deref()),
            llm_called: true,
        })
    }
}

pub fn parse_tone(tone: Option<&str>) -> Tone {
    match tone.map(|t| t.to_lowercase()).as_deref() {
        Some("formal") => Tone::Formal,
        Some("casual") => Tone::Casual,
        _ => Tone::Professional,
    }
}

pub fn normalize_language(language: Option<&str>) -> String {
    match language {
        Some(lang) if lang.len() == 2 && lang.chars().all(|c| c.is_ascii_alphabetic()) => {
            lang.to_lowercase()
        }
        _ => "en".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automated_sender_patterns() {
        assert!(ClassificationService::is_automated_sender("noreply@medium.com"));
        assert!(ClassificationService::is_automated_sender("No-Reply@github.com"));
        assert!(ClassificationService::is_automated_sender("news@newsletter.shop.io"));
        assert!(ClassificationService::is_automated_sender("digest@substack.com"));
        assert!(ClassificationService::is_automated_sender("team@send.grid.net"));
    }

    #[test]
    fn test_human_senders_pass_pre_filter() {
        assert!(!ClassificationService::is_automated_sender("colleague@firm.de"));
        assert!(!ClassificationService::is_automated_sender("finanzamt@berlin.de"));
        assert!(!ClassificationService::is_automated_sender("info@company.com"));
    }

    #[test]
    fn test_parse_tone_fallback() {
        assert_eq!(parse_tone(Some("formal")), Tone::Formal);
        assert_eq!(parse_tone(Some("CASUAL")), Tone::Casual);
        assert_eq!(parse_tone(Some("brisk")), Tone::Professional);
        assert_eq!(parse_tone(None), Tone::Professional);
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language(Some("DE")), "de");
        assert_eq!(normalize_language(Some("german")), "en");
        assert_eq!(normalize_language(None), "en");
    }

    #[test]
    fn test_raw_classification_parses_spec_shape() {
        let raw: RawClassification = serde_json::from_value(serde_json::json!({
            "suggested_folder": "Government",
            "reasoning": "Tax office correspondence",
            "priority_score": 85,
            "confidence": 0.93,
            "needs_response": false,
            "response_draft": null,
            "detected_language": "de",
            "tone": "formal"
        }))
        .unwrap();
        assert_eq!(raw.suggested_folder, "Government");
        assert!(!raw.needs_response);
    }
}
