//! Prompt assembly for classification and response generation.

use indoc::{formatdoc, indoc};

use crate::mail::message::truncate_on_word;
use crate::rag::context::RagContext;

const THREAD_BODY_CHARS: usize = 500;
const SENDER_HISTORY_BODY_CHARS: usize = 700;
const EMAIL_BODY_CHARS: usize = 500;

/// Renders the retrieved context into labeled sections for the LLM.
pub fn format_rag_context(rag: &RagContext) -> String {
    if rag.thread_history.is_empty() && rag.semantic_results.is_empty() {
        return "No related emails found.".to_string();
    }

    let mut parts: Vec<String> = Vec::new();

    if !rag.thread_history.is_empty() {
        parts.push(format!(
            "**Thread History ({} emails in conversation):**\n(Same thread as current email)\n",
            rag.metadata.thread_length
        ));
        for (i, email) in rag.thread_history.iter().enumerate() {
            parts.push(format!(
                "{}. From: {}\n   Subject: {}\n   Date: {}\n   Body: {}\n",
                i + 1,
                email.sender,
                email.subject,
                email.date,
                truncate_on_word(&email.body, THREAD_BODY_CHARS),
            ));
        }
    }

    if !rag.semantic_results.is_empty() {
        parts.push(format!(
            "\n**Past Correspondence with Sender ({} related emails, most relevant first):**\n",
            rag.metadata.semantic_count
        ));
        for (i, email) in rag.semantic_results.iter().enumerate() {
            parts.push(format!(
                "{}. From: {}\n   Subject: {}\n   Date: {}\n   Body: {}\n",
                i + 1,
                email.sender,
                email.subject,
                email.date,
                truncate_on_word(&email.body, SENDER_HISTORY_BODY_CHARS),
            ));
        }
    }

    parts.join("")
}

pub fn classification_system_prompt() -> String {
    indoc! {"
        You are an email assistant that sorts incoming mail into the user's folders
        and decides whether a reply is needed.
        Respond with a single JSON object with exactly these keys:
        suggested_folder (string, one of the listed folder names),
        reasoning (string, max 300 characters),
        priority_score (integer 0-100),
        confidence (number 0.0-1.0),
        needs_response (boolean),
        response_draft (string or null),
        detected_language (ISO-639-1 code),
        tone (one of: formal, professional, casual).
        Do not provide explanations outside the JSON object.
    "}
    .to_string()
}

pub fn build_classification_prompt(
    folders: &[(String, String)],
    sender: &str,
    subject: &str,
    body: &str,
    rag_text: &str,
) -> String {
    let folder_list = folders
        .iter()
        .map(|(name, description)| {
            if description.is_empty() {
                format!("- {name}")
            } else {
                format!("- {name}: {description}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    formatdoc! {"
        Sort the following email into one of the user's folders.

        Folders:
        {folder_list}

        Email:
        From: {sender}
        Subject: {subject}
        Body: {body}

        Conversation context:
        {rag_text}

        If the email asks a question or expects an answer, set needs_response to true
        and include a short reply draft in response_draft written in the email's language.
        ",
        body = truncate_on_word(body, EMAIL_BODY_CHARS),
    }
}

pub fn response_system_prompt(language: &str, tone: &str) -> String {
    let (greeting, closing) = exemplars(language, tone);
    formatdoc! {"
        You draft email replies on behalf of the mailbox owner.
        Write the reply in language '{language}' with a {tone} tone.
        Open with a greeting like \"{greeting}\" and close like \"{closing}\".
        Answer only what the email asks, using facts from the provided context.
        Output the reply text only, no subject line and no commentary.
    "}
}

pub fn build_response_prompt(
    sender: &str,
    subject: &str,
    body: &str,
    rag_text: &str,
) -> String {
    formatdoc! {"
        Draft a reply to this email.

        From: {sender}
        Subject: {subject}
        Body: {body}

        Context from earlier correspondence:
        {rag_text}
        ",
        body = truncate_on_word(body, EMAIL_BODY_CHARS),
    }
}

/// Greeting/closing exemplars per language and tone; also the validation
/// pattern source for drafts.
pub fn exemplars(language: &str, tone: &str) -> (&'static str, &'static str) {
    match (language, tone) {
        ("de", "formal") => ("Sehr geehrte Damen und Herren", "Mit freundlichen Grüßen"),
        ("de", "casual") => ("Hallo", "Viele Grüße"),
        ("de", _) => ("Guten Tag", "Beste Grüße"),
        ("ru", "formal") => ("Уважаемый коллега", "С уважением"),
        ("ru", "casual") => ("Привет", "Всего доброго"),
        ("ru", _) => ("Здравствуйте", "С уважением"),
        (_, "formal") => ("Dear Sir or Madam", "Yours sincerely"),
        (_, "casual") => ("Hi", "Cheers"),
        _ => ("Hello", "Best regards"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::context::{EmailMessage, RagContext};

    fn sample_email(body_len: usize) -> EmailMessage {
        EmailMessage {
            message_id: "m1".to_string(),
            thread_id: "t1".to_string(),
            sender: "a@b.c".to_string(),
            subject: "s".to_string(),
            body: "x".repeat(body_len),
            date: "2025-03-01T10:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_empty_context_message() {
        let rag = RagContext::default();
        assert_eq!(format_rag_context(&rag), "No related emails found.");
    }

    #[test]
    fn test_thread_bodies_truncated() {
        let mut rag = RagContext::default();
        rag.thread_history.push(sample_email(2000));
        rag.metadata.thread_length = 1;
        let text = format_rag_context(&rag);
        assert!(text.contains("Thread History (1 emails in conversation)"));
        assert!(text.len() < 1200);
    }

    #[test]
    fn test_classification_prompt_lists_folders() {
        let folders = vec![
            ("Government".to_string(), "Keywords: tax, fines".to_string()),
            ("Work".to_string(), String::new()),
        ];
        let prompt =
            build_classification_prompt(&folders, "a@b.c", "Subject", "Body text", "No context");
        assert!(prompt.contains("- Government: Keywords: tax, fines"));
        assert!(prompt.contains("- Work\n"));
        assert!(prompt.contains("From: a@b.c"));
    }

    #[test]
    fn test_exemplars_cover_language_tone_grid() {
        let (greeting, closing) = exemplars("de", "formal");
        assert_eq!(greeting, "Sehr geehrte Damen und Herren");
        assert_eq!(closing, "Mit freundlichen Grüßen");
        let (greeting, _) = exemplars("xx", "professional");
        assert_eq!(greeting, "Hello");
    }
}
