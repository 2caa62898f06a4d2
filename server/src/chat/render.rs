//! Message rendering and callback-data wire format for the approval channel.

use entity::sea_orm_active_enums::Tone;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::mail::message::truncate_on_word;

const PREVIEW_CHARS: usize = 100;

/// Parsed callback data. Wire format is `{action}_{email_id}` for sorting
/// decisions, `{action}_response_{email_id}` for draft decisions and
/// `folder_{email_id}_{folder_id}` for the folder picker. Everything fits
/// the 64-byte callback-data cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Approve(i32),
    Reject(i32),
    ChangeFolder(i32),
    SelectFolder { email_id: i32, folder_id: i32 },
    SendResponse(i32),
    EditResponse(i32),
    RejectResponse(i32),
}

pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    // Longest prefixes first: "reject_response_" also starts with "reject_"
    if let Some(rest) = data.strip_prefix("send_response_") {
        return rest.parse().ok().map(CallbackAction::SendResponse);
    }
    if let Some(rest) = data.strip_prefix("edit_response_") {
        return rest.parse().ok().map(CallbackAction::EditResponse);
    }
    if let Some(rest) = data.strip_prefix("reject_response_") {
        return rest.parse().ok().map(CallbackAction::RejectResponse);
    }
    if let Some(rest) = data.strip_prefix("change_folder_") {
        return rest.parse().ok().map(CallbackAction::ChangeFolder);
    }
    if let Some(rest) = data.strip_prefix("folder_") {
        let mut parts = rest.splitn(2, '_');
        let email_id = parts.next()?.parse().ok()?;
        let folder_id = parts.next()?.parse().ok()?;
        return Some(CallbackAction::SelectFolder {
            email_id,
            folder_id,
        });
    }
    if let Some(rest) = data.strip_prefix("approve_") {
        return rest.parse().ok().map(CallbackAction::Approve);
    }
    if let Some(rest) = data.strip_prefix("reject_") {
        return rest.parse().ok().map(CallbackAction::Reject);
    }
    None
}

pub fn proposal_keyboard(email_id: i32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Approve", format!("approve_{email_id}")),
        InlineKeyboardButton::callback("Change folder", format!("change_folder_{email_id}")),
        InlineKeyboardButton::callback("Reject", format!("reject_{email_id}")),
    ]])
}

pub fn folder_keyboard(email_id: i32, folders: &[(i32, String)]) -> InlineKeyboardMarkup {
    let rows = folders
        .iter()
        .map(|(folder_id, name)| {
            vec![InlineKeyboardButton::callback(
                name.clone(),
                format!("folder_{email_id}_{folder_id}"),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn draft_keyboard(email_id: i32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "✅ Send",
            format!("send_response_{email_id}"),
        )],
        vec![
            InlineKeyboardButton::callback("✏️ Edit", format!("edit_response_{email_id}")),
            InlineKeyboardButton::callback("❌ Reject", format!("reject_response_{email_id}")),
        ],
    ])
}

pub struct ProposalView<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub body_preview: &'a str,
    pub folder_name: &'a str,
    pub reasoning: &'a str,
    pub is_priority: bool,
    pub needs_response: bool,
    pub has_draft: bool,
}

pub fn proposal_message(view: &ProposalView) -> String {
    let mut out = String::new();
    if view.is_priority {
        out.push_str("⚠️ PRIORITY EMAIL\n\n");
    }
    out.push_str("📧 New email to sort\n\n");
    out.push_str(&format!("From: {}\n", view.sender));
    out.push_str(&format!("Subject: {}\n\n", view.subject));
    out.push_str(&format!(
        "{}\n\n",
        truncate_on_word(view.body_preview, PREVIEW_CHARS)
    ));
    out.push_str(&format!("📁 Suggested folder: {}\n", view.folder_name));
    out.push_str(&format!("💡 {}\n", view.reasoning));
    if view.needs_response {
        out.push_str("\n✍️ This email looks like it needs a reply");
        if view.has_draft {
            out.push_str(" — a draft is ready for review after sorting");
        }
        out.push('\n');
    }
    out
}

pub fn tone_label(tone: Option<Tone>) -> &'static str {
    match tone {
        Some(Tone::Formal) => "formal",
        Some(Tone::Casual) => "casual",
        _ => "professional",
    }
}

pub struct DraftView<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub language: &'a str,
    pub tone: Option<Tone>,
    pub draft: &'a str,
}

pub fn draft_message(view: &DraftView) -> String {
    format!(
        "✍️ Reply draft\n\nTo: {}\nRe: {}\n({}, {})\n\n────────────\n{}\n────────────",
        view.sender,
        view.subject,
        view.language,
        tone_label(view.tone),
        view.draft,
    )
}

pub fn confirmation_message(
    subject: &str,
    folder_name: Option<&str>,
    rejected: bool,
    response_sent: bool,
) -> String {
    if rejected {
        return format!("🚫 \"{subject}\" left unsorted as requested.");
    }
    let mut out = format!(
        "✅ \"{}\" filed to {}.",
        subject,
        folder_name.unwrap_or("its folder")
    );
    if response_sent {
        out.push_str(" Reply sent.");
    }
    out
}

pub fn error_message(email_id: i32, subject: &str) -> String {
    format!(
        "⚠️ Email Processing Error\n\nCould not finish processing \"{subject}\".\nUse /retry {email_id} to try again manually."
    )
}

pub fn indexing_complete_message(total_emails: i32) -> String {
    format!(
        "✅ Email indexing complete! {total_emails} emails indexed — smart classification with conversation context is now active."
    )
}

pub fn indexing_failed_message(error: &str) -> String {
    format!("❌ Email indexing failed after several attempts: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_roundtrip_sorting() {
        assert_eq!(parse_callback("approve_12"), Some(CallbackAction::Approve(12)));
        assert_eq!(parse_callback("reject_7"), Some(CallbackAction::Reject(7)));
        assert_eq!(
            parse_callback("change_folder_3"),
            Some(CallbackAction::ChangeFolder(3))
        );
        assert_eq!(
            parse_callback("folder_3_15"),
            Some(CallbackAction::SelectFolder {
                email_id: 3,
                folder_id: 15
            })
        );
    }

    #[test]
    fn test_callback_roundtrip_draft() {
        assert_eq!(
            parse_callback("send_response_9"),
            Some(CallbackAction::SendResponse(9))
        );
        assert_eq!(
            parse_callback("edit_response_9"),
            Some(CallbackAction::EditResponse(9))
        );
        assert_eq!(
            parse_callback("reject_response_9"),
            Some(CallbackAction::RejectResponse(9))
        );
    }

    #[test]
    fn test_reject_response_not_shadowed_by_reject() {
        // "reject_response_9" must not parse as Reject("response_9")
        assert_ne!(
            parse_callback("reject_response_9"),
            Some(CallbackAction::Reject(9))
        );
    }

    #[test]
    fn test_callback_data_fits_wire_cap() {
        let data = format!("reject_response_{}", i32::MAX);
        assert!(data.len() <= 64);
        let data = format!("folder_{}_{}", i32::MAX, i32::MAX);
        assert!(data.len() <= 64);
    }

    #[test]
    fn test_garbage_callback_rejected() {
        assert_eq!(parse_callback("unknown_1"), None);
        assert_eq!(parse_callback("approve_x"), None);
        assert_eq!(parse_callback(""), None);
    }

    #[test]
    fn test_priority_header_present_iff_priority() {
        let view = ProposalView {
            sender: "finanzamt@berlin.de",
            subject: "Steuererklärung 2024",
            body_preview: "Bitte reichen Sie Ihre Unterlagen ein.",
            folder_name: "Government",
            reasoning: "Tax office correspondence",
            is_priority: true,
            needs_response: false,
            has_draft: false,
        };
        let text = proposal_message(&view);
        assert!(text.starts_with("⚠️ PRIORITY EMAIL"));

        let calm = ProposalView {
            is_priority: false,
            ..view
        };
        assert!(!proposal_message(&calm).contains("⚠️"));
    }

    #[test]
    fn test_draft_message_shows_language_and_tone() {
        let view = DraftView {
            sender: "colleague@firm.de",
            subject: "Deadline for Project Alpha?",
            language: "en",
            tone: Some(Tone::Professional),
            draft: "Hello,\nthe deadline is December 15th. Best regards",
        };
        let text = draft_message(&view);
        assert!(text.contains("(en, professional)"));
        assert!(text.contains("December 15th"));
    }
}
