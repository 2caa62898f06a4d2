extern crate google_gmail1 as gmail1;

use chrono::{DateTime, TimeZone, Utc};
use gmail1::api::{Message, MessagePart};
use mail_parser::{Address, MessageParser};
use once_cell::sync::Lazy;
use regex::Regex;

/// A message reduced to the fields the pipeline cares about. Bodies are
/// whitespace-normalized plain text with links collapsed.
#[derive(Debug, Clone)]
pub struct SanitizedEmail {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub internal_date: i64,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub snippet: String,
    pub body: Option<String>,
    pub rfc822_message_id: Option<String>,
}

impl SanitizedEmail {
    pub fn received_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.internal_date)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\t\n]+").unwrap());
static RE_MULTISPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static RE_HTTP_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_\+.~#?&//=]*)").unwrap()
});

pub fn normalize_text(input: &str) -> String {
    let s = RE_WHITESPACE.replace_all(input, " ");
    let s = RE_HTTP_LINK.replace_all(&s, "[LINK]");
    let s = RE_MULTISPACE.replace_all(&s, " ");
    s.trim().to_string()
}

pub fn strip_html(html: &str) -> String {
    // A very wide wrap keeps html2text from hard-breaking sentences
    let text = html2text::from_read(html.as_bytes(), 10_000);
    normalize_text(&text)
}

/// Truncates on a word boundary when one exists near the cut point.
pub fn truncate_on_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => cut[..idx].to_string(),
        _ => cut,
    }
}

/// Parses a `format=RAW` Gmail message into a [`SanitizedEmail`].
pub fn sanitize_raw_message(msg: Message) -> anyhow::Result<SanitizedEmail> {
    let id = msg.id.unwrap_or_default();
    let label_ids = msg.label_ids.unwrap_or_default();
    let thread_id = msg.thread_id.unwrap_or_default();
    let snippet = normalize_text(&msg.snippet.unwrap_or_default());
    let internal_date = msg.internal_date.unwrap_or_default();

    let raw = msg
        .raw
        .ok_or_else(|| anyhow::anyhow!("No raw message found"))?;
    let parsed = MessageParser::default()
        .parse(&raw)
        .ok_or_else(|| anyhow::anyhow!("Could not parse raw message"))?;

    let sender = match parsed.from() {
        Some(Address::List(list)) => list
            .first()
            .and_then(|a| a.address.as_ref())
            .map(|a| a.to_string()),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .next()
            .and_then(|a| a.address.as_ref())
            .map(|a| a.to_string()),
        None => None,
    };
    let subject = parsed.subject().map(normalize_text);
    let body = parsed
        .body_text(0)
        .map(|b| normalize_text(&b))
        .or_else(|| parsed.body_html(0).map(|h| strip_html(&h)));
    let rfc822_message_id = parsed.message_id().map(|m| m.to_string());

    Ok(SanitizedEmail {
        id,
        thread_id,
        label_ids,
        internal_date,
        sender,
        subject,
        snippet,
        body,
        rfc822_message_id,
    })
}

/// Extracts a plain-text body from a `format=full` payload tree: prefers
/// text/plain parts, falls back to stripped text/html.
pub fn extract_payload_body(payload: &MessagePart) -> Option<String> {
    fn collect<'a>(part: &'a MessagePart, mime: &str, out: &mut Vec<&'a Vec<u8>>) {
        if part.mime_type.as_deref() == Some(mime) {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                out.push(data);
            }
        }
        if let Some(parts) = &part.parts {
            for p in parts {
                collect(p, mime, out);
            }
        }
    }

    let mut plain = Vec::new();
    collect(payload, "text/plain", &mut plain);
    if let Some(data) = plain.first() {
        let text = String::from_utf8_lossy(data);
        return Some(normalize_text(&text));
    }

    let mut html = Vec::new();
    collect(payload, "text/html", &mut html);
    if let Some(data) = html.first() {
        let text = String::from_utf8_lossy(data);
        return Some(strip_html(&text));
    }

    None
}

pub fn header_value(payload: &MessagePart, name: &str) -> Option<String> {
    payload.headers.as_ref().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.name.as_deref().map_or(false, |n| n.eq_ignore_ascii_case(name)))
            .and_then(|h| h.value.clone())
    })
}

/// Pulls the bare address out of a `Display Name <addr@host>` header.
pub fn extract_address(header: &str) -> String {
    static RE_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]+)>").unwrap());
    match RE_ADDR.captures(header) {
        Some(caps) => caps[1].trim().to_string(),
        None => header.trim().to_string(),
    }
}

pub fn sender_local_part(sender: &str) -> &str {
    sender.split('@').next().unwrap_or(sender)
}

pub fn sender_domain(sender: &str) -> &str {
    sender.rsplit('@').next().unwrap_or(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        let input = "Hello\r\n\tworld  visit https://example.com/page now";
        let out = normalize_text(input);
        assert_eq!(out, "Hello world visit [LINK] now");
    }

    #[test]
    fn test_truncate_on_word() {
        let text = "the quick brown fox jumps over the lazy dog";
        let out = truncate_on_word(text, 20);
        assert!(out.len() <= 20);
        assert!(!out.ends_with(' '));
        assert_eq!(out, "the quick brown");
    }

    #[test]
    fn test_truncate_short_input_untouched() {
        assert_eq!(truncate_on_word("short", 50), "short");
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("Finanzamt Berlin <finanzamt@berlin.de>"),
            "finanzamt@berlin.de"
        );
        assert_eq!(extract_address("plain@example.com"), "plain@example.com");
    }

    #[test]
    fn test_sender_parts() {
        assert_eq!(sender_local_part("noreply@github.com"), "noreply");
        assert_eq!(sender_domain("noreply@github.com"), "github.com");
    }

    #[test]
    fn test_extract_payload_body_prefers_plain() {
        use google_gmail1::api::{MessagePart, MessagePartBody};
        let payload = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("text/html".to_string()),
                    body: Some(MessagePartBody {
                        data: Some(b"<p>html body</p>".to_vec()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                MessagePart {
                    mime_type: Some("text/plain".to_string()),
                    body: Some(MessagePartBody {
                        data: Some(b"plain body".to_vec()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(extract_payload_body(&payload).unwrap(), "plain body");
    }
}
