extern crate google_gmail1 as gmail1;

use std::time::Duration;

use anyhow::anyhow;
use chrono::{TimeZone, Utc};
use gmail1::api::{Label, ListLabelsResponse, ListMessagesResponse, Message, Thread};
use lettre::message::{Mailbox, MultiPart};
use lettre::Message as MimeMessage;
use lib_utils::b64::b64u_encode;
use reqwest::StatusCode;
use sea_orm::DatabaseConnection;
use serde_json::json;

use crate::{
    mail::{
        auth,
        error::MailApiError,
        message::{self, SanitizedEmail},
    },
    model::user::UserCtrl,
    HttpClient,
};

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SECONDS: [u64; 3] = [1, 2, 4];

/// Typed Gmail wrapper. One instance per (user, worker); the cached
/// credential lives in [`auth`] keyed by user id.
pub struct GmailClient {
    http_client: HttpClient,
    conn: DatabaseConnection,
    user_id: i32,
}

/// Listing entry parsed from a `format=metadata` fetch.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub internal_date: i64,
}

/// One message of a thread, chronological component of RAG context.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub message_id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Plain,
    Html,
}

#[derive(Debug, Clone)]
pub struct SendEmailOptions {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub body_type: BodyType,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_id: Option<String>,
}

enum Op {
    Generic,
    Send,
    LabelOp,
}

impl GmailClient {
    pub fn new(http_client: HttpClient, conn: DatabaseConnection, user_id: i32) -> Self {
        GmailClient {
            http_client,
            conn,
            user_id,
        }
    }

    /// Executes a request with the shared retry taxonomy: one token refresh
    /// on 401, exponential backoff on 429/5xx, typed permanent errors
    /// otherwise.
    async fn execute<F>(&self, op: Op, build: F) -> Result<serde_json::Value, MailApiError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut token_refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            let token = auth::access_token(&self.conn, &self.http_client, self.user_id)
                .await
                .map_err(|e| anyhow!("Could not obtain access token: {e:?}"))?;

            let resp = match build(&token).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(BACKOFF_SECONDS[attempt as usize]))
                            .await;
                        attempt += 1;
                        continue;
                    }
                    return Err(MailApiError::Network(e));
                }
            };

            let status = resp.status();
            match status {
                s if s.is_success() => {
                    return resp.json::<serde_json::Value>().await.map_err(|e| {
                        MailApiError::Other(anyhow!("Could not parse Gmail response: {e}"))
                    });
                }
                StatusCode::UNAUTHORIZED => {
                    if token_refreshed {
                        return Err(MailApiError::AuthExpired);
                    }
                    auth::force_refresh(&self.conn, &self.http_client, self.user_id)
                        .await
                        .map_err(|_| MailApiError::AuthExpired)?;
                    token_refreshed = true;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(BACKOFF_SECONDS[attempt as usize]))
                            .await;
                        attempt += 1;
                        continue;
                    }
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    return Err(MailApiError::QuotaExceeded { retry_after });
                }
                s if s.is_server_error() => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(BACKOFF_SECONDS[attempt as usize]))
                            .await;
                        attempt += 1;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MailApiError::ServerError(format!("{s}: {body}")));
                }
                StatusCode::BAD_REQUEST => {
                    let body = resp.text().await.unwrap_or_default();
                    return match op {
                        Op::Send => Err(MailApiError::RecipientInvalid(body)),
                        _ => Err(MailApiError::InvalidRequest(body)),
                    };
                }
                StatusCode::PAYLOAD_TOO_LARGE => {
                    return match op {
                        Op::Send => Err(MailApiError::MessageTooLarge),
                        _ => {
                            let body = resp.text().await.unwrap_or_default();
                            Err(MailApiError::InvalidRequest(body))
                        }
                    };
                }
                StatusCode::NOT_FOUND => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MailApiError::NotFound(body));
                }
                StatusCode::CONFLICT => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MailApiError::Conflict(body));
                }
                other => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MailApiError::InvalidRequest(format!("{other}: {body}")));
                }
            }
        }
    }

    pub async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<String>,
    ) -> Result<ListMessagesResponse, MailApiError> {
        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("maxResults".to_string(), max_results.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token));
        }

        let data = self
            .execute(Op::Generic, |token| {
                self.http_client
                    .get(gmail_url!("messages"))
                    .query(&params)
                    .bearer_auth(token)
            })
            .await?;

        serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid message list: {e}")))
    }

    /// Full body fetch: `format=RAW` parsed with mail-parser.
    pub async fn get_sanitized_message(
        &self,
        message_id: &str,
    ) -> Result<SanitizedEmail, MailApiError> {
        let data = self
            .execute(Op::Generic, |token| {
                self.http_client
                    .get(gmail_url!("messages", message_id))
                    .query(&[("format", "RAW")])
                    .bearer_auth(token)
            })
            .await?;

        let msg: Message = serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid message: {e}")))?;

        message::sanitize_raw_message(msg).map_err(MailApiError::Other)
    }

    /// Cheap header-only fetch used by the poller.
    pub async fn get_message_metadata(
        &self,
        message_id: &str,
    ) -> Result<MessageMeta, MailApiError> {
        let data = self
            .execute(Op::Generic, |token| {
                self.http_client
                    .get(gmail_url!("messages", message_id))
                    .query(&[
                        ("format", "metadata"),
                        ("metadataHeaders", "From"),
                        ("metadataHeaders", "Subject"),
                    ])
                    .bearer_auth(token)
            })
            .await?;

        let msg: Message = serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid message: {e}")))?;

        let payload = msg
            .payload
            .as_ref()
            .ok_or_else(|| anyhow!("Message {message_id} has no payload"))?;

        let sender = message::header_value(payload, "From")
            .map(|h| message::extract_address(&h))
            .unwrap_or_default();
        let subject = message::header_value(payload, "Subject").unwrap_or_default();

        Ok(MessageMeta {
            id: msg.id.unwrap_or_else(|| message_id.to_string()),
            thread_id: msg.thread_id.unwrap_or_default(),
            sender,
            subject,
            internal_date: msg.internal_date.unwrap_or_default(),
        })
    }

    /// Whole thread in chronological order, bodies extracted from the
    /// `format=full` payload tree.
    pub async fn get_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, MailApiError> {
        let data = self
            .execute(Op::Generic, |token| {
                self.http_client
                    .get(gmail_url!("threads", thread_id))
                    .query(&[("format", "full")])
                    .bearer_auth(token)
            })
            .await?;

        let thread: Thread = serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid thread: {e}")))?;

        let mut messages = thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg| {
                let payload = msg.payload.as_ref()?;
                let sender = message::header_value(payload, "From")
                    .map(|h| message::extract_address(&h))
                    .unwrap_or_default();
                let subject = message::header_value(payload, "Subject").unwrap_or_default();
                let body = message::extract_payload_body(payload).unwrap_or_default();
                let internal_date = msg.internal_date.unwrap_or_default();
                Some(ThreadMessage {
                    message_id: msg.id.unwrap_or_default(),
                    thread_id: thread_id.to_string(),
                    sender,
                    subject,
                    body,
                    date: Utc
                        .timestamp_millis_opt(internal_date)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect::<Vec<_>>();

        messages.sort_by_key(|m| m.date);

        Ok(messages)
    }

    /// RFC-822 Message-ID headers of a thread, oldest first. Used to build
    /// In-Reply-To / References for replies.
    pub async fn get_thread_message_ids(
        &self,
        thread_id: &str,
    ) -> Result<Vec<String>, MailApiError> {
        let data = self
            .execute(Op::Generic, |token| {
                self.http_client
                    .get(gmail_url!("threads", thread_id))
                    .query(&[("format", "metadata"), ("metadataHeaders", "Message-ID")])
                    .bearer_auth(token)
            })
            .await?;

        let thread: Thread = serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid thread: {e}")))?;

        let mut messages = thread.messages.unwrap_or_default();
        messages.sort_by_key(|m| m.internal_date.unwrap_or_default());

        Ok(messages
            .iter()
            .filter_map(|m| m.payload.as_ref())
            .filter_map(|p| message::header_value(p, "Message-ID"))
            .collect())
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>, MailApiError> {
        let data = self
            .execute(Op::Generic, |token| {
                self.http_client.get(gmail_url!("labels")).bearer_auth(token)
            })
            .await?;

        let resp: ListLabelsResponse = serde_json::from_value(data)
            .map_err(|e| MailApiError::Other(anyhow!("Invalid label list: {e}")))?;

        Ok(resp.labels.unwrap_or_default())
    }

    /// Creates a label and returns its id. Idempotent: a name conflict
    /// resolves to the pre-existing label's id.
    pub async fn create_label(
        &self,
        name: &str,
        color: Option<serde_json::Value>,
        visibility: &str,
    ) -> Result<String, MailApiError> {
        let mut body = json!({
            "name": name,
            "labelListVisibility": visibility,
            "messageListVisibility": "show",
            "type": "user",
        });
        if let Some(color) = color {
            body["color"] = color;
        }

        let result = self
            .execute(Op::LabelOp, |token| {
                self.http_client
                    .post(gmail_url!("labels"))
                    .json(&body)
                    .bearer_auth(token)
            })
            .await;

        match result {
            Ok(data) => data
                .get("id")
                .and_then(|id| id.as_str())
                .map(|id| id.to_string())
                .ok_or_else(|| MailApiError::Other(anyhow!("Label response without id"))),
            Err(MailApiError::Conflict(_)) => {
                let labels = self.list_labels().await?;
                labels
                    .iter()
                    .find(|l| l.name.as_deref() == Some(name))
                    .and_then(|l| l.id.clone())
                    .ok_or_else(|| {
                        MailApiError::Other(anyhow!("Label {name} conflicted but was not found"))
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn apply_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<bool, MailApiError> {
        self.modify_labels(message_id, vec![label_id.to_string()], vec![])
            .await
    }

    pub async fn remove_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<bool, MailApiError> {
        self.modify_labels(message_id, vec![], vec![label_id.to_string()])
            .await
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<bool, MailApiError> {
        let body = json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });

        let data = self
            .execute(Op::LabelOp, |token| {
                self.http_client
                    .post(gmail_url!("messages", message_id, "modify"))
                    .json(&body)
                    .bearer_auth(token)
            })
            .await?;

        if data.get("error").is_some() {
            return Err(MailApiError::Other(anyhow!(
                "Error modifying labels: {data:?}"
            )));
        }

        Ok(true)
    }

    /// Composes an RFC-2822 multipart/alternative message, base64-url
    /// encodes it and posts it to the send endpoint. Threading headers are
    /// resolved from the thread when not given explicitly.
    pub async fn send_email(&self, opts: SendEmailOptions) -> Result<String, MailApiError> {
        let user = UserCtrl::get_by_id(&self.conn, self.user_id)
            .await
            .map_err(|e| anyhow!("Could not load sending user: {e:?}"))?;

        let (in_reply_to, references) = match (&opts.in_reply_to, &opts.thread_id) {
            (Some(explicit), _) => (Some(explicit.clone()), opts.references.clone()),
            (None, Some(thread_id)) => {
                let ids = self.get_thread_message_ids(thread_id).await?;
                let last = ids.last().cloned();
                let joined = if ids.is_empty() {
                    None
                } else {
                    Some(ids.join(" "))
                };
                (last, joined)
            }
            (None, None) => (None, None),
        };

        let raw = compose_mime_message(&user.email, &opts, in_reply_to, references)?;

        let mut body = json!({ "raw": b64u_encode(&raw) });
        if let Some(thread_id) = &opts.thread_id {
            body["threadId"] = json!(thread_id);
        }

        let data = self
            .execute(Op::Send, |token| {
                self.http_client
                    .post(gmail_url!("messages", "send"))
                    .json(&body)
                    .bearer_auth(token)
            })
            .await?;

        data.get("id")
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| MailApiError::Other(anyhow!("Send response without message id")))
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn compose_mime_message(
    from: &str,
    opts: &SendEmailOptions,
    in_reply_to: Option<String>,
    references: Option<String>,
) -> Result<Vec<u8>, MailApiError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| MailApiError::Other(anyhow!("Invalid from address: {e}")))?;
    let to: Mailbox = opts
        .to
        .parse()
        .map_err(|_| MailApiError::RecipientInvalid(opts.to.clone()))?;

    let mut builder = MimeMessage::builder()
        .from(from)
        .to(to)
        .subject(&opts.subject)
        .date_now();

    if let Some(irt) = in_reply_to {
        builder = builder.in_reply_to(irt);
    }
    if let Some(refs) = references {
        builder = builder.references(refs);
    }

    let message = match opts.body_type {
        BodyType::Plain => {
            let html = format!(
                "<html><body><pre>{}</pre></body></html>",
                html_escape(&opts.body)
            );
            builder.multipart(MultiPart::alternative_plain_html(opts.body.clone(), html))
        }
        BodyType::Html => {
            let plain = message::strip_html(&opts.body);
            builder.multipart(MultiPart::alternative_plain_html(plain, opts.body.clone()))
        }
    }
    .map_err(|e| MailApiError::Other(anyhow!("Could not compose message: {e}")))?;

    Ok(message.formatted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages");
        assert_eq!(url, "https://www.googleapis.com/gmail/v1/users/me/messages");
        let url = gmail_url!("messages", "123");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/123"
        );
    }

    #[test]
    fn test_compose_mime_message_sets_threading_headers() {
        let opts = SendEmailOptions {
            to: "colleague@firm.de".to_string(),
            subject: "Re: Deadline for Project Alpha?".to_string(),
            body: "Hello,\nthe deadline is December 15th. Best regards".to_string(),
            body_type: BodyType::Plain,
            in_reply_to: None,
            references: None,
            thread_id: Some("t1".to_string()),
        };
        let raw = compose_mime_message(
            "me@example.com",
            &opts,
            Some("<msg-2@firm.de>".to_string()),
            Some("<msg-1@firm.de> <msg-2@firm.de>".to_string()),
        )
        .unwrap();

        let parsed = mail_parser::MessageParser::default().parse(&raw).unwrap();
        assert_eq!(
            parsed.subject().unwrap(),
            "Re: Deadline for Project Alpha?"
        );
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("In-Reply-To:"));
        assert!(text.contains("References:"));
        assert!(text.contains("multipart/alternative"));
    }

    #[test]
    fn test_compose_mime_message_rejects_bad_recipient() {
        let opts = SendEmailOptions {
            to: "not an address".to_string(),
            subject: "x".to_string(),
            body: "y".to_string(),
            body_type: BodyType::Plain,
            in_reply_to: None,
            references: None,
            thread_id: None,
        };
        let err = compose_mime_message("me@example.com", &opts, None, None).unwrap_err();
        assert!(matches!(err, MailApiError::RecipientInvalid(_)));
    }
}
