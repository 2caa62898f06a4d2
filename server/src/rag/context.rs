use futures::future::join_all;
use once_cell::sync::Lazy;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tiktoken_rs::CoreBPE;

use crate::{
    db_core::prelude::email_processing_queue,
    mail::{client::GmailClient, error::MailApiError, message},
    rag::{embed::EmbeddingClient, vector::VectorStoreClient},
    rate_limiters::RateLimiters,
    server_config::cfg,
    HttpClient,
};

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RagMetadata {
    pub thread_length: usize,
    pub semantic_count: usize,
    pub adaptive_k: usize,
    pub thread_tokens: usize,
    pub semantic_tokens: usize,
    pub total_tokens_used: usize,
    pub oldest_thread_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RagContext {
    pub thread_history: Vec<EmailMessage>,
    pub semantic_results: Vec<EmailMessage>,
    pub metadata: RagMetadata,
}

// GPT-4-compatible tokenizer; construction failure downgrades counting to
// the chars/4 estimate rather than failing retrieval.
static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("Could not construct tokenizer, falling back to estimate: {e}");
        None
    }
});

pub fn count_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len() / 4,
    }
}

/// Truncates text to at most `max_tokens` tokens (chars/4 estimate when the
/// tokenizer is unavailable).
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    match TOKENIZER.as_ref() {
        Some(bpe) => {
            let tokens = bpe.encode_with_special_tokens(text);
            if tokens.len() <= max_tokens {
                return text.to_string();
            }
            bpe.decode(tokens[..max_tokens].to_vec())
                .unwrap_or_else(|_| text.chars().take(max_tokens * 4).collect())
        }
        None => text.chars().take(max_tokens * 4).collect(),
    }
}

/// k-selection from existing thread length: short threads lean on semantic
/// neighbors, long threads carry their own context.
pub fn adaptive_k(thread_length: usize) -> usize {
    if thread_length < 3 {
        cfg.short_thread_k
    } else if thread_length <= 5 {
        cfg.standard_k
    } else {
        cfg.long_thread_k
    }
}

fn email_tokens(email: &EmailMessage) -> usize {
    count_tokens(&email.sender) + count_tokens(&email.subject) + count_tokens(&email.body)
}

/// Drops context until the total fits the budget: oldest thread mail first,
/// then lowest-ranked semantic results. Returns (thread_tokens,
/// semantic_tokens).
pub fn enforce_token_budget(
    thread_history: &mut Vec<EmailMessage>,
    semantic_results: &mut Vec<EmailMessage>,
    max_tokens: usize,
) -> (usize, usize) {
    let mut thread_tokens: Vec<usize> = thread_history.iter().map(email_tokens).collect();
    let mut semantic_tokens: Vec<usize> = semantic_results.iter().map(email_tokens).collect();

    let total = |t: &Vec<usize>, s: &Vec<usize>| -> usize {
        t.iter().sum::<usize>() + s.iter().sum::<usize>()
    };

    while total(&thread_tokens, &semantic_tokens) > max_tokens {
        if !thread_history.is_empty() {
            // Chronological order puts the oldest first
            thread_history.remove(0);
            thread_tokens.remove(0);
        } else if !semantic_results.is_empty() {
            semantic_results.pop();
            semantic_tokens.pop();
        } else {
            break;
        }
    }

    (
        thread_tokens.iter().sum(),
        semantic_tokens.iter().sum(),
    )
}

/// Ranks semantic hits: primary by similarity (descending score = ascending
/// distance), ties broken by more recent date.
pub fn rank_semantic_results(results: &mut Vec<(EmailMessage, f32)>) {
    results.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.date.cmp(&a.date))
    });
}

pub fn compose_query(sender: &str, subject: &str, body: &str) -> String {
    format!(
        "From {} about {}: {}",
        message::sender_local_part(sender),
        subject,
        message::truncate_on_word(body, 500)
    )
}

/// Assembles bounded prior-correspondence context for one queue row.
pub struct ContextRetrievalService {
    conn: DatabaseConnection,
    http_client: HttpClient,
    rate_limiters: RateLimiters,
}

impl ContextRetrievalService {
    pub fn new(
        conn: DatabaseConnection,
        http_client: HttpClient,
        rate_limiters: RateLimiters,
    ) -> Self {
        ContextRetrievalService {
            conn,
            http_client,
            rate_limiters,
        }
    }

    /// Thread fetch failure is fatal; semantic search failure degrades to
    /// thread-only context.
    pub async fn retrieve(
        &self,
        email: &email_processing_queue::Model,
        body: &str,
    ) -> Result<RagContext, MailApiError> {
        let client = GmailClient::new(
            self.http_client.clone(),
            self.conn.clone(),
            email.user_id,
        );

        let thread = client.get_thread(&email.gmail_thread_id).await?;
        let original_length = thread.len();

        let mut thread_history: Vec<EmailMessage> = thread
            .into_iter()
            .rev()
            .take(cfg.thread_history_limit)
            .map(|m| EmailMessage {
                message_id: m.message_id,
                sender: m.sender,
                subject: m.subject,
                body: m.body,
                date: m.date.to_rfc3339(),
                thread_id: m.thread_id,
            })
            .collect();
        thread_history.reverse();

        let k = adaptive_k(original_length);

        let mut semantic_results = if k > 0 {
            match self.semantic_search(&client, email, body, k).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(
                        "Semantic search failed for email {}, using thread-only context: {e:?}",
                        email.id
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let (thread_tokens, semantic_tokens) = enforce_token_budget(
            &mut thread_history,
            &mut semantic_results,
            cfg.max_context_tokens,
        );

        let metadata = RagMetadata {
            thread_length: original_length,
            semantic_count: semantic_results.len(),
            adaptive_k: k,
            thread_tokens,
            semantic_tokens,
            total_tokens_used: thread_tokens + semantic_tokens,
            oldest_thread_date: thread_history.first().map(|m| m.date.clone()),
        };

        Ok(RagContext {
            thread_history,
            semantic_results,
            metadata,
        })
    }

    async fn semantic_search(
        &self,
        client: &GmailClient,
        email: &email_processing_queue::Model,
        body: &str,
        k: usize,
    ) -> anyhow::Result<Vec<EmailMessage>> {
        let embedder = EmbeddingClient::new(self.http_client.clone(), self.rate_limiters.clone());
        let query = compose_query(&email.sender, &email.subject, body);
        let vector = embedder.embed_one(&query).await?;

        let store = VectorStoreClient::new(self.http_client.clone())?;
        let hits = store
            .search(
                vector,
                &[
                    ("user_id", serde_json::json!(email.user_id.to_string())),
                    ("sender", serde_json::json!(email.sender)),
                ],
                k,
            )
            .await?;

        let mut scored: Vec<(EmailMessage, f32)> = hits
            .into_iter()
            .map(|hit| {
                (
                    EmailMessage {
                        message_id: hit.payload.doc_id,
                        sender: hit.payload.sender,
                        subject: hit.payload.subject,
                        body: hit.payload.snippet,
                        date: hit.payload.date,
                        thread_id: hit.payload.thread_id,
                    },
                    hit.score,
                )
            })
            .collect();
        rank_semantic_results(&mut scored);

        // The store only holds snippets; pull full bodies for real Gmail
        // ids, skipping the messages that no longer resolve. Synthetic
        // sent_* records keep their stored text.
        let fetches = scored.iter().map(|(m, _)| {
            let id = m.message_id.clone();
            async move {
                if id.starts_with("sent_") {
                    None
                } else {
                    Some(client.get_sanitized_message(&id).await)
                }
            }
        });
        let bodies = join_all(fetches).await;

        let mut results = Vec::with_capacity(scored.len());
        for ((mut email_msg, _score), fetched) in scored.into_iter().zip(bodies) {
            match fetched {
                None => results.push(email_msg),
                Some(Ok(full)) => {
                    if let Some(full_body) = full.body {
                        email_msg.body = full_body;
                    }
                    results.push(email_msg);
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        "Skipping semantic result {}: body fetch failed: {e:?}",
                        email_msg.message_id
                    );
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(body: &str, date: &str) -> EmailMessage {
        EmailMessage {
            message_id: "m".to_string(),
            sender: "a@b.c".to_string(),
            subject: "subject".to_string(),
            body: body.to_string(),
            date: date.to_string(),
            thread_id: "t".to_string(),
        }
    }

    #[test]
    fn test_adaptive_k_bands() {
        assert_eq!(adaptive_k(0), 7);
        assert_eq!(adaptive_k(2), 7);
        assert_eq!(adaptive_k(3), 3);
        assert_eq!(adaptive_k(5), 3);
        assert_eq!(adaptive_k(6), 0);
    }

    #[test]
    fn test_count_tokens_nonzero() {
        assert!(count_tokens("hello world, this is a sentence") > 0);
    }

    #[test]
    fn test_truncate_to_tokens_bounds() {
        let long = "word ".repeat(5000);
        let truncated = truncate_to_tokens(&long, 100);
        assert!(count_tokens(&truncated) <= 100);
        let short = "short text";
        assert_eq!(truncate_to_tokens(short, 100), short);
    }

    #[test]
    fn test_budget_drops_oldest_thread_first() {
        let big = "word ".repeat(8000); // well over budget on its own
        let mut thread = vec![email(&big, "2025-01-01"), email("recent small", "2025-02-01")];
        let mut semantic = vec![email("semantic small", "2025-01-15")];
        let (thread_tokens, semantic_tokens) =
            enforce_token_budget(&mut thread, &mut semantic, cfg.max_context_tokens);

        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].body, "recent small");
        assert_eq!(semantic.len(), 1);
        assert!(thread_tokens + semantic_tokens <= cfg.max_context_tokens);
    }

    #[test]
    fn test_budget_then_drops_lowest_ranked_semantic() {
        let big = "word ".repeat(4000);
        let mut thread: Vec<EmailMessage> = vec![];
        let mut semantic = vec![
            email("top hit", "2025-02-01"),
            email(&big, "2025-01-01"),
            email(&big, "2025-01-02"),
        ];
        enforce_token_budget(&mut thread, &mut semantic, 3000);
        // Lowest-ranked (last) dropped first; the top hit survives
        assert!(!semantic.is_empty());
        assert_eq!(semantic[0].body, "top hit");
        let total: usize = semantic.iter().map(email_tokens).sum();
        assert!(total <= 3000);
    }

    #[test]
    fn test_rank_by_score_then_date() {
        let mut results = vec![
            (email("b", "2025-01-01"), 0.5),
            (email("a", "2025-02-01"), 0.9),
            (email("c", "2025-03-01"), 0.5),
        ];
        rank_semantic_results(&mut results);
        assert_eq!(results[0].0.body, "a");
        // Equal scores: newer first
        assert_eq!(results[1].0.body, "c");
        assert_eq!(results[2].0.body, "b");
    }

    #[test]
    fn test_compose_query_shape() {
        let query = compose_query("colleague@firm.de", "Deadline?", "When is it due?");
        assert_eq!(query, "From colleague about Deadline?: When is it due?");
    }
}
