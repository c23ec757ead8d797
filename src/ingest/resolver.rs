//! Thread correlation.
//!
//! Decides which existing ticket, if any, an inbound message continues.
//! Explicit threading headers are authoritative: the candidate set built
//! from `In-Reply-To` and `References` is matched against stored email
//! items first, with an exact `In-Reply-To` hit ranking above any other
//! reference and newer items winning remaining ties. Only when no header
//! matches do we fall back to a user-visible `#PREFIX-n` tag in the
//! subject, a rescue path for clients that strip threading headers, and
//! one a user can get wrong, which is why it never outranks the headers.

use std::sync::OnceLock;

use regex::Regex;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::ingest::parser::ParsedMessage;
use crate::ingest::store;

/// Where a message landed after correlation.
///
/// `parent_item_id` is kept separately from the ticket: even when the
/// matched item carries no ticket reference the reply edge is still worth
/// recording.
#[derive(Debug, Default)]
pub struct Correlation {
    pub ticket_id: Option<Uuid>,
    pub parent_item_id: Option<Uuid>,
}

fn ticket_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#([A-Z]+-\d+)").expect("valid ticket tag pattern"))
}

/// Extract a `#PREFIX-n` ticket tag from a subject line.
pub fn extract_ticket_tag(subject: &str) -> Option<String> {
    ticket_tag_pattern()
        .captures(subject)
        .map(|captures| captures[1].to_string())
}

/// Correlate a message with an existing ticket, if one exists.
pub async fn resolve(
    tx: &mut Transaction<'_, Postgres>,
    msg: &ParsedMessage,
) -> Result<Correlation, sqlx::Error> {
    let mut correlation = Correlation::default();

    let candidates = msg.reference_candidates();
    if !candidates.is_empty() {
        let matched: Option<(Option<Uuid>, Uuid)> = sqlx::query_as(
            r#"SELECT ticket_id, id FROM items
               WHERE kind = 'email' AND message_id = ANY($1)
               ORDER BY
                   CASE WHEN message_id = $2 THEN 0 ELSE 1 END,
                   created_at DESC
               LIMIT 1"#,
        )
        .bind(&candidates)
        .bind(msg.in_reply_to.as_deref().unwrap_or(""))
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((ticket_id, parent_item_id)) = matched {
            log::debug!(
                "message {} matched stored item {} via thread headers",
                msg.message_id,
                parent_item_id
            );
            correlation.ticket_id = ticket_id;
            correlation.parent_item_id = Some(parent_item_id);
        }
    }

    if correlation.ticket_id.is_none() {
        if let Some(tag) = extract_ticket_tag(&msg.subject) {
            if let Some(ticket) = store::ticket_by_number(tx, &tag).await? {
                log::debug!(
                    "message {} matched ticket {} via subject tag",
                    msg.message_id,
                    ticket.ticket_number
                );
                correlation.ticket_id = Some(ticket.id);
            }
        }
    }

    Ok(correlation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_ticket_tag() {
        assert_eq!(
            extract_ticket_tag("Re: still broken #SUP-42 please help"),
            Some("SUP-42".to_string())
        );
    }

    #[test]
    fn takes_the_first_tag_when_several_are_present() {
        assert_eq!(
            extract_ticket_tag("#SUP-1 duplicate of #SUP-2"),
            Some("SUP-1".to_string())
        );
    }

    #[test]
    fn ignores_malformed_tags() {
        assert_eq!(extract_ticket_tag("no tag here"), None);
        assert_eq!(extract_ticket_tag("#sup-7 lowercase prefix"), None);
        assert_eq!(extract_ticket_tag("#SUP- missing digits"), None);
        assert_eq!(extract_ticket_tag("SUP-7 without hash"), None);
    }
}
