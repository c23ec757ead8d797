//! Inbound email parsing and normalization.
//!
//! Turns a raw RFC 5322 message into the flat record the rest of the
//! pipeline works with. Uses `mailparse` for MIME, strips angle brackets
//! from every message id, and removes NUL bytes PostgreSQL cannot store.
//!
//! # Body extraction
//!
//! The rule is deliberate and narrow: multipart messages yield the first
//! `text/plain` part found depth-first, or an empty body when no such part
//! exists; single-part messages yield their decoded payload whatever the
//! content type. HTML-only mail therefore produces an empty body, a
//! documented limitation of the ingestion path, not something to silently
//! work around here.
//!
//! # Failure mode
//!
//! Parsing fails on malformed MIME, undecodable payloads, a missing or
//! empty `Message-ID` (nothing to anchor idempotency on), or a missing
//! sender address (nobody to confirm to). Callers skip the message and
//! move on; a parse failure never aborts the batch.

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail, parse_mail};
use thiserror::Error;

/// Normalized view of one inbound message.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub from_name: String,
    pub from_address: String,
    pub to_address: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

impl ParsedMessage {
    /// Candidate message ids for thread correlation: `in_reply_to` plus the
    /// reference chain, empties dropped, order preserved.
    pub fn reference_candidates(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(parent) = &self.in_reply_to {
            candidates.push(parent.clone());
        }
        for reference in &self.references {
            if !candidates.contains(reference) {
                candidates.push(reference.clone());
            }
        }
        candidates
    }
}

#[derive(Debug, Error)]
pub enum ParseMailError {
    #[error("failed to parse MIME structure: {0}")]
    Mime(#[from] mailparse::MailParseError),
    #[error("missing Message-ID header")]
    MissingMessageId,
    #[error("missing sender address for message {message_id}")]
    MissingSender { message_id: String },
}

/// Remove NUL bytes (PostgreSQL rejects them in text columns) and trim.
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Strip angle brackets and whitespace from a message id; empty ids
/// collapse to `None`.
fn normalize_message_id(msg_id: Option<String>) -> Option<String> {
    msg_id.and_then(|id| {
        let cleaned = id.trim().trim_matches(&['<', '>'][..]).trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(sanitize_text(cleaned))
        }
    })
}

/// Split a References header into bare message ids, order preserved.
fn extract_references(header_value: &str) -> Vec<String> {
    header_value
        .split_whitespace()
        .map(|id| sanitize_text(id.trim().trim_matches(&['<', '>'][..])))
        .filter(|id| !id.is_empty())
        .collect()
}

/// Parse the first single address out of a header value.
fn parse_single_address(header_value: &str) -> Option<(String, String)> {
    let addrs = mailparse::addrparse(header_value).ok()?;
    match addrs.iter().next() {
        Some(mailparse::MailAddr::Single(info)) => {
            let name = info.display_name.clone().unwrap_or_default();
            Some((sanitize_text(&name), info.addr.to_lowercase()))
        }
        _ => None,
    }
}

/// Depth-first scan for the first `text/plain` part of a multipart message.
fn first_text_plain(part: &ParsedMail<'_>) -> Result<Option<String>, mailparse::MailParseError> {
    for sub in &part.subparts {
        if sub.ctype.mimetype == "text/plain" {
            return Ok(Some(sub.get_body()?));
        }
        if !sub.subparts.is_empty() {
            if let Some(body) = first_text_plain(sub)? {
                return Ok(Some(body));
            }
        }
    }
    Ok(None)
}

/// Parse a raw message into a [`ParsedMessage`].
///
/// The `Date` header is parsed leniently: a missing or unparseable date
/// falls back to the current time rather than rejecting a customer mail
/// over a broken client clock header.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage, ParseMailError> {
    let parsed = parse_mail(raw)?;

    let message_id = normalize_message_id(parsed.headers.get_first_value("Message-ID"))
        .ok_or(ParseMailError::MissingMessageId)?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();

    let (from_name, from_address) = parsed
        .headers
        .get_first_value("From")
        .as_deref()
        .and_then(parse_single_address)
        .unwrap_or_default();

    if from_address.is_empty() {
        log::warn!("message {} has no sender address, skipping", message_id);
        return Err(ParseMailError::MissingSender { message_id });
    }

    let to_address = parsed
        .headers
        .get_first_value("To")
        .as_deref()
        .and_then(parse_single_address)
        .map(|(_, addr)| addr);

    let body = if parsed.subparts.is_empty() {
        parsed.get_body()?
    } else {
        first_text_plain(&parsed)?.unwrap_or_default()
    };
    let body = sanitize_text(&body);

    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|raw_date| dateparser::parse(&raw_date).ok())
        .map(|date| date.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let in_reply_to = normalize_message_id(parsed.headers.get_first_value("In-Reply-To"));

    let references = parsed
        .headers
        .get_first_value("References")
        .map(|value| extract_references(&value))
        .unwrap_or_default();

    log::trace!("parsed message {} from {}", message_id, from_address);

    Ok(ParsedMessage {
        message_id,
        from_name,
        from_address,
        to_address,
        subject,
        body,
        received_at,
        in_reply_to,
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_nul_and_trims() {
        assert_eq!(sanitize_text("hello\0world"), "helloworld");
        assert_eq!(sanitize_text("  padded  "), "padded");
    }

    #[test]
    fn message_ids_lose_their_brackets() {
        assert_eq!(
            normalize_message_id(Some("<a@example.com>".to_string())),
            Some("a@example.com".to_string())
        );
        assert_eq!(normalize_message_id(Some("  ".to_string())), None);
        assert_eq!(normalize_message_id(None), None);
    }

    #[test]
    fn references_split_on_whitespace() {
        let refs = extract_references("<a@example.com>\r\n <b@example.com>");
        assert_eq!(refs, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn parses_a_plain_message() {
        let raw = concat!(
            "Message-ID: <a@x>\r\n",
            "From: Ada Lovelace <ada@example.org>\r\n",
            "To: support@example.com\r\n",
            "Subject: Printer broken\r\n",
            "Date: Mon, 6 Jan 2025 10:00:00 +0000\r\n",
            "\r\n",
            "It will not print.\r\n"
        );

        let msg = parse_message(raw.as_bytes()).expect("parses");
        assert_eq!(msg.message_id, "a@x");
        assert_eq!(msg.from_name, "Ada Lovelace");
        assert_eq!(msg.from_address, "ada@example.org");
        assert_eq!(msg.to_address.as_deref(), Some("support@example.com"));
        assert_eq!(msg.subject, "Printer broken");
        assert_eq!(msg.body, "It will not print.");
        assert!(msg.in_reply_to.is_none());
        assert!(msg.references.is_empty());
    }

    #[test]
    fn multipart_takes_first_text_plain_part() {
        let raw = concat!(
            "Message-ID: <multi@x>\r\n",
            "From: ada@example.org\r\n",
            "Subject: mixed\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>rich</p>\r\n",
            "--sep\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain wins\r\n",
            "--sep--\r\n"
        );

        let msg = parse_message(raw.as_bytes()).expect("parses");
        assert_eq!(msg.body, "plain wins");
    }

    #[test]
    fn html_only_multipart_yields_empty_body() {
        let raw = concat!(
            "Message-ID: <html@x>\r\n",
            "From: ada@example.org\r\n",
            "Subject: html only\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>only html</p>\r\n",
            "--sep--\r\n"
        );

        let msg = parse_message(raw.as_bytes()).expect("parses");
        assert_eq!(msg.body, "");
    }

    #[test]
    fn missing_message_id_is_rejected() {
        let raw = concat!(
            "From: ada@example.org\r\n",
            "Subject: no id\r\n",
            "\r\n",
            "body\r\n"
        );

        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(ParseMailError::MissingMessageId)
        ));
    }

    #[test]
    fn missing_sender_is_rejected() {
        let raw = concat!(
            "Message-ID: <nosender@x>\r\n",
            "Subject: anonymous\r\n",
            "\r\n",
            "body\r\n"
        );

        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(ParseMailError::MissingSender { .. })
        ));
    }

    #[test]
    fn reference_candidates_rank_in_reply_to_first() {
        let raw = concat!(
            "Message-ID: <c@x>\r\n",
            "From: ada@example.org\r\n",
            "Subject: Re: Printer broken\r\n",
            "In-Reply-To: <b@x>\r\n",
            "References: <a@x> <b@x>\r\n",
            "\r\n",
            "still broken\r\n"
        );

        let msg = parse_message(raw.as_bytes()).expect("parses");
        assert_eq!(msg.reference_candidates(), vec!["b@x", "a@x"]);
    }
}
