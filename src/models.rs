use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What an item row represents: a real email on the wire, or an internal
/// comment a supporter left on the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Email,
    Comment,
}

/// Which side of the conversation produced the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    Customer,
    Supporter,
}

/// One inbound or outbound message unit, eventually attached to a ticket.
///
/// `message_id` is unique among `email` items; that partial unique index is
/// the idempotency boundary for duplicate delivery.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub kind: ItemKind,
    pub message_id: Option<String>,
    pub from_address: String,
    pub to_address: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_by_id: Option<Uuid>,
    pub source: ItemSource,
}

/// A support case. The human-facing `ticket_number` is queue-prefixed,
/// unique, and never reused once assigned.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub subject: String,
    pub queue_id: Uuid,
    pub status_name: String,
    pub assigned_supporter_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Routing bucket whose prefix forms part of the ticket number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Queue {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Supporter {
    pub id: Uuid,
    pub email: String,
}

/// Append-only record of a supporter being assigned to a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketAssignment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub supporter_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}
