//! Item persistence.
//!
//! All writes happen on the caller's transaction so that an item, its
//! thread edge and (for new tickets) the allocation commit or roll back as
//! one unit. The email insert leans on the partial unique index over
//! `items.message_id` instead of a check-then-insert: when two workers race
//! on the same message id, exactly one row lands and the loser observes
//! zero affected rows: a no-op success, not an error.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Item, ItemSource, Ticket};

/// Column values for one new email item.
#[derive(Debug, Clone)]
pub struct NewEmailItem {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub message_id: String,
    pub from_address: String,
    pub to_address: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub source: ItemSource,
}

/// Insert an email item. Returns `false` when an item with the same
/// message id already exists (the duplicate-delivery no-op).
pub async fn insert_email_item(
    tx: &mut Transaction<'_, Postgres>,
    item: &NewEmailItem,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO items
           (id, ticket_id, kind, message_id, from_address, to_address,
            subject, body, received_at, in_reply_to, references_list, source)
           VALUES ($1, $2, 'email', $3, $4, $5, $6, $7, $8, $9, $10, $11)
           ON CONFLICT (message_id) WHERE kind = 'email' DO NOTHING"#,
    )
    .bind(item.id)
    .bind(item.ticket_id)
    .bind(&item.message_id)
    .bind(&item.from_address)
    .bind(&item.to_address)
    .bind(&item.subject)
    .bind(&item.body)
    .bind(item.received_at)
    .bind(&item.in_reply_to)
    .bind(&item.references)
    .bind(item.source)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a reply edge. Re-inserting an existing edge is a no-op.
pub async fn link_thread(
    tx: &mut Transaction<'_, Postgres>,
    parent_item_id: Uuid,
    child_item_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO item_threads (parent_item_id, child_item_id)
           VALUES ($1, $2)
           ON CONFLICT DO NOTHING"#,
    )
    .bind(parent_item_id)
    .bind(child_item_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Backfill the ticket reference on an item stored before its ticket
/// existed.
pub async fn attach_ticket(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    ticket_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE items SET ticket_id = $1 WHERE id = $2")
        .bind(ticket_id)
        .bind(item_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// The most recently created email item on a ticket, used to build
/// outgoing thread headers.
pub async fn latest_email_for_ticket(
    tx: &mut Transaction<'_, Postgres>,
    ticket_id: Uuid,
) -> Result<Option<Item>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, ticket_id, kind, message_id, from_address, to_address,
                  subject, body, received_at, in_reply_to, references_list,
                  created_at, created_by_id, source
           FROM items
           WHERE ticket_id = $1 AND kind = 'email'
           ORDER BY created_at DESC
           LIMIT 1"#,
    )
    .bind(ticket_id)
    .fetch_optional(&mut **tx)
    .await
}

/// Look up a ticket by its human-facing number.
pub async fn ticket_by_number(
    tx: &mut Transaction<'_, Postgres>,
    ticket_number: &str,
) -> Result<Option<Ticket>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, ticket_number, subject, queue_id, status_name,
                  assigned_supporter_id, created_at, updated_at
           FROM tickets
           WHERE ticket_number = $1"#,
    )
    .bind(ticket_number)
    .fetch_optional(&mut **tx)
    .await
}
