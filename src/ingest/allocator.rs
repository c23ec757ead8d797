//! Ticket allocation.
//!
//! Mints a brand-new ticket with a collision-free sequential number, always
//! on the caller's transaction so the ticket, its number and the triggering
//! item commit together. The number comes from a per-queue counter row
//! advanced with `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`: the update
//! takes a row lock, so concurrent allocators on the same queue serialize
//! on the counter and every committed ticket gets a distinct value. A
//! transaction that rolls back after advancing the counter leaves a gap,
//! which is tolerated; numbers are unique and increasing, not dense.
//!
//! Queue selection is intentionally minimal: the first queue by name wins,
//! and when none exists the configured default queue is created lazily.
//! Routing between multiple queues is outside this core.

use std::time::Duration;

use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::models::{Queue, Supporter};

/// How often a conflicted allocation is re-attempted before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 3;

/// A freshly minted ticket.
#[derive(Debug, Clone)]
pub struct AllocatedTicket {
    pub id: Uuid,
    pub number: String,
}

/// Backoff before allocation attempt `attempt` (1-based): 100ms per prior
/// attempt plus a little jitter so two racing workers do not retry in
/// lockstep.
pub fn retry_backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..50);
    Duration::from_millis(u64::from(attempt) * 100 + jitter)
}

/// Create a new ticket for `subject`, numbered from the queue's sequence,
/// status `New`, assigned to the least-loaded supporter if any exist.
pub async fn allocate(
    tx: &mut Transaction<'_, Postgres>,
    subject: &str,
    config: &ProcessorConfig,
) -> Result<AllocatedTicket, sqlx::Error> {
    let queue = resolve_queue(tx, config).await?;

    let (sequence_value,): (i64,) = sqlx::query_as(
        r#"INSERT INTO ticket_sequences (queue_id, last_value)
           VALUES ($1, 1)
           ON CONFLICT (queue_id) DO UPDATE
           SET last_value = ticket_sequences.last_value + 1
           RETURNING last_value"#,
    )
    .bind(queue.id)
    .fetch_one(&mut **tx)
    .await?;

    let number = format!("{}-{}", queue.prefix, sequence_value);
    let ticket_id = Uuid::new_v4();

    sqlx::query(
        r#"INSERT INTO tickets (id, ticket_number, subject, queue_id, status_name)
           VALUES ($1, $2, $3, $4, 'New')"#,
    )
    .bind(ticket_id)
    .bind(&number)
    .bind(subject)
    .bind(queue.id)
    .execute(&mut **tx)
    .await?;

    assign_least_loaded(tx, ticket_id, &number).await?;

    log::info!("created ticket {} in queue {}", number, queue.name);

    Ok(AllocatedTicket {
        id: ticket_id,
        number,
    })
}

/// First queue by name, or the lazily created default. The upsert keeps a
/// concurrent lazy creation from failing: whoever loses the race reads the
/// winner's row back.
async fn resolve_queue(
    tx: &mut Transaction<'_, Postgres>,
    config: &ProcessorConfig,
) -> Result<Queue, sqlx::Error> {
    let existing: Option<Queue> =
        sqlx::query_as("SELECT id, name, prefix, description FROM queues ORDER BY name LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?;

    if let Some(queue) = existing {
        return Ok(queue);
    }

    log::info!(
        "no queue configured, creating default queue {} ({})",
        config.default_queue_name,
        config.default_queue_prefix
    );

    sqlx::query_as(
        r#"INSERT INTO queues (id, name, prefix)
           VALUES ($1, $2, $3)
           ON CONFLICT (prefix) DO UPDATE SET name = EXCLUDED.name
           RETURNING id, name, prefix, description"#,
    )
    .bind(Uuid::new_v4())
    .bind(&config.default_queue_name)
    .bind(&config.default_queue_prefix)
    .fetch_one(&mut **tx)
    .await
}

/// Pick the supporter with the fewest open (non-`Closed`) assigned tickets,
/// ties broken by supporter id. No supporters means the ticket stays
/// unassigned, which is fine.
async fn assign_least_loaded(
    tx: &mut Transaction<'_, Postgres>,
    ticket_id: Uuid,
    ticket_number: &str,
) -> Result<(), sqlx::Error> {
    let supporter: Option<Supporter> = sqlx::query_as(
        r#"SELECT s.id, s.email
           FROM supporters s
           ORDER BY
               (SELECT COUNT(*) FROM tickets t
                WHERE t.assigned_supporter_id = s.id
                  AND t.status_name <> 'Closed'),
               s.id
           LIMIT 1"#,
    )
    .fetch_optional(&mut **tx)
    .await?;

    let Some(supporter) = supporter else {
        log::debug!("no supporters registered, leaving {} unassigned", ticket_number);
        return Ok(());
    };

    record_assignment(tx, ticket_id, supporter.id).await?;

    log::info!("assigned ticket {} to {}", ticket_number, supporter.email);

    Ok(())
}

/// Write an assignment: the current assignee on the ticket plus a row in
/// the append-only assignment log.
async fn record_assignment(
    tx: &mut Transaction<'_, Postgres>,
    ticket_id: Uuid,
    supporter_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE tickets SET assigned_supporter_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(supporter_id)
        .bind(ticket_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"INSERT INTO ticket_assignments (id, ticket_id, supporter_id)
           VALUES ($1, $2, $3)
           ON CONFLICT (ticket_id, supporter_id) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(ticket_id)
    .bind(supporter_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Manually assign a specific supporter to a ticket.
pub async fn assign_supporter(
    pool: &PgPool,
    ticket_id: Uuid,
    supporter_id: Uuid,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    record_assignment(&mut tx, ticket_id, supporter_id).await?;
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempts() {
        let first = retry_backoff(1);
        let third = retry_backoff(3);
        assert!(first >= Duration::from_millis(100));
        assert!(first < Duration::from_millis(150));
        assert!(third >= Duration::from_millis(300));
        assert!(third < Duration::from_millis(350));
    }
}
