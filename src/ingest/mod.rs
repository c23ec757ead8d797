//! Inbound mail ingestion.
//!
//! This module is the bridge between a mailbox and the ticket store. Each
//! cycle fetches the unseen batch from the mail gateway and runs every
//! message through the same pipeline:
//!
//! 1. **`parser`** normalizes the raw message (headers, first text/plain
//!    body, bare message ids).
//! 2. **`resolver`** correlates it with an existing ticket, thread headers
//!    first, subject tag fallback second.
//! 3. **`store`** persists the item and any reply edge; a duplicate message
//!    id makes the whole message a no-op.
//! 4. **`allocator`** mints a new ticket (sequence number, default queue,
//!    least-loaded assignment) when nothing matched.
//! 5. **`confirm`** sends and records the confirmation reply, only for
//!    tickets created in this pass.
//!
//! Steps 2–4 run in one transaction per message, so a ticket and the item
//! that caused it commit together. The store is the only coordination
//! point: several worker processes may run this pipeline concurrently
//! against the same database, and every write that establishes a new fact
//! is guarded by a row lock or uniqueness constraint. Whoever loses a race
//! sees either a duplicate no-op or a conflict that is retried with
//! backoff.

pub mod allocator;
pub mod confirm;
pub mod parser;
pub mod resolver;
pub mod store;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::error::IngestError;
use crate::mail::MailGateway;
use crate::models::ItemSource;
use crate::template::TemplateRender;

use self::allocator::{AllocatedTicket, MAX_ALLOCATION_ATTEMPTS};
use self::parser::ParsedMessage;
use self::store::NewEmailItem;

/// What happened to one inbound message.
#[derive(Debug)]
pub enum Outcome {
    /// An email item with the same message id already existed; nothing was
    /// written.
    AlreadyProcessed,
    /// The message joined an existing ticket. No confirmation is sent.
    Attached { ticket_id: Uuid },
    /// A new ticket was created and its confirmation sent and recorded.
    Created {
        ticket_id: Uuid,
        ticket_number: String,
    },
}

/// How the per-message transaction ended, before any confirmation.
enum Persisted {
    Duplicate,
    Attached { ticket_id: Uuid },
    Created {
        ticket: AllocatedTicket,
        item_id: Uuid,
    },
}

/// Tally for one processing cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub fetched: usize,
    pub created: usize,
    pub attached: usize,
    pub duplicates: usize,
    pub failures: usize,
}

/// Per-message processing pipeline. Holds no mutable state of its own;
/// every decision is re-derived from the store, which is what lets
/// independent worker processes run side by side.
#[derive(Clone)]
pub struct Processor {
    pool: PgPool,
    gateway: Arc<dyn MailGateway>,
    templates: Arc<dyn TemplateRender>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn MailGateway>,
        templates: Arc<dyn TemplateRender>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            templates,
            config,
        }
    }

    /// Fetch and process one batch of unseen messages.
    ///
    /// Per-message failures are logged and counted, never fatal to the
    /// batch. Connectivity and configuration failures abort the cycle so
    /// the worker can back off. The shutdown flag is honored between
    /// messages; the in-flight message always completes.
    pub async fn run_cycle(&self, shutdown: &AtomicBool) -> Result<CycleStats, IngestError> {
        let batch = self.gateway.fetch_unseen().await?;

        let mut stats = CycleStats {
            fetched: batch.len(),
            ..CycleStats::default()
        };

        if batch.is_empty() {
            log::debug!("no new messages");
            return Ok(stats);
        }

        log::info!("found {} new messages", batch.len());

        for raw in &batch {
            if shutdown.load(Ordering::Relaxed) {
                log::info!("shutdown requested, stopping after current message");
                break;
            }

            match self.process_raw(&raw.bytes).await {
                Ok(Outcome::AlreadyProcessed) => stats.duplicates += 1,
                Ok(Outcome::Attached { ticket_id }) => {
                    log::debug!("message attached to ticket {}", ticket_id);
                    stats.attached += 1;
                }
                Ok(Outcome::Created { ticket_number, .. }) => {
                    log::debug!("message opened ticket {}", ticket_number);
                    stats.created += 1;
                }
                // Losing the store or the mailbox mid-batch is a cycle
                // failure, not a bad message.
                Err(err @ (IngestError::Connectivity(_) | IngestError::Configuration(_))) => {
                    return Err(err);
                }
                Err(err) => {
                    log::error!("failed to process message: {}", err);
                    stats.failures += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Run one raw message through the pipeline.
    pub async fn process_raw(&self, raw: &[u8]) -> Result<Outcome, IngestError> {
        let msg = parser::parse_message(raw)?;

        log::info!(
            "received email from {} - message id {}, subject {:?}",
            msg.from_address,
            msg.message_id,
            msg.subject
        );

        let persisted = self.persist_with_retry(&msg).await?;

        match persisted {
            Persisted::Duplicate => {
                log::info!("message {} already processed, skipping", msg.message_id);
                Ok(Outcome::AlreadyProcessed)
            }
            Persisted::Attached { ticket_id } => Ok(Outcome::Attached { ticket_id }),
            Persisted::Created { ticket, item_id } => {
                confirm::dispatch(
                    &self.pool,
                    self.gateway.as_ref(),
                    self.templates.as_ref(),
                    &self.config,
                    &ticket,
                    item_id,
                    &msg.from_name,
                )
                .await?;

                Ok(Outcome::Created {
                    ticket_id: ticket.id,
                    ticket_number: ticket.number,
                })
            }
        }
    }

    /// Commit the message, re-attempting the whole transactional unit when
    /// a concurrent allocator wins a race. Duplicates are not conflicts and
    /// come back immediately.
    async fn persist_with_retry(&self, msg: &ParsedMessage) -> Result<Persisted, IngestError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.persist(msg).await {
                Err(err) if err.is_conflict() && attempt < MAX_ALLOCATION_ATTEMPTS => {
                    let backoff = allocator::retry_backoff(attempt);
                    log::warn!(
                        "allocation attempt {}/{} for message {} conflicted, retrying in {:?}: {}",
                        attempt,
                        MAX_ALLOCATION_ATTEMPTS,
                        msg.message_id,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// One transaction: correlate, store the item, link the thread, and
    /// allocate a ticket when nothing matched.
    async fn persist(&self, msg: &ParsedMessage) -> Result<Persisted, IngestError> {
        let mut tx = self.pool.begin().await?;

        let correlation = resolver::resolve(&mut tx, msg).await?;

        let item_id = Uuid::new_v4();
        let inserted = store::insert_email_item(
            &mut tx,
            &NewEmailItem {
                id: item_id,
                ticket_id: correlation.ticket_id,
                message_id: msg.message_id.clone(),
                from_address: msg.from_address.clone(),
                to_address: msg.to_address.clone(),
                subject: msg.subject.clone(),
                body: msg.body.clone(),
                received_at: msg.received_at,
                in_reply_to: msg.in_reply_to.clone(),
                references: msg.references.clone(),
                source: ItemSource::Customer,
            },
        )
        .await?;

        if !inserted {
            tx.rollback().await?;
            return Ok(Persisted::Duplicate);
        }

        if let Some(parent) = correlation.parent_item_id {
            store::link_thread(&mut tx, parent, item_id).await?;
        }

        match correlation.ticket_id {
            Some(ticket_id) => {
                tx.commit().await?;
                Ok(Persisted::Attached { ticket_id })
            }
            None => {
                let ticket = allocator::allocate(&mut tx, &msg.subject, &self.config).await?;
                store::attach_ticket(&mut tx, item_id, ticket.id).await?;
                tx.commit().await?;
                Ok(Persisted::Created { ticket, item_id })
            }
        }
    }
}
