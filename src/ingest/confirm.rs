//! Confirmation dispatch.
//!
//! Runs once per newly created ticket, never for messages that resolved to
//! an existing one. The send is an external side effect that cannot share
//! a transaction with the store, so the order is fixed: render, send, and
//! only after a successful send open the transaction that records the
//! outbound item and its thread edge. A failed send therefore leaves the
//! ticket and inbound item committed but no confirmation item behind, and
//! the failure is surfaced as a dispatch error. Nothing re-triggers the
//! confirmation for that ticket later; the "new ticket, no reply yet"
//! condition that fired it does not recur.

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::error::IngestError;
use crate::ingest::allocator::AllocatedTicket;
use crate::ingest::store::{self, NewEmailItem};
use crate::mail::{MailGateway, OutboundEmail};
use crate::models::ItemSource;
use crate::template::TemplateRender;

const CONFIRMATION_TEMPLATE: &str = "ticket_confirmation";

/// Render, send and record the confirmation reply for a new ticket.
///
/// `requester_name` is the display name from the inbound From header, used
/// only for the salutation; the reply address comes from the stored item.
pub async fn dispatch(
    pool: &PgPool,
    gateway: &dyn MailGateway,
    templates: &dyn TemplateRender,
    config: &ProcessorConfig,
    ticket: &AllocatedTicket,
    origin_item_id: Uuid,
    requester_name: &str,
) -> Result<(), IngestError> {
    let mut tx = pool.begin().await?;
    let origin = store::latest_email_for_ticket(&mut tx, ticket.id)
        .await?
        .ok_or(IngestError::Database(sqlx::Error::RowNotFound))?;
    tx.commit().await?;

    let origin_message_id = origin.message_id.clone().unwrap_or_default();

    // Reference chain: the origin's own chain first, its message id last,
    // so clients thread the confirmation directly under the request.
    let mut references: Vec<String> = Vec::new();
    if let Some(parent) = &origin.in_reply_to {
        if !parent.is_empty() {
            references.push(parent.clone());
        }
    }
    for reference in &origin.references_list {
        if !reference.is_empty() && !references.contains(reference) {
            references.push(reference.clone());
        }
    }
    if !origin_message_id.is_empty() {
        references.push(origin_message_id.clone());
    }

    let salutation = if requester_name.is_empty() {
        origin.from_address.as_str()
    } else {
        requester_name
    };

    let ticket_id_text = ticket.id.to_string();
    let body = templates.render(
        CONFIRMATION_TEMPLATE,
        &[
            ("ticket_number", ticket.number.as_str()),
            ("ticket_id", ticket_id_text.as_str()),
            ("subject", origin.subject.as_str()),
            ("body", origin.body.as_str()),
            ("requester_name", salutation),
            ("company_name", config.company_name.as_str()),
            ("company_domain", config.company_domain.as_str()),
        ],
    )?;

    let outbound = OutboundEmail {
        from_address: config.from_address.clone(),
        from_name: config.from_name.clone(),
        to_address: origin.from_address.clone(),
        subject: format!("Ticket created: {} - {}", ticket.number, origin.subject),
        message_id: format!("{}@{}", Uuid::new_v4(), config.company_domain),
        in_reply_to: (!origin_message_id.is_empty()).then(|| origin_message_id.clone()),
        references: references.clone(),
        body,
    };

    gateway
        .send(&outbound)
        .await
        .map_err(|source| IngestError::Dispatch {
            ticket_number: ticket.number.clone(),
            source,
        })?;

    let mut tx = pool.begin().await?;

    let confirmation_id = Uuid::new_v4();
    store::insert_email_item(
        &mut tx,
        &NewEmailItem {
            id: confirmation_id,
            ticket_id: Some(ticket.id),
            message_id: outbound.message_id.clone(),
            from_address: outbound.from_address.clone(),
            to_address: Some(outbound.to_address.clone()),
            subject: outbound.subject.clone(),
            body: outbound.body.clone(),
            received_at: chrono::Utc::now(),
            in_reply_to: outbound.in_reply_to.clone(),
            references,
            source: ItemSource::Supporter,
        },
    )
    .await?;

    store::link_thread(&mut tx, origin_item_id, confirmation_id).await?;

    tx.commit().await?;

    log::info!(
        "confirmation for ticket {} sent to {}",
        ticket.number,
        outbound.to_address
    );

    Ok(())
}
