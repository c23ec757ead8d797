//! Ticket status vocabulary.
//!
//! Installations define their own status names (`status_definitions`), each
//! mapped onto one of four base statuses. The ingestion core only cares
//! about `Closed`: tickets in a closed status do not count toward a
//! supporter's load during assignment.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseStatus {
    Open,
    Doing,
    Waiting,
    Closed,
}

impl BaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseStatus::Open => "Open",
            BaseStatus::Doing => "Doing",
            BaseStatus::Waiting => "Waiting",
            BaseStatus::Closed => "Closed",
        }
    }
}

impl std::str::FromStr for BaseStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Open" => Ok(BaseStatus::Open),
            "Doing" => Ok(BaseStatus::Doing),
            "Waiting" => Ok(BaseStatus::Waiting),
            "Closed" => Ok(BaseStatus::Closed),
            other => Err(format!("unknown base status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatusDefinition {
    pub id: i32,
    pub name: String,
    pub base_status: String,
    pub description: Option<String>,
}

/// Register a new status name, returning its id.
pub async fn create_status(
    pool: &PgPool,
    name: &str,
    base_status: BaseStatus,
    description: Option<&str>,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        r#"INSERT INTO status_definitions (name, base_status, description)
           VALUES ($1, $2, $3)
           RETURNING id"#,
    )
    .bind(name)
    .bind(base_status.as_str())
    .bind(description)
    .fetch_one(pool)
    .await
}

/// Look up the base status behind a status name, if the name is defined.
pub async fn get_base_status(
    pool: &PgPool,
    status_name: &str,
) -> Result<Option<BaseStatus>, sqlx::Error> {
    let base: Option<(String,)> =
        sqlx::query_as("SELECT base_status FROM status_definitions WHERE name = $1")
            .bind(status_name)
            .fetch_optional(pool)
            .await?;

    Ok(base.and_then(|(value,)| value.parse().ok()))
}

/// All defined statuses, grouped by base status then name.
pub async fn list_statuses(pool: &PgPool) -> Result<Vec<StatusDefinition>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, name, base_status, description
           FROM status_definitions
           ORDER BY base_status, name"#,
    )
    .fetch_all(pool)
    .await
}

/// Move a ticket to a new status.
pub async fn update_ticket_status(
    pool: &PgPool,
    ticket_id: Uuid,
    status_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE tickets SET status_name = $1, updated_at = NOW() WHERE id = $2")
        .bind(status_name)
        .bind(ticket_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_status_round_trips_through_strings() {
        for base in [
            BaseStatus::Open,
            BaseStatus::Doing,
            BaseStatus::Waiting,
            BaseStatus::Closed,
        ] {
            assert_eq!(base.as_str().parse::<BaseStatus>(), Ok(base));
        }
    }

    #[test]
    fn unknown_base_status_is_rejected() {
        assert!("Reopened".parse::<BaseStatus>().is_err());
    }
}
