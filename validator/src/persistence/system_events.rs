//! `SystemEventSink` backed by the `system_event` table (spec.md §7:
//! "Every failure path also writes a `SystemEvent`").

use async_trait::async_trait;
use compute_validator_common::events::{SystemEvent, SystemEventSink};
use log::error;
use sqlx::PgPool;

pub struct PostgresSystemEventSink {
    pool: PgPool,
}

impl PostgresSystemEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SystemEventSink for PostgresSystemEventSink {
    async fn record(&self, event: SystemEvent) {
        let event_type = format!("{:?}", event.event_type);
        let result = sqlx::query(
            "INSERT INTO system_event (occurred_at, event_type, event_subtype, long_description, data) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.occurred_at)
        .bind(event_type)
        .bind(&event.event_subtype)
        .bind(&event.long_description)
        .bind(&event.data)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            error!("failed to persist system event {}: {err}", event.event_subtype);
        }
    }
}
