use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use attest_orders::{Outbox, OutboxEntry};
use attest_schemas::Notification;

/// Postgres-backed [`Outbox`]. The unique idempotency key makes enqueue a
/// no-op on replay.
#[derive(Clone)]
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_by_idempotency_key(&self, key: &str) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query(
            r#"
            select outbox_id, idempotency_key, payload, attempts, last_error, created_at
            from notification_outbox
            where idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("outbox fetch_by_idempotency_key failed")?;
        row.as_ref().map(row_to_entry).transpose()
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry> {
    let payload: serde_json::Value = row.try_get("payload")?;
    let notification: Notification =
        serde_json::from_value(payload).context("outbox payload is not a notification")?;
    Ok(OutboxEntry {
        id: row.try_get("outbox_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        notification,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Outbox for PgOutbox {
    async fn enqueue(&self, notification: &Notification) -> Result<bool> {
        let payload =
            serde_json::to_value(notification).context("serialize notification failed")?;
        let res = sqlx::query(
            r#"
            insert into notification_outbox (idempotency_key, topic, payload)
            values ($1, $2, $3)
            on conflict (idempotency_key) do nothing
            "#,
        )
        .bind(notification.idempotency_key())
        .bind(notification.topic())
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("outbox enqueue failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            select outbox_id, idempotency_key, payload, attempts, last_error, created_at
            from notification_outbox
            where status = 'PENDING'
            order by attempts asc, outbox_id asc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("outbox pending query failed")?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            update notification_outbox
            set status = 'DELIVERED',
                delivered_at = now()
            where outbox_id = $1
              and status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("outbox mark_delivered failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            update notification_outbox
            set attempts = attempts + 1,
                last_error = $2
            where outbox_id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("outbox record_failure failed")?;
        Ok(())
    }
}
