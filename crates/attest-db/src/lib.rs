//! attest-db
//!
//! Postgres persistence: connection bootstrap, embedded migrations, and the
//! sqlx-backed [`PgOrderStore`] / [`PgOutbox`].

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod orders;
mod outbox;

pub use orders::PgOrderStore;
pub use outbox::PgOutbox;

use attest_orders::StatusCounts;
use attest_schemas::OrderStatus;

pub const ENV_DB_URL: &str = "ATTEST_DATABASE_URL";

/// Name of the partial unique index guarding open (provider, data) identity.
pub const OPEN_IDENTITY_INDEX: &str = "uq_orders_open_identity";

/// Connect to Postgres using ATTEST_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

/// Order counts per status. A database without the schema reports zeros.
pub async fn count_orders_by_status(pool: &PgPool) -> Result<StatusCounts> {
    let st = status(pool).await?;
    if !st.has_orders_table {
        return Ok(StatusCounts::default());
    }

    let rows: Vec<(String, i64)> = sqlx::query_as::<_, (String, i64)>(
        r#"
        select status, count(*)::bigint
        from orders
        group by status
        "#,
    )
    .fetch_all(pool)
    .await
    .context("count_orders_by_status failed")?;

    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        match OrderStatus::parse(&status) {
            Some(s) => counts.add(s, n),
            None => tracing::warn!(status = %status, "unknown order status in db"),
        }
    }
    Ok(counts)
}

/// Detect a Postgres unique violation (23505) on a named constraint or index.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
