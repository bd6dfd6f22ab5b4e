use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use attest_orders::{
    InsertOutcome, NewOrder, OrderFilter, OrderStore, ProviderFilter, StatusCounts,
};
use attest_schemas::{
    Address, AttestationOrder, AttributeSet, DeviceAddress, OrderStatus, UnitId,
};

use crate::{count_orders_by_status, is_unique_constraint_violation, OPEN_IDENTITY_INDEX};

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

const ORDER_COLUMNS: &str = r#"
    id, provider, data, wallet_address, device_address, unit, status,
    created_at, updated_at, attested_at
"#;

/// Postgres-backed [`OrderStore`].
///
/// Candidates are narrowed by `data_hash`, then re-checked against the
/// decoded attribute map before being returned.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a guarded update; `true` when exactly one row changed.
    async fn execute_guarded(&self, what: &'static str, q: PgQuery<'_>) -> Result<bool> {
        let res = q
            .execute(&self.pool)
            .await
            .with_context(|| format!("{what} failed"))?;
        Ok(res.rows_affected() == 1)
    }
}

fn row_to_order(row: &PgRow) -> Result<AttestationOrder> {
    let data: serde_json::Value = row.try_get("data")?;
    let data: AttributeSet =
        serde_json::from_value(data).context("orders.data is not a string map")?;

    let wallet_address = row
        .try_get::<Option<String>, _>("wallet_address")?
        .map(|s| Address::parse(&s))
        .transpose()
        .context("orders.wallet_address is not a valid address")?;
    let device_address = row
        .try_get::<Option<String>, _>("device_address")?
        .map(|s| DeviceAddress::parse(&s))
        .transpose()
        .context("orders.device_address is empty")?;
    let status: String = row.try_get("status")?;
    let status =
        OrderStatus::parse(&status).ok_or_else(|| anyhow!("invalid order status: {status}"))?;

    Ok(AttestationOrder {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        data,
        wallet_address,
        device_address,
        unit: row.try_get::<Option<String>, _>("unit")?.map(UnitId::new),
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        attested_at: row.try_get("attested_at")?,
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get(&self, id: i64) -> Result<Option<AttestationOrder>> {
        let sql = format!("select {ORDER_COLUMNS} from orders where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get order failed")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<AttestationOrder>> {
        let (provider_mode, provider_name) = match &filter.provider {
            ProviderFilter::Any => ("any", None),
            ProviderFilter::Unscoped => ("unscoped", None),
            ProviderFilter::Named(p) => ("named", Some(p.as_str())),
        };

        let sql = format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where ($1::bigint is null or id = $1)
              and ($2::text is null or data_hash = $2)
              and ($3::text is null or wallet_address = $3)
              and ($4::text is null or device_address = $4)
              and (not $5 or status <> 'attested')
              and (case $6::text
                     when 'any' then true
                     when 'unscoped' then provider is null
                     else provider = $7
                   end)
            order by id desc
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(filter.id)
            .bind(filter.data.as_ref().map(|d| d.canonical_hash()))
            .bind(filter.address.as_ref().map(|a| a.as_str().to_string()))
            .bind(filter.device.as_ref().map(|d| d.as_str().to_string()))
            .bind(filter.exclude_attested)
            .bind(provider_mode)
            .bind(provider_name)
            .fetch_all(&self.pool)
            .await
            .context("find_orders failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let order = row_to_order(row)?;
            // Hash equality narrows; map equality decides.
            if filter.matches(&order) {
                out.push(order);
            }
        }
        Ok(out)
    }

    async fn insert(&self, new: &NewOrder) -> Result<InsertOutcome> {
        let sql = format!(
            r#"
            insert into orders (
              provider, data, data_hash, wallet_address, device_address, status
            ) values (
              $1, $2, $3, $4, $5, $6
            )
            returning {ORDER_COLUMNS}
            "#
        );

        let res = sqlx::query(&sql)
            .bind(new.provider.as_deref())
            .bind(new.data.to_json())
            .bind(new.data.canonical_hash())
            .bind(new.address.as_ref().map(|a| a.as_str().to_string()))
            .bind(new.device.as_ref().map(|d| d.as_str().to_string()))
            .bind(new.initial_status().as_str())
            .fetch_one(&self.pool)
            .await;

        match res {
            Ok(row) => Ok(InsertOutcome::Inserted(row_to_order(&row)?)),
            Err(e) if is_unique_constraint_violation(&e, OPEN_IDENTITY_INDEX) => {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert order failed")),
        }
    }

    async fn bind(
        &self,
        id: i64,
        address: &Address,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        // updated_at keys the address_bound notification; keep it strictly increasing.
        let q = sqlx::query(
            r#"
            update orders
            set wallet_address = $2,
                status = 'addressed',
                updated_at = greatest(now(), updated_at + interval '1 microsecond')
            where id = $1
              and status <> 'attested'
              and (issuance_claim is null or issuance_claimed_at < $3)
            "#,
        )
        .bind(id)
        .bind(address.as_str().to_string())
        .bind(now - ttl);
        self.execute_guarded("bind", q).await
    }

    async fn unbind(&self, id: i64, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool> {
        let q = sqlx::query(
            r#"
            update orders
            set wallet_address = null,
                status = 'pending',
                updated_at = greatest(now(), updated_at + interval '1 microsecond')
            where id = $1
              and status = 'addressed'
              and wallet_address is not null
              and (issuance_claim is null or issuance_claimed_at < $2)
            "#,
        )
        .bind(id)
        .bind(now - ttl);
        self.execute_guarded("unbind", q).await
    }

    async fn finalize(&self, id: i64, address: &Address, unit: &UnitId) -> Result<bool> {
        let q = sqlx::query(
            r#"
            update orders
            set wallet_address = $2,
                unit = $3,
                status = 'attested',
                attested_at = now(),
                updated_at = now(),
                issuance_claim = null,
                issuance_claimed_at = null
            where id = $1
              and status <> 'attested'
              and (wallet_address is null or wallet_address = $2)
            "#,
        )
        .bind(id)
        .bind(address.as_str().to_string())
        .bind(unit.as_str().to_string());
        self.execute_guarded("finalize", q).await
    }

    async fn set_device(&self, id: i64, device: &DeviceAddress) -> Result<bool> {
        let q = sqlx::query(
            r#"
            update orders
            set device_address = $2,
                updated_at = now()
            where id = $1
              and status <> 'attested'
            "#,
        )
        .bind(id)
        .bind(device.as_str().to_string());
        self.execute_guarded("set_device", q).await
    }

    async fn claim_issuance(
        &self,
        id: i64,
        address: &Address,
        token: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let q = sqlx::query(
            r#"
            update orders
            set issuance_claim = $2,
                issuance_claimed_at = $3
            where id = $1
              and status <> 'attested'
              and (wallet_address is null or wallet_address = $5)
              and (issuance_claim is null or issuance_claimed_at < $4)
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(now)
        .bind(now - ttl)
        .bind(address.as_str().to_string());
        self.execute_guarded("claim_issuance", q).await
    }

    async fn release_issuance(&self, id: i64, token: Uuid) -> Result<bool> {
        let q = sqlx::query(
            r#"
            update orders
            set issuance_claim = null,
                issuance_claimed_at = null
            where id = $1
              and issuance_claim = $2
            "#,
        )
        .bind(id)
        .bind(token);
        self.execute_guarded("release_issuance", q).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        count_orders_by_status(&self.pool).await
    }
}
