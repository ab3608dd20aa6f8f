use crate::error::StoreError;
use crate::settings::{self, BalanceTable};
use crate::types::{
    ActiveAddressRecord, BalanceUpdate, MatchResult, Order, ReceiveOrder, ToAddressRecord,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Connection, Pool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name
pub const SCHEMA: &str = "tron_flow";

// Postgres caps a statement at 65535 bind parameters
const INSERT_CHUNK: usize = 1000;

pub async fn connect(cfg: &settings::Database) -> Result<DbPool> {
    // Force UTF-8 client encoding before the first connection
    env::set_var("PGCLIENTENCODING", "UTF8");

    let database_url = cfg
        .url
        .clone()
        .or_else(|| env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;
    let max_connections = cfg.max_connections;
    let attempts = cfg.connect_attempts.max(1);

    // 200ms, 400ms, 800ms, ... capped at ~12.8s
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_millis(12_800))
        .take(attempts - 1);

    let pool = Retry::spawn(strategy, || {
        let database_url = database_url.clone();
        async move {
            let attempt = async {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&database_url)
                    .await?;
                initialize_database(&pool).await?;
                Ok::<DbPool, anyhow::Error>(pool)
            }
            .await;
            if let Err(e) = &attempt {
                log::warn!("DB connect/init attempt failed: {}. Retrying...", e);
            }
            attempt
        }
    })
    .await?;

    log::info!("✅ Successfully connected to database.");
    Ok(pool)
}

pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x54524F4E464C4F57; // "TRONFLOW" in hex

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA))
        .execute(tx.as_mut())
        .await?;
    create_tables(&mut tx).await?;

    tx.commit().await?;
    log::info!("Database initialization complete, transaction committed.");
    Ok(())
}

async fn create_tables(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<()> {
    let statements = [
        // Address pool fed by the frontier crawler
        format!(
            "CREATE TABLE IF NOT EXISTS {}.address_pool (
                address VARCHAR(34) PRIMARY KEY,
                source_address VARCHAR(34),
                balance NUMERIC(38, 6),
                query_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.to_address_records (
                id BIGSERIAL PRIMARY KEY,
                pattern VARCHAR(64) NOT NULL,
                to_address VARCHAR(34) UNIQUE NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.receive_orders (
                order_no VARCHAR(48) PRIMARY KEY,
                pattern VARCHAR(64) NOT NULL,
                to_address VARCHAR(34) UNIQUE NOT NULL,
                amount NUMERIC(20, 6) NOT NULL,
                order_time TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
        // Result columns stay NULL until a verified match arrives
        format!(
            "CREATE TABLE IF NOT EXISTS {}.pattern_tasks (
                pattern VARCHAR(64) PRIMARY KEY,
                address VARCHAR(34),
                private_key VARCHAR(128),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                matched_at TIMESTAMPTZ
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.active_addresses (
                address VARCHAR(34) PRIMARY KEY,
                balance NUMERIC(38, 6),
                tx_count BIGINT NOT NULL DEFAULT 0,
                last_active_time TIMESTAMPTZ,
                frequent_out_addrs TEXT[] NOT NULL DEFAULT '{{}}',
                recursion_depth INTEGER NOT NULL DEFAULT 0,
                query_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.orders (
                order_id VARCHAR(32) PRIMARY KEY,
                active_address VARCHAR(34) NOT NULL,
                frequent_out_mask VARCHAR(64) NOT NULL,
                counterpart_address VARCHAR(34) NOT NULL,
                last_tx_time TIMESTAMPTZ NOT NULL,
                fixed_amount NUMERIC(38, 6) NOT NULL,
                recursion_depth INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_pattern_tasks_pending ON {}.pattern_tasks (created_at) WHERE address IS NULL",
            SCHEMA
        ),
    ];

    for statement in statements.iter() {
        sqlx::query(statement).execute(tx.as_mut()).await?;
    }
    Ok(())
}

fn balance_table_name(table: BalanceTable) -> &'static str {
    match table {
        BalanceTable::AddressPool => "address_pool",
        BalanceTable::ActiveAddresses => "active_addresses",
    }
}

/// Insert-ignore of discovered addresses; returns rows actually inserted.
pub async fn insert_discovered_addresses(
    pool: &DbPool,
    source: &str,
    addresses: &[String],
) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in addresses.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {}.address_pool (address, source_address) ",
            SCHEMA
        ));
        qb.push_values(chunk, |mut row, address| {
            row.push_bind(address).push_bind(source);
        });
        qb.push(" ON CONFLICT (address) DO NOTHING");
        inserted += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(inserted)
}

pub async fn insert_to_address_records(
    pool: &DbPool,
    records: &[ToAddressRecord],
) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in records.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {}.to_address_records (pattern, to_address) ",
            SCHEMA
        ));
        qb.push_values(chunk, |mut row, record| {
            row.push_bind(&record.pattern).push_bind(&record.to_address);
        });
        qb.push(" ON CONFLICT (to_address) DO NOTHING");
        inserted += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(inserted)
}

pub async fn insert_receive_orders(
    pool: &DbPool,
    orders: &[ReceiveOrder],
) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in orders.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {}.receive_orders (order_no, pattern, to_address, amount, order_time) ",
            SCHEMA
        ));
        qb.push_values(chunk, |mut row, order| {
            row.push_bind(&order.order_no)
                .push_bind(&order.pattern)
                .push_bind(&order.to_address)
                .push_bind(order.amount)
                .push_bind(order.order_time);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(inserted)
}

pub async fn upsert_active_addresses(
    pool: &DbPool,
    records: &[ActiveAddressRecord],
) -> Result<u64, StoreError> {
    if records.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for record in records {
        let counterparts: Vec<String> = record
            .frequent_out_addrs
            .iter()
            .map(|f| f.address.clone())
            .collect();
        written += sqlx::query(&format!(
            "INSERT INTO {}.active_addresses
                (address, balance, tx_count, last_active_time, frequent_out_addrs, recursion_depth, query_time)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (address) DO UPDATE SET
                balance = excluded.balance,
                tx_count = excluded.tx_count,
                last_active_time = excluded.last_active_time,
                frequent_out_addrs = excluded.frequent_out_addrs,
                recursion_depth = LEAST({}.active_addresses.recursion_depth, excluded.recursion_depth),
                query_time = excluded.query_time",
            SCHEMA, SCHEMA
        ))
        .bind(&record.address)
        .bind(record.balance)
        .bind(record.tx_count as i64)
        .bind(record.last_active_time)
        .bind(&counterparts)
        .bind(record.recursion_depth as i32)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

/// Orders are keyed by `order_id`; a replayed order is ignored.
pub async fn insert_orders(pool: &DbPool, orders: &[Order]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in orders.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {}.orders (order_id, active_address, frequent_out_mask, counterpart_address, last_tx_time, fixed_amount, recursion_depth) ",
            SCHEMA
        ));
        qb.push_values(chunk, |mut row, order| {
            row.push_bind(&order.order_id)
                .push_bind(&order.active_address)
                .push_bind(&order.frequent_out_addr)
                .push_bind(&order.counterpart_address)
                .push_bind(order.last_tx_time)
                .push_bind(order.fixed_amount)
                .push_bind(order.recursion_depth as i32);
        });
        qb.push(" ON CONFLICT (order_id) DO NOTHING");
        inserted += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(inserted)
}

/// One page of addresses in stable (address) order.
pub async fn load_address_page(
    pool: &DbPool,
    table: BalanceTable,
    offset: i64,
    limit: i64,
) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT address FROM {}.{} ORDER BY address LIMIT $1 OFFSET $2",
        SCHEMA,
        balance_table_name(table)
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("address").map_err(StoreError::from))
        .collect()
}

pub async fn count_addresses(pool: &DbPool, table: BalanceTable) -> Result<i64, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT COUNT(*) AS count FROM {}.{}",
        SCHEMA,
        balance_table_name(table)
    ))
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("count")?)
}

/// Bulk keyed upsert of balances in one statement.
pub async fn batch_upsert_balances(
    pool: &DbPool,
    table: BalanceTable,
    updates: &[BalanceUpdate],
) -> Result<u64, StoreError> {
    if updates.is_empty() {
        return Ok(0);
    }
    // ON CONFLICT DO UPDATE rejects a key appearing twice in one statement
    let mut latest: HashMap<&str, &BalanceUpdate> = HashMap::with_capacity(updates.len());
    for update in updates {
        latest.insert(update.address.as_str(), update);
    }

    let now = Utc::now();
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {}.{} (address, balance, query_time) ",
        SCHEMA,
        balance_table_name(table)
    ));
    qb.push_values(latest.values(), |mut row, update| {
        row.push_bind(&update.address)
            .push_bind(update.balance)
            .push_bind(now);
    });
    qb.push(" ON CONFLICT (address) DO UPDATE SET balance = excluded.balance, query_time = excluded.query_time");

    Ok(qb.build().execute(pool).await?.rows_affected())
}

pub async fn insert_pattern_tasks(pool: &DbPool, patterns: &[String]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in patterns.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {}.pattern_tasks (pattern) ", SCHEMA));
        qb.push_values(chunk, |mut row, pattern| {
            row.push_bind(pattern);
        });
        qb.push(" ON CONFLICT (pattern) DO NOTHING");
        inserted += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(inserted)
}

pub async fn load_pending_patterns(pool: &DbPool, limit: i64) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT pattern FROM {}.pattern_tasks
         WHERE address IS NULL OR address = ''
         ORDER BY created_at
         LIMIT $1",
        SCHEMA
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("pattern").map_err(StoreError::from))
        .collect()
}

pub async fn count_pending_patterns_since(
    pool: &DbPool,
    since: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT COUNT(*) AS count FROM {}.pattern_tasks
         WHERE (address IS NULL OR address = '') AND created_at >= $1",
        SCHEMA
    ))
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("count")?)
}

/// Fills a pending task. Returns `false` when the task was already filled or is unknown.
pub async fn fill_pattern_match(
    pool: &DbPool,
    pattern: &str,
    result: &MatchResult,
) -> Result<bool, StoreError> {
    let affected = sqlx::query(&format!(
        "UPDATE {}.pattern_tasks
         SET address = $2, private_key = $3, matched_at = NOW()
         WHERE pattern = $1 AND (address IS NULL OR address = '')",
        SCHEMA
    ))
    .bind(pattern)
    .bind(&result.address)
    .bind(&result.private_key)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}
