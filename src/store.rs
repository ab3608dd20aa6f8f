//! Persistence seams used by the crawlers and pipelines.
//!
//! Every write is insert-ignore or keyed upsert, so concurrent workers may write
//! the same rows without application-level locking.

use crate::database::{self, DbPool};
use crate::error::StoreError;
use crate::patterns::generate_pattern;
use crate::settings::BalanceTable;
use crate::types::{
    ActiveAddressRecord, BalanceUpdate, MatchResult, Order, ReceiveOrder, ToAddressRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;

/// Destination for addresses found by the frontier crawler.
#[async_trait]
pub trait AddressSink: Send + Sync {
    /// Persists `addresses` discovered while processing `source`; returns how many were new.
    async fn insert_discovered(&self, source: &str, addresses: &[String]) -> Result<u64, StoreError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn save_active_addresses(&self, records: &[ActiveAddressRecord]) -> Result<u64, StoreError>;

    async fn save_orders(&self, orders: &[Order]) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn load_address_page(&self, offset: i64, limit: i64) -> Result<Vec<String>, StoreError>;

    async fn count_addresses(&self) -> Result<i64, StoreError>;

    async fn save_balances(&self, updates: &[BalanceUpdate]) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn insert_patterns(&self, patterns: &[String]) -> Result<u64, StoreError>;

    async fn pending_patterns(&self, limit: i64) -> Result<Vec<String>, StoreError>;

    async fn count_pending_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Fills the task at most once; `false` if it was already filled.
    async fn fill_match(&self, pattern: &str, result: &MatchResult) -> Result<bool, StoreError>;
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    balance_table: BalanceTable,
}

impl PgStore {
    pub fn new(pool: DbPool, balance_table: BalanceTable) -> Self {
        Self {
            pool,
            balance_table,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ActivityStore for PgStore {
    async fn save_active_addresses(&self, records: &[ActiveAddressRecord]) -> Result<u64, StoreError> {
        database::upsert_active_addresses(&self.pool, records).await
    }

    async fn save_orders(&self, orders: &[Order]) -> Result<u64, StoreError> {
        database::insert_orders(&self.pool, orders).await
    }
}

#[async_trait]
impl BalanceStore for PgStore {
    async fn load_address_page(&self, offset: i64, limit: i64) -> Result<Vec<String>, StoreError> {
        database::load_address_page(&self.pool, self.balance_table, offset, limit).await
    }

    async fn count_addresses(&self) -> Result<i64, StoreError> {
        database::count_addresses(&self.pool, self.balance_table).await
    }

    async fn save_balances(&self, updates: &[BalanceUpdate]) -> Result<u64, StoreError> {
        database::batch_upsert_balances(&self.pool, self.balance_table, updates).await
    }
}

#[async_trait]
impl PatternStore for PgStore {
    async fn insert_patterns(&self, patterns: &[String]) -> Result<u64, StoreError> {
        database::insert_pattern_tasks(&self.pool, patterns).await
    }

    async fn pending_patterns(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        database::load_pending_patterns(&self.pool, limit).await
    }

    async fn count_pending_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        database::count_pending_patterns_since(&self.pool, since).await
    }

    async fn fill_match(&self, pattern: &str, result: &MatchResult) -> Result<bool, StoreError> {
        database::fill_pattern_match(&self.pool, pattern, result).await
    }
}

/// Writes discovered addresses into the address pool.
pub struct AddressPoolSink {
    pool: DbPool,
}

impl AddressPoolSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressSink for AddressPoolSink {
    async fn insert_discovered(&self, source: &str, addresses: &[String]) -> Result<u64, StoreError> {
        database::insert_discovered_addresses(&self.pool, source, addresses).await
    }

    fn name(&self) -> &'static str {
        "address_pool"
    }
}

/// Pairs every discovered address with a freshly generated vanity pattern.
pub struct ToAddressRecordSink {
    pool: DbPool,
    prefix_len: usize,
    suffix_len: usize,
}

impl ToAddressRecordSink {
    pub fn new(pool: DbPool, prefix_len: usize, suffix_len: usize) -> Self {
        Self {
            pool,
            prefix_len,
            suffix_len,
        }
    }
}

pub fn to_address_records(addresses: &[String], prefix_len: usize, suffix_len: usize) -> Vec<ToAddressRecord> {
    let mut rng = rand::thread_rng();
    addresses
        .iter()
        .map(|to_address| ToAddressRecord {
            pattern: generate_pattern(&mut rng, prefix_len, suffix_len),
            to_address: to_address.clone(),
        })
        .collect()
}

#[async_trait]
impl AddressSink for ToAddressRecordSink {
    async fn insert_discovered(&self, _source: &str, addresses: &[String]) -> Result<u64, StoreError> {
        let records = to_address_records(addresses, self.prefix_len, self.suffix_len);
        database::insert_to_address_records(&self.pool, &records).await
    }

    fn name(&self) -> &'static str {
        "to_address_records"
    }
}

/// Turns every discovered address into a small receive order.
pub struct ReceiveOrderSink {
    pool: DbPool,
    prefix_len: usize,
    suffix_len: usize,
}

impl ReceiveOrderSink {
    pub fn new(pool: DbPool, prefix_len: usize, suffix_len: usize) -> Self {
        Self {
            pool,
            prefix_len,
            suffix_len,
        }
    }
}

/// `ORD` + nanosecond timestamp + four random digits; amount in 0.001..=0.009.
pub fn receive_orders(addresses: &[String], prefix_len: usize, suffix_len: usize) -> Vec<ReceiveOrder> {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    addresses
        .iter()
        .map(|to_address| ReceiveOrder {
            order_no: format!("ORD{}{:04}", nanos, rng.gen_range(0..10_000)),
            pattern: generate_pattern(&mut rng, prefix_len, suffix_len),
            to_address: to_address.clone(),
            amount: Decimal::new(rng.gen_range(1..=9), 3),
            order_time: now,
        })
        .collect()
}

#[async_trait]
impl AddressSink for ReceiveOrderSink {
    async fn insert_discovered(&self, _source: &str, addresses: &[String]) -> Result<u64, StoreError> {
        let orders = receive_orders(addresses, self.prefix_len, self.suffix_len);
        database::insert_receive_orders(&self.pool, &orders).await
    }

    fn name(&self) -> &'static str {
        "receive_orders"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::glob_matches;

    #[test]
    fn receive_orders_shape() {
        let addresses = vec!["TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf".to_string(); 3];
        let orders = receive_orders(&addresses, 3, 4);
        assert_eq!(orders.len(), 3);
        for order in &orders {
            assert!(order.order_no.starts_with("ORD"));
            assert!(order.amount >= Decimal::new(1, 3) && order.amount <= Decimal::new(9, 3));
            assert_eq!(order.pattern.len(), 8);
        }
    }

    #[test]
    fn to_address_records_carry_patterns() {
        let addresses = vec!["TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string()];
        let records = to_address_records(&addresses, 3, 4);
        assert_eq!(records[0].to_address, addresses[0]);
        assert!(glob_matches("T??*????", &records[0].pattern));
    }
}
