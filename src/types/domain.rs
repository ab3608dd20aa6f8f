use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Millisecond chain timestamp to UTC; out-of-range values clamp to the epoch.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// A decoded token transfer, amounts already scaled by the token decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_id: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub contract_address: String,
    pub confirmed: bool,
    pub fee: Decimal,
}

impl Transfer {
    pub fn timestamp(&self) -> DateTime<Utc> {
        millis_to_datetime(self.block_timestamp)
    }
}

/// Query options for the TRC20 transfer-history endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub contract: Option<String>,
    /// Inclusive lower bound, milliseconds.
    pub min_timestamp: Option<i64>,
    /// Inclusive upper bound, milliseconds.
    pub max_timestamp: Option<i64>,
    pub only_to: bool,
    pub only_from: bool,
    pub only_confirmed: bool,
    /// Overall record limit across pages.
    pub limit: Option<usize>,
}

impl TransferFilter {
    pub fn for_contract(contract: impl Into<String>) -> Self {
        Self {
            contract: Some(contract.into()),
            ..Self::default()
        }
    }

    pub fn since(mut self, min_timestamp: i64) -> Self {
        self.min_timestamp = Some(min_timestamp);
        self
    }

    pub fn until(mut self, max_timestamp: i64) -> Self {
        self.max_timestamp = Some(max_timestamp);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn outbound_only(mut self) -> Self {
        self.only_from = true;
        self.only_to = false;
        self
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the server stops returning a fingerprint.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Account-level transaction with every party it references, as returned by the API
/// (base58 or `41…` hex, not yet normalised).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountTransaction {
    pub tx_id: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub contract_type: String,
    pub parties: Vec<String>,
}

/// Per-counterpart aggregate of a source address's recent outbound transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentOutAddress {
    pub address: String,
    pub masked_address: String,
    pub out_count: u32,
    pub total_out_amount: Decimal,
    pub avg_out_amount: Decimal,
    pub large_out_count: u32,
    pub last_tx_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAddressRecord {
    pub address: String,
    pub balance: Decimal,
    pub tx_count: u64,
    pub last_active_time: Option<DateTime<Utc>>,
    pub frequent_out_addrs: Vec<FrequentOutAddress>,
    pub is_active: bool,
    pub recursion_depth: usize,
}

/// Work order synthesised for an (active address, frequent counterpart) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub active_address: String,
    /// Masked counterpart, `prefix*suffix`.
    pub frequent_out_addr: String,
    pub counterpart_address: String,
    pub last_tx_time: DateTime<Utc>,
    pub fixed_amount: Decimal,
    pub recursion_depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub address: String,
    pub balance: Decimal,
}

/// A key pair reported by the external matcher, verified before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub address: String,
    pub private_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOrder {
    pub order_no: String,
    pub pattern: String,
    pub to_address: String,
    pub amount: Decimal,
    pub order_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToAddressRecord {
    pub pattern: String,
    pub to_address: String,
}
