//! JSON payloads of the TRON HTTP API (full-node `/wallet/*` and the indexed `/v1/*` endpoints).
//!
//! Every field carries a serde default: the API omits empty collections and
//! zero values freely, and a missing field must never fail a whole page.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockResponse {
    #[serde(rename = "blockID", default)]
    pub block_id: String,
    #[serde(default)]
    pub block_header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub raw_data: BlockHeaderRaw,
    #[serde(default)]
    pub witness_signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockHeaderRaw {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "txTrieRoot", default)]
    pub tx_trie_root: String,
    #[serde(default)]
    pub witness_address: String,
    #[serde(rename = "parentHash", default)]
    pub parent_hash: String,
    #[serde(default)]
    pub version: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockTransaction {
    #[serde(default)]
    pub ret: Vec<TxRet>,
    #[serde(rename = "txID", default)]
    pub tx_id: String,
    #[serde(default)]
    pub raw_data: TxRawData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxRet {
    #[serde(rename = "contractRet", default)]
    pub contract_ret: String,
    #[serde(default)]
    pub fee: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxRawData {
    #[serde(default)]
    pub contract: Vec<TxContract>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub expiration: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxContract {
    #[serde(default)]
    pub parameter: ContractParameter,
    #[serde(rename = "type", default)]
    pub contract_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractParameter {
    #[serde(default)]
    pub value: ContractValue,
    #[serde(default)]
    pub type_url: String,
}

/// Union of the parameter fields used by `TransferContract` and `TriggerSmartContract`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractValue {
    #[serde(default)]
    pub owner_address: String,
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub contract_address: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionResponse {
    #[serde(rename = "txID", default)]
    pub tx_id: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub ret: Vec<TxRet>,
    #[serde(default)]
    pub raw_data: TxRawData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionInfoResponse {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: i64,
    #[serde(rename = "blockTimeStamp", default)]
    pub block_timestamp: i64,
    #[serde(rename = "contractResult", default)]
    pub contract_result: Vec<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub receipt: Receipt,
    #[serde(default)]
    pub log: Vec<EventLog>,
    #[serde(default)]
    pub fee: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub energy_usage: i64,
    #[serde(default)]
    pub energy_fee: i64,
    #[serde(default)]
    pub origin_energy_usage: i64,
    #[serde(default)]
    pub energy_usage_total: i64,
    #[serde(default)]
    pub net_usage: i64,
    #[serde(default)]
    pub net_fee: i64,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// Body of `POST /wallet/triggerconstantcontract`.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerConstantRequest {
    pub owner_address: String,
    pub contract_address: String,
    pub function_selector: String,
    pub parameter: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerConstantResponse {
    #[serde(default)]
    pub constant_result: Vec<String>,
    #[serde(default)]
    pub result: TriggerResult,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerResult {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub at: i64,
    #[serde(default)]
    pub page_size: usize,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Trc20TransfersResponse {
    #[serde(default)]
    pub data: Vec<Trc20TransferRow>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Trc20TransferRow {
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub token_info: TokenInfo,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub decimals: u32,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountTransactionsResponse {
    #[serde(default)]
    pub data: Vec<AccountTransactionRow>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountTransactionRow {
    #[serde(rename = "txID", default)]
    pub tx_id: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: i64,
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub net_fee: i64,
    #[serde(default)]
    pub energy_fee: i64,
    #[serde(default)]
    pub ret: Vec<TxRet>,
    #[serde(default)]
    pub raw_data: TxRawData,
    #[serde(default)]
    pub internal_transactions: Vec<InternalTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InternalTransaction {
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
}

/// Error envelope the gateway returns with HTTP 403 when a key is throttled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(rename = "Success", default)]
    pub success: bool,
    #[serde(rename = "Error", default)]
    pub error: String,
    #[serde(rename = "StatusCode", default)]
    pub status_code: u16,
}
