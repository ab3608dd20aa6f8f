//! # Chain Client
//!
//! Single gateway to the TRON HTTP API. Every request passes through the shared
//! [`RateGate`]; a `403` carrying the gateway's "frequency limit ... suspended for Ns"
//! message degrades the gate, sleeps the suspension out and resends the identical
//! request once.
//!
//! The [`ChainApi`] trait is what the crawlers and the balance pipeline consume, so
//! they can be driven by in-memory fakes in tests.

use crate::address::TronAddress;
use crate::error::ChainError;
use crate::rate_limiter::RateGate;
use crate::settings::{Api, Token, MAX_PAGE_SIZE};
use crate::types::chain::{
    AccountTransactionsResponse, ApiErrorResponse, BlockResponse, TransactionInfoResponse,
    TransactionResponse, Trc20TransfersResponse, TriggerConstantRequest, TriggerConstantResponse,
};
use crate::types::conversions::{effective_decimals, hex_to_decimal, raw_to_decimal};
use crate::types::{AccountTransaction, Page, Transfer, TransferFilter};
use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::{self, Token as AbiToken};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
const BALANCE_OF_SELECTOR: &str = "balanceOf(address)";
const THROTTLE_MARKER: &str = "frequency limit";
const SUSPEND_MARKER: &str = "suspended for ";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Transport-level request: path relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one request and returns the raw status and body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ChainError>;
}

/// `reqwest`-backed transport with the optional API-key header.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(cfg: &Api) -> Result<Self> {
        let base_url = Url::parse(cfg.base_url.trim_end_matches('/'))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChainError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| ChainError::Transport(format!("invalid URL {}: {}", joined, e)))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ChainError> {
        let url = self.endpoint(&request.path)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .header("Accept", "application/json");

        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Read-only chain queries used by the crawlers and the balance pipeline.
#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn fetch_latest_block(&self) -> Result<BlockResponse, ChainError>;

    async fn fetch_transaction(&self, tx_id: &str) -> Result<TransactionResponse, ChainError>;

    async fn fetch_transaction_info(&self, tx_id: &str)
        -> Result<TransactionInfoResponse, ChainError>;

    async fn fetch_token_balance(&self, address: &str, contract: &str)
        -> Result<Decimal, ChainError>;

    /// One page of TRC20 transfer history starting at `cursor`.
    async fn fetch_transfer_history(
        &self,
        address: &str,
        filter: &TransferFilter,
        cursor: Option<&str>,
    ) -> Result<Page<Transfer>, ChainError>;

    /// One page of account-level transactions (any contract type) starting at `cursor`.
    async fn fetch_account_transactions(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<Page<AccountTransaction>, ChainError>;

    fn page_size(&self) -> usize {
        MAX_PAGE_SIZE
    }

    /// Follows fingerprint cursors until the server runs dry, a short page
    /// arrives, or `filter.limit` records have been collected.
    async fn collect_transfers(
        &self,
        address: &str,
        filter: &TransferFilter,
    ) -> Result<Vec<Transfer>, ChainError> {
        let page_size = self.page_size().clamp(1, MAX_PAGE_SIZE);
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let remaining = match filter.limit {
                Some(limit) if collected.len() >= limit => break,
                Some(limit) => limit - collected.len(),
                None => usize::MAX,
            };
            let requested = page_size.min(remaining);
            let page_filter = TransferFilter {
                limit: Some(requested),
                ..filter.clone()
            };

            let page = self
                .fetch_transfer_history(address, &page_filter, cursor.as_deref())
                .await?;
            let short_page = page.items.len() < requested;
            collected.extend(page.items.into_iter().take(remaining));

            match page.next_cursor {
                Some(next) if !short_page && !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(collected)
    }

    async fn fetch_transaction_count(
        &self,
        address: &str,
        filter: &TransferFilter,
    ) -> Result<u64, ChainError> {
        Ok(self.collect_transfers(address, filter).await?.len() as u64)
    }
}

/// Rate-limited TRON API client.
pub struct ChainClient {
    transport: Arc<dyn HttpTransport>,
    gate: Arc<RateGate>,
    token_decimals: u32,
    page_size: usize,
    api_key_hint: String,
    cancel: CancellationToken,
}

impl ChainClient {
    pub fn new(cfg: &Api, token: &Token, cancel: CancellationToken) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(cfg)?);
        let gate = Arc::new(RateGate::from_settings(&cfg.rate_limit));
        Ok(Self::with_transport(transport, gate, cfg, token, cancel))
    }

    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        gate: Arc<RateGate>,
        cfg: &Api,
        token: &Token,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            gate,
            token_decimals: effective_decimals(token.decimals),
            page_size: cfg.effective_page_size(),
            api_key_hint: mask_api_key(cfg.api_key.as_deref().unwrap_or_default()),
            cancel,
        }
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    async fn send_cancellable(&self, request: &ApiRequest) -> Result<ApiResponse, ChainError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChainError::Cancelled),
            response = self.transport.send(request) => response,
        }
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, ChainError> {
        self.gate.acquire(&self.cancel).await?;
        let mut response = self.send_cancellable(request).await?;

        if let Some(suspend_secs) = throttle_suspension(&response) {
            warn!(
                "⚠️ API key [{}] throttled on {}, suspended for {}s",
                self.api_key_hint, request.path, suspend_secs
            );
            {
                let _throttle = self.gate.begin_throttle();
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(ChainError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(suspend_secs)) => {}
                }
            }

            self.gate.acquire(&self.cancel).await?;
            response = self.send_cancellable(request).await?;
            if let Some(again) = throttle_suspension(&response) {
                return Err(ChainError::Throttled { suspend_secs: again });
            }
        }

        if !(200..300).contains(&response.status) {
            return Err(ChainError::Http {
                status: response.status,
                body: truncate(&response.body, MAX_ERROR_BODY),
            });
        }
        Ok(response.body)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ChainError> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            ChainError::Decode(format!("{} ({})", e, truncate(&body, MAX_ERROR_BODY)))
        })
    }
}

#[async_trait]
impl ChainApi for ChainClient {
    async fn fetch_latest_block(&self) -> Result<BlockResponse, ChainError> {
        let request = ApiRequest::post("/wallet/getnowblock", json!({}));
        let block: BlockResponse = self.execute_json(&request).await?;
        if block.block_id.is_empty() {
            return Err(ChainError::domain("latest block response carried no blockID"));
        }
        Ok(block)
    }

    async fn fetch_transaction(&self, tx_id: &str) -> Result<TransactionResponse, ChainError> {
        let request = ApiRequest::post("/wallet/gettransactionbyid", json!({ "value": tx_id }));
        let tx: TransactionResponse = self.execute_json(&request).await?;
        if tx.tx_id.is_empty() {
            return Err(ChainError::domain(format!("transaction {} not found", tx_id)));
        }
        Ok(tx)
    }

    async fn fetch_transaction_info(
        &self,
        tx_id: &str,
    ) -> Result<TransactionInfoResponse, ChainError> {
        let request =
            ApiRequest::post("/wallet/gettransactioninfobyid", json!({ "value": tx_id }));
        let info: TransactionInfoResponse = self.execute_json(&request).await?;
        if info.id.is_empty() {
            return Err(ChainError::domain(format!("transaction info {} not found", tx_id)));
        }
        Ok(info)
    }

    async fn fetch_token_balance(
        &self,
        address: &str,
        contract: &str,
    ) -> Result<Decimal, ChainError> {
        let owner = TronAddress::parse(address)?;
        let contract = TronAddress::parse(contract)?;
        let parameter = abi::encode(&[AbiToken::Address(ethers::types::Address::from_slice(
            &owner.as_bytes()[1..],
        ))]);

        let body = TriggerConstantRequest {
            owner_address: owner.to_hex(),
            contract_address: contract.to_hex(),
            function_selector: BALANCE_OF_SELECTOR.to_string(),
            parameter: hex::encode(parameter),
        };
        let request = ApiRequest::post(
            "/wallet/triggerconstantcontract",
            serde_json::to_value(&body)?,
        );
        let response: TriggerConstantResponse = self.execute_json(&request).await?;

        if !response.message.is_empty() {
            return Err(ChainError::domain(decode_server_message(&response.message)));
        }
        if !response.result.result {
            let message = if response.result.message.is_empty() {
                "constant contract call was not successful".to_string()
            } else {
                decode_server_message(&response.result.message)
            };
            return Err(ChainError::domain(message));
        }
        let word = response
            .constant_result
            .first()
            .ok_or_else(|| ChainError::domain("constant call returned no result"))?;

        let balance = hex_to_decimal(word, self.token_decimals)?;
        debug!("balance {} = {}", address, balance);
        Ok(balance)
    }

    async fn fetch_transfer_history(
        &self,
        address: &str,
        filter: &TransferFilter,
        cursor: Option<&str>,
    ) -> Result<Page<Transfer>, ChainError> {
        let limit = filter
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);
        let mut request = ApiRequest::get(format!("/v1/accounts/{}/transactions/trc20", address))
            .param("limit", limit);
        if let Some(contract) = &filter.contract {
            request = request.param("contract_address", contract);
        }
        if let Some(min) = filter.min_timestamp {
            request = request.param("min_timestamp", min);
        }
        if let Some(max) = filter.max_timestamp {
            request = request.param("max_timestamp", max);
        }
        if filter.only_to {
            request = request.param("only_to", true);
        }
        if filter.only_from {
            request = request.param("only_from", true);
        }
        if filter.only_confirmed {
            request = request.param("only_confirmed", true);
        }
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            request = request.param("fingerprint", cursor);
        }

        let response: Trc20TransfersResponse = self.execute_json(&request).await?;
        if !response.success {
            return Err(ChainError::domain(
                response
                    .error
                    .unwrap_or_else(|| "transfer history query failed".to_string()),
            ));
        }

        let mut items = Vec::with_capacity(response.data.len());
        for row in response.data {
            let decimals = effective_decimals(row.token_info.decimals);
            let amount = raw_to_decimal(&row.value, decimals)?;
            items.push(Transfer {
                tx_id: row.transaction_id,
                block_number: 0,
                block_timestamp: row.block_timestamp,
                from: row.from,
                to: row.to,
                amount,
                contract_address: row.token_info.address,
                // the indexed endpoint lists confirmed rows unless asked otherwise
                confirmed: true,
                fee: Decimal::ZERO,
            });
        }

        Ok(Page {
            items,
            next_cursor: response.meta.fingerprint.filter(|f| !f.is_empty()),
        })
    }

    async fn fetch_account_transactions(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<Page<AccountTransaction>, ChainError> {
        let mut request = ApiRequest::get(format!("/v1/accounts/{}/transactions", address))
            .param("limit", self.page_size);
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            request = request.param("fingerprint", cursor);
        }

        let response: AccountTransactionsResponse = self.execute_json(&request).await?;
        if !response.success {
            return Err(ChainError::domain(
                response
                    .error
                    .unwrap_or_else(|| "account transaction query failed".to_string()),
            ));
        }

        let items = response
            .data
            .into_iter()
            .map(|row| {
                let mut parties = Vec::new();
                let mut contract_type = String::new();
                if let Some(contract) = row.raw_data.contract.first() {
                    contract_type = contract.contract_type.clone();
                    let value = &contract.parameter.value;
                    parties.push(value.owner_address.clone());
                    parties.push(value.to_address.clone());
                }
                for internal in &row.internal_transactions {
                    parties.push(internal.from_address.clone());
                    parties.push(internal.to_address.clone());
                }
                parties.retain(|p| !p.is_empty());

                AccountTransaction {
                    tx_id: row.tx_id,
                    block_number: row.block_number,
                    block_timestamp: row.block_timestamp,
                    contract_type,
                    parties,
                }
            })
            .collect();

        Ok(Page {
            items,
            next_cursor: response.meta.fingerprint.filter(|f| !f.is_empty()),
        })
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Seconds to wait when `response` is the gateway's frequency-limit 403.
pub fn throttle_suspension(response: &ApiResponse) -> Option<u64> {
    if response.status != 403 {
        return None;
    }
    let message = serde_json::from_str::<ApiErrorResponse>(&response.body)
        .map(|e| e.error)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| response.body.clone());

    if !message.contains(THROTTLE_MARKER) {
        return None;
    }
    let start = message.find(SUSPEND_MARKER)? + SUSPEND_MARKER.len();
    let digits: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().ok().filter(|secs| *secs > 0)
}

/// `abcd...wxyz` for keys longer than eight characters.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

// full nodes hex-encode revert messages
fn decode_server_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|text| text.chars().all(|c| !c.is_control() || c.is_whitespace()))
        .unwrap_or_else(|| message.to_string())
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
