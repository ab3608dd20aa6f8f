//! # Balance Refresh Pipeline
//!
//! Paged producer -> bounded fetch workers -> channel -> batching writer.
//!
//! Pages are read sequentially but processed concurrently (at most
//! `max_pages_in_flight` at a time). Every page fans its addresses out to workers
//! bounded by a shared `concurrency` semaphore. Results flow through one bounded
//! channel whose capacity is the backpressure point, and a single writer task
//! upserts them in batches of `batch_size`.

use crate::chain_client::ChainApi;
use crate::error::ChainError;
use crate::settings;
use crate::store::BalanceStore;
use crate::types::BalanceUpdate;
use anyhow::Result;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BalanceConfig {
    pub token_contract: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub page_size: usize,
    pub max_pages_in_flight: usize,
}

impl BalanceConfig {
    pub fn from_settings(balance: &settings::Balance, token: &settings::Token) -> Self {
        Self {
            token_contract: token.contract.clone(),
            concurrency: balance.concurrency.max(1),
            batch_size: balance.batch_size.max(1),
            page_size: balance.page_size.max(1),
            max_pages_in_flight: balance.max_pages_in_flight.max(1),
        }
    }
}

/// One lookup result travelling from a fetch worker to the writer.
#[derive(Debug)]
struct BalanceResult {
    address: String,
    balance: Result<Decimal, ChainError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub total: u64,
    pub pages: u64,
    pub fetched: u64,
    pub failed: u64,
    pub saved: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct WriterStats {
    fetched: u64,
    failed: u64,
    saved: u64,
    flushes: u64,
    failed_flushes: u64,
}

pub struct BalanceRefresher {
    chain: Arc<dyn ChainApi>,
    store: Arc<dyn BalanceStore>,
    cfg: BalanceConfig,
    cancel: CancellationToken,
}

impl BalanceRefresher {
    pub fn new(
        chain: Arc<dyn ChainApi>,
        store: Arc<dyn BalanceStore>,
        cfg: BalanceConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            store,
            cfg,
            cancel,
        }
    }

    /// Refreshes a single address immediately, bypassing the batching writer.
    pub async fn refresh_one(&self, address: &str) -> Result<Decimal> {
        let balance = self
            .chain
            .fetch_token_balance(address, &self.cfg.token_contract)
            .await?;
        self.store
            .save_balances(&[BalanceUpdate {
                address: address.to_string(),
                balance,
            }])
            .await?;
        info!("✅ Balance of {} refreshed: {}", address, balance);
        Ok(balance)
    }

    /// Refreshes every address of the source table.
    pub async fn run(&self) -> Result<RefreshReport> {
        let total = self.store.count_addresses().await?;
        let mut report = RefreshReport {
            total: total.max(0) as u64,
            ..RefreshReport::default()
        };
        info!(
            "🚀 Balance refresh started: {} address(es), page_size={}, concurrency={}, batch_size={}",
            total, self.cfg.page_size, self.cfg.concurrency, self.cfg.batch_size
        );

        let (tx, rx) = mpsc::channel::<BalanceResult>(self.cfg.concurrency * 2);
        let writer = tokio::spawn(write_batches(
            Arc::clone(&self.store),
            rx,
            self.cfg.batch_size,
        ));

        let pages_in_flight = Arc::new(Semaphore::new(self.cfg.max_pages_in_flight));
        let workers = Arc::new(Semaphore::new(self.cfg.concurrency));
        let mut pages = JoinSet::new();
        let mut offset: i64 = 0;

        loop {
            let Some(page_permit) = self.acquire(&pages_in_flight).await else {
                report.cancelled = true;
                break;
            };

            let addresses = match self
                .store
                .load_address_page(offset, self.cfg.page_size as i64)
                .await
            {
                Ok(addresses) => addresses,
                Err(e) => {
                    error!("❌ Failed to load address page at offset {}: {}", offset, e);
                    break;
                }
            };
            if addresses.is_empty() {
                break;
            }
            let last_page = addresses.len() < self.cfg.page_size;
            report.pages += 1;
            offset += addresses.len() as i64;
            debug!("page {} loaded: {} address(es)", report.pages, addresses.len());

            pages.spawn(process_page(
                Arc::clone(&self.chain),
                self.cfg.token_contract.clone(),
                addresses,
                Arc::clone(&workers),
                tx.clone(),
                self.cancel.clone(),
                page_permit,
            ));

            if last_page {
                break;
            }
        }

        while let Some(joined) = pages.join_next().await {
            if let Err(e) = joined {
                warn!("⚠️ balance page task panicked: {}", e);
            }
        }
        // writer exits once every sender is gone
        drop(tx);
        let stats = writer.await?;

        report.fetched = stats.fetched;
        report.failed = stats.failed;
        report.saved = stats.saved;
        report.flushes = stats.flushes;
        report.failed_flushes = stats.failed_flushes;
        report.cancelled |= self.cancel.is_cancelled();
        info!(
            "🏁 Balance refresh finished: pages={} fetched={} failed={} saved={} flushes={}",
            report.pages, report.fetched, report.failed, report.saved, report.flushes
        );
        Ok(report)
    }

    async fn acquire(&self, semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        }
    }
}

async fn process_page(
    chain: Arc<dyn ChainApi>,
    contract: String,
    addresses: Vec<String>,
    workers: Arc<Semaphore>,
    tx: mpsc::Sender<BalanceResult>,
    cancel: CancellationToken,
    _page_permit: OwnedSemaphorePermit,
) {
    let mut fetches = JoinSet::new();
    for address in addresses {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = workers.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else { break };

        let chain = Arc::clone(&chain);
        let contract = contract.clone();
        let tx = tx.clone();
        fetches.spawn(async move {
            let _permit = permit;
            let balance = chain.fetch_token_balance(&address, &contract).await;
            // blocks while the writer lags
            if tx.send(BalanceResult { address, balance }).await.is_err() {
                warn!("⚠️ balance writer gone, dropping result");
            }
        });
    }
    while fetches.join_next().await.is_some() {}
}

async fn write_batches(
    store: Arc<dyn BalanceStore>,
    mut rx: mpsc::Receiver<BalanceResult>,
    batch_size: usize,
) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(result) = rx.recv().await {
        match result.balance {
            Ok(balance) => {
                stats.fetched += 1;
                debug!("{} -> {}", result.address, balance);
                batch.push(BalanceUpdate {
                    address: result.address,
                    balance,
                });
                if batch.len() >= batch_size {
                    flush(store.as_ref(), &mut batch, &mut stats).await;
                }
            }
            Err(e) => {
                stats.failed += 1;
                warn!("⚠️ Balance lookup for {} failed: {}", result.address, e);
            }
        }
    }
    flush(store.as_ref(), &mut batch, &mut stats).await;
    stats
}

async fn flush(store: &dyn BalanceStore, batch: &mut Vec<BalanceUpdate>, stats: &mut WriterStats) {
    if batch.is_empty() {
        return;
    }
    let size = batch.len();
    match store.save_balances(batch).await {
        Ok(written) => {
            stats.flushes += 1;
            stats.saved += size as u64;
            info!("✅ Flushed {} balance update(s) ({} row(s) written)", size, written);
        }
        Err(e) => {
            stats.failed_flushes += 1;
            error!("❌ Dropping batch of {} balance update(s): {}", size, e);
        }
    }
    batch.clear();
}
