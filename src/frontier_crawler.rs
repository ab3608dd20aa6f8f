//! # Frontier Crawler
//!
//! Level-by-level expansion of seed addresses into their transitive counterparts.
//!
//! Each level runs as a pool of workers bounded by a semaphore; the next level only
//! starts once every worker of the current level has finished. The visited set is a
//! check-and-set under the crawl mutex, so an address is fetched at most once per
//! crawl even when it shows up in several workers' results.

use crate::address::normalize_address;
use crate::chain_client::ChainApi;
use crate::error::ChainError;
use crate::settings;
use crate::store::AddressSink;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FrontierConfig {
    pub max_depth: usize,
    pub max_addresses_per_level: usize,
    pub concurrency: usize,
    /// Account-transaction pages fetched per address; 0 means no cap.
    pub max_pages_per_address: usize,
}

impl From<&settings::Crawler> for FrontierConfig {
    fn from(cfg: &settings::Crawler) -> Self {
        Self {
            max_depth: cfg.max_depth,
            max_addresses_per_level: cfg.max_addresses_per_level,
            concurrency: cfg.concurrency.max(1),
            max_pages_per_address: cfg.max_pages_per_address,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub depth: usize,
    pub frontier: usize,
    pub processed: u64,
    /// Already visited earlier in the crawl.
    pub skipped: u64,
    pub failed: u64,
    pub discovered: u64,
    pub inserted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub levels: Vec<LevelStats>,
    pub total_processed: u64,
    pub total_inserted: u64,
    pub visited: usize,
    pub cancelled: bool,
}

/// Guarded by the crawl mutex: visited set plus counters.
#[derive(Default)]
struct CrawlState {
    visited: HashSet<String>,
    level: LevelStats,
    total_processed: u64,
    total_inserted: u64,
}

struct Shared {
    chain: Arc<dyn ChainApi>,
    sink: Arc<dyn AddressSink>,
    cfg: FrontierConfig,
    state: Mutex<CrawlState>,
}

pub struct FrontierCrawler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl FrontierCrawler {
    pub fn new(
        chain: Arc<dyn ChainApi>,
        sink: Arc<dyn AddressSink>,
        cfg: FrontierConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                sink,
                cfg,
                state: Mutex::new(CrawlState::default()),
            }),
            cancel,
        }
    }

    /// Crawls from `seeds` until the depth limit or an empty frontier.
    pub async fn crawl(&self, seeds: Vec<String>) -> CrawlReport {
        let cfg = &self.shared.cfg;
        let semaphore = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
        let mut report = CrawlReport::default();
        *self.shared.state.lock().await = CrawlState::default();

        let mut frontier = cap_level(dedup(normalize_all(seeds)), cfg.max_addresses_per_level);
        info!(
            "🚀 Frontier crawl started: {} seed(s), max_depth={}, per-level cap={}, sink={}",
            frontier.len(),
            cfg.max_depth,
            cfg.max_addresses_per_level,
            self.shared.sink.name()
        );

        for depth in 0..cfg.max_depth {
            if frontier.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            {
                let mut state = self.shared.state.lock().await;
                state.level = LevelStats {
                    depth,
                    frontier: frontier.len(),
                    ..LevelStats::default()
                };
            }

            let next = Arc::new(Mutex::new(Vec::new()));
            let expand = depth + 1 < cfg.max_depth;
            let mut workers = JoinSet::new();

            for address in frontier.drain(..) {
                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    permit = semaphore.clone().acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    report.cancelled = true;
                    break;
                };

                let shared = Arc::clone(&self.shared);
                let next = Arc::clone(&next);
                workers.spawn(async move {
                    let _permit = permit;
                    process_address(&shared, address, expand.then_some(&next)).await;
                });
            }

            // barrier: every worker of this level finishes before the next starts
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("⚠️ crawl worker panicked: {}", e);
                }
            }

            let stats = self.shared.state.lock().await.level.clone();
            info!(
                "✅ Level {} done: frontier={} processed={} skipped={} failed={} discovered={} inserted={}",
                stats.depth,
                stats.frontier,
                stats.processed,
                stats.skipped,
                stats.failed,
                stats.discovered,
                stats.inserted
            );
            report.levels.push(stats);

            if report.cancelled {
                break;
            }
            let candidates = std::mem::take(&mut *next.lock().await);
            frontier = cap_level(dedup(candidates), cfg.max_addresses_per_level);
        }

        let state = self.shared.state.lock().await;
        report.total_processed = state.total_processed;
        report.total_inserted = state.total_inserted;
        report.visited = state.visited.len();
        info!(
            "🏁 Frontier crawl finished: levels={} processed={} inserted={} visited={}",
            report.levels.len(),
            report.total_processed,
            report.total_inserted,
            report.visited
        );
        report
    }
}

async fn process_address(shared: &Shared, address: String, next: Option<&Arc<Mutex<Vec<String>>>>) {
    {
        let mut state = shared.state.lock().await;
        if !state.visited.insert(address.clone()) {
            state.level.skipped += 1;
            return;
        }
    }

    let discovered = match discover_counterparts(shared, &address).await {
        Ok(found) => found,
        Err(e) => {
            warn!("⚠️ Skipping {}: fetch failed: {}", address, e);
            shared.state.lock().await.level.failed += 1;
            return;
        }
    };

    let inserted = match shared.sink.insert_discovered(&address, &discovered).await {
        Ok(n) => n,
        Err(e) => {
            warn!("⚠️ Skipping {}: persisting {} address(es) failed: {}", address, discovered.len(), e);
            shared.state.lock().await.level.failed += 1;
            return;
        }
    };

    {
        let mut state = shared.state.lock().await;
        state.level.processed += 1;
        state.level.discovered += discovered.len() as u64;
        state.level.inserted += inserted;
        state.total_processed += 1;
        state.total_inserted += inserted;
    }
    debug!("{}: {} counterpart(s), {} new", address, discovered.len(), inserted);

    if let Some(next) = next {
        next.lock().await.extend(discovered);
    }
}

/// Every party referenced by the address's transactions, normalised and deduplicated.
async fn discover_counterparts(shared: &Shared, address: &str) -> Result<Vec<String>, ChainError> {
    let max_pages = shared.cfg.max_pages_per_address;
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = shared
            .chain
            .fetch_account_transactions(address, cursor.as_deref())
            .await?;
        pages += 1;
        let empty = page.items.is_empty();

        for tx in page.items {
            for party in tx.parties {
                match normalize_address(&party) {
                    Ok(normalized) if normalized != address => {
                        if seen.insert(normalized.clone()) {
                            found.push(normalized);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("dropping unparseable address {} in {}: {}", party, tx.tx_id, e),
                }
            }
        }

        if empty || (max_pages > 0 && pages >= max_pages) {
            break;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(found)
}

fn normalize_all(addresses: Vec<String>) -> Vec<String> {
    addresses
        .into_iter()
        .filter_map(|a| match normalize_address(&a) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                warn!("⚠️ Ignoring invalid seed {}: {}", a, e);
                None
            }
        })
        .collect()
}

/// Order-preserving dedup.
pub(crate) fn dedup(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(addresses.len());
    addresses.into_iter().filter(|a| seen.insert(a.clone())).collect()
}

pub(crate) fn cap_level(mut addresses: Vec<String>, cap: usize) -> Vec<String> {
    if addresses.len() > cap {
        info!("Frontier truncated from {} to {} address(es)", addresses.len(), cap);
        addresses.truncate(cap);
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TronAddress;
    use crate::error::StoreError;
    use crate::types::chain::{BlockResponse, TransactionInfoResponse, TransactionResponse};
    use crate::types::{AccountTransaction, Page, Transfer, TransferFilter};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn addr(n: u8) -> String {
        let mut raw = [0u8; 21];
        raw[0] = 0x41;
        raw[20] = n;
        TronAddress::from_bytes(&raw).unwrap().to_base58()
    }

    /// In-memory graph: address -> counterparts, plus a log of fetched addresses.
    ///
    /// With `delay` set every fetch sleeps while counted as in flight; the
    /// `cancel_at`-th fetch cancels `cancel`, and sleeping fetches observe it.
    #[derive(Default)]
    struct GraphChain {
        edges: HashMap<String, Vec<String>>,
        failing: HashSet<String>,
        fetched: StdMutex<Vec<String>>,
        delay: Option<Duration>,
        cancel: CancellationToken,
        cancel_at: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GraphChain {
        async fn pause(&self, call: usize) -> Result<(), ChainError> {
            if call == self.cancel_at {
                self.cancel.cancel();
            }
            let Some(delay) = self.delay else {
                return Ok(());
            };
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => Err(ChainError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    #[async_trait]
    impl ChainApi for GraphChain {
        async fn fetch_latest_block(&self) -> Result<BlockResponse, ChainError> {
            Ok(BlockResponse::default())
        }
        async fn fetch_transaction(&self, _: &str) -> Result<TransactionResponse, ChainError> {
            Ok(TransactionResponse::default())
        }
        async fn fetch_transaction_info(&self, _: &str) -> Result<TransactionInfoResponse, ChainError> {
            Ok(TransactionInfoResponse::default())
        }
        async fn fetch_token_balance(&self, _: &str, _: &str) -> Result<Decimal, ChainError> {
            Ok(Decimal::ZERO)
        }
        async fn fetch_transfer_history(
            &self,
            _: &str,
            _: &TransferFilter,
            _: Option<&str>,
        ) -> Result<Page<Transfer>, ChainError> {
            Ok(Page::empty())
        }
        async fn fetch_account_transactions(
            &self,
            address: &str,
            _cursor: Option<&str>,
        ) -> Result<Page<AccountTransaction>, ChainError> {
            let call = {
                let mut fetched = self.fetched.lock().unwrap();
                fetched.push(address.to_string());
                fetched.len()
            };
            self.pause(call).await?;
            if self.failing.contains(address) {
                return Err(ChainError::Timeout);
            }
            let parties = self.edges.get(address).cloned().unwrap_or_default();
            let mut with_self = vec![address.to_string()];
            with_self.extend(parties);
            Ok(Page {
                items: vec![AccountTransaction {
                    tx_id: format!("tx-{}", address),
                    parties: with_self,
                    ..AccountTransaction::default()
                }],
                next_cursor: None,
            })
        }
    }

    #[derive(Default)]
    struct MemorySink {
        rows: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl AddressSink for MemorySink {
        async fn insert_discovered(&self, _: &str, addresses: &[String]) -> Result<u64, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            Ok(addresses.iter().filter(|a| rows.insert((*a).clone())).count() as u64)
        }
        fn name(&self) -> &'static str {
            "memory"
        }
    }

    fn config(max_depth: usize, cap: usize) -> FrontierConfig {
        FrontierConfig {
            max_depth,
            max_addresses_per_level: cap,
            concurrency: 4,
            max_pages_per_address: 10,
        }
    }

    #[tokio::test]
    async fn cyclic_graph_visits_each_address_once() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut chain = GraphChain::default();
        chain.edges.insert(a.clone(), vec![b.clone(), c.clone()]);
        chain.edges.insert(b.clone(), vec![a.clone(), c.clone()]);
        chain.edges.insert(c.clone(), vec![a.clone(), b.clone()]);
        let chain = Arc::new(chain);
        let sink = Arc::new(MemorySink::default());

        let crawler = FrontierCrawler::new(chain.clone(), sink.clone(), config(10, 100), CancellationToken::new());
        let report = crawler.crawl(vec![a.clone()]).await;

        let fetched = chain.fetched.lock().unwrap().clone();
        let unique: HashSet<_> = fetched.iter().cloned().collect();
        assert_eq!(fetched.len(), unique.len());
        assert_eq!(unique.len(), 3);
        assert_eq!(report.visited, 3);
        assert_eq!(report.total_processed, 3);
        assert_eq!(report.total_inserted, 3);
        assert_eq!(report.levels[0].inserted, 2);
        assert!(report.levels[2].skipped > 0);
    }

    #[tokio::test]
    async fn next_level_never_exceeds_cap() {
        let seed = addr(1);
        let children: Vec<String> = (10..40).map(addr).collect();
        let mut chain = GraphChain::default();
        chain.edges.insert(seed.clone(), children.clone());
        let chain = Arc::new(chain);

        let crawler = FrontierCrawler::new(
            chain.clone(),
            Arc::new(MemorySink::default()),
            config(3, 5),
            CancellationToken::new(),
        );
        let report = crawler.crawl(vec![seed]).await;

        assert_eq!(report.levels[0].discovered, 30);
        assert_eq!(report.levels[1].frontier, 5);
        assert!(report.levels.iter().all(|l| l.frontier <= 5));
        // level 1 only contains addresses discovered at level 0
        let fetched = chain.fetched.lock().unwrap().clone();
        assert!(fetched[1..].iter().all(|a| children.contains(a)));
    }

    #[tokio::test]
    async fn failing_address_is_skipped_not_fatal() {
        let (a, b, c, d) = (addr(1), addr(2), addr(3), addr(4));
        let mut chain = GraphChain::default();
        chain.edges.insert(a.clone(), vec![b.clone(), c.clone()]);
        chain.edges.insert(b.clone(), vec![d.clone()]);
        chain.edges.insert(c.clone(), vec![d.clone()]);
        chain.failing.insert(b.clone());
        let chain = Arc::new(chain);

        let crawler = FrontierCrawler::new(
            chain.clone(),
            Arc::new(MemorySink::default()),
            config(5, 100),
            CancellationToken::new(),
        );
        let report = crawler.crawl(vec![a]).await;

        assert_eq!(report.levels[1].failed, 1);
        assert_eq!(report.levels[1].processed, 1);
        assert!(chain.fetched.lock().unwrap().contains(&d));
    }

    #[tokio::test]
    async fn depth_limit_stops_expansion() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut chain = GraphChain::default();
        chain.edges.insert(a.clone(), vec![b.clone()]);
        chain.edges.insert(b.clone(), vec![c.clone()]);
        let chain = Arc::new(chain);

        let crawler = FrontierCrawler::new(
            chain.clone(),
            Arc::new(MemorySink::default()),
            config(2, 100),
            CancellationToken::new(),
        );
        let report = crawler.crawl(vec![a]).await;

        assert_eq!(report.levels.len(), 2);
        assert!(!chain.fetched.lock().unwrap().contains(&c));
        assert_eq!(report.total_inserted, 2);
    }

    #[tokio::test]
    async fn cancelled_crawl_does_no_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chain = Arc::new(GraphChain::default());
        let crawler = FrontierCrawler::new(chain.clone(), Arc::new(MemorySink::default()), config(5, 10), cancel);

        let report = crawler.crawl(vec![addr(1)]).await;
        assert!(report.cancelled);
        assert!(chain.fetched.lock().unwrap().is_empty());
    }

    /// Seed fanning out to `children`, each of which has one further counterpart.
    fn fan_out(children: u8, delay: Duration) -> (String, Vec<String>, GraphChain) {
        let seed = addr(1);
        let kids: Vec<String> = (0..children).map(|i| addr(10 + i)).collect();
        let mut chain = GraphChain {
            delay: Some(delay),
            ..GraphChain::default()
        };
        chain.edges.insert(seed.clone(), kids.clone());
        for (i, kid) in kids.iter().enumerate() {
            chain.edges.insert(kid.clone(), vec![addr(100 + i as u8)]);
        }
        (seed, kids, chain)
    }

    #[tokio::test(start_paused = true)]
    async fn workers_in_flight_never_exceed_concurrency() {
        let (seed, _, chain) = fan_out(30, Duration::from_millis(50));
        let chain = Arc::new(chain);
        let mut cfg = config(2, 100);
        cfg.concurrency = 4;

        let crawler = FrontierCrawler::new(chain.clone(), Arc::new(MemorySink::default()), cfg, CancellationToken::new());
        let report = crawler.crawl(vec![seed]).await;

        assert_eq!(report.levels[1].processed, 30);
        assert_eq!(chain.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_level_stops_crawl_and_keeps_persisted_rows() {
        let (seed, kids, mut chain) = fan_out(30, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        chain.cancel = cancel.clone();
        // seed, four children, then the sixth fetch cancels
        chain.cancel_at = 6;
        let chain = Arc::new(chain);
        let sink = Arc::new(MemorySink::default());
        let mut cfg = config(5, 100);
        cfg.concurrency = 4;

        let crawler = FrontierCrawler::new(chain.clone(), sink.clone(), cfg, cancel);
        let report = crawler.crawl(vec![seed]).await;

        assert!(report.cancelled);
        assert_eq!(report.levels.len(), 2);
        assert!(report.levels[1].processed < 30);
        assert!(report.levels[1].failed >= 1);
        assert!(chain.fetched.lock().unwrap().len() < 31);
        let rows = sink.rows.lock().unwrap();
        assert!(kids.iter().all(|k| rows.contains(k)));
    }

    #[test]
    fn dedup_and_cap_preserve_order() {
        let list = vec!["b".to_string(), "a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(cap_level(dedup(list), 2), vec!["b".to_string(), "a".to_string()]);
    }
}
