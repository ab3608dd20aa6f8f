//! # Activity-Pattern Crawler
//!
//! Feature-gated variant of the frontier crawl. An address expands only when its
//! token balance and transfer count fall inside the level's bounds and it has at
//! least one frequent outbound counterpart. Each qualifying counterpart yields an
//! [`Order`] and becomes part of the next level.

use crate::address::{mask_address, normalize_address};
use crate::block_parser::BlockParser;
use crate::chain_client::ChainApi;
use crate::error::ChainError;
use crate::frontier_crawler::{cap_level, dedup};
use crate::settings::{self, ThresholdPolicyKind};
use crate::store::ActivityStore;
use crate::types::{ActiveAddressRecord, FrequentOutAddress, Order, Transfer, TransferFilter};
use chrono::{DateTime, Duration, Local, Utc};
use log::{debug, error, info, warn};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(6).normalize()
}

/// How balance and transfer-count bounds evolve with crawl depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdPolicy {
    Fixed,
    /// Bounds multiplied by `growth^depth`.
    DepthScaled { growth: f64 },
}

impl ThresholdPolicy {
    pub fn factor(&self, depth: usize) -> f64 {
        match self {
            ThresholdPolicy::Fixed => 1.0,
            ThresholdPolicy::DepthScaled { growth } => growth.powi(depth.min(i32::MAX as usize) as i32),
        }
    }
}

/// Inclusive bounds an address must satisfy at one depth.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelGate {
    pub min_balance: Decimal,
    pub max_balance: Decimal,
    pub min_tx_count: u64,
    pub max_tx_count: u64,
}

impl LevelGate {
    pub fn balance_ok(&self, balance: Decimal) -> bool {
        balance >= self.min_balance && balance <= self.max_balance
    }

    pub fn tx_count_ok(&self, count: u64) -> bool {
        count >= self.min_tx_count && count <= self.max_tx_count
    }
}

/// Thresholds of the frequent-counterpart rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequentRule {
    /// A transfer strictly above this is "large".
    pub large_transfer_amount: Decimal,
    pub min_large_transfers: u32,
    pub min_out_transfers: u32,
    pub min_avg_out_amount: Decimal,
    pub max_avg_out_amount: Decimal,
}

impl FrequentRule {
    pub fn qualifies(&self, out_count: u32, large_out_count: u32, avg_out_amount: Decimal) -> bool {
        large_out_count >= self.min_large_transfers
            && out_count >= self.min_out_transfers
            && avg_out_amount >= self.min_avg_out_amount
            && avg_out_amount <= self.max_avg_out_amount
    }
}

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub token_contract: String,
    pub concurrency: usize,
    pub max_depth: usize,
    pub max_addresses_per_level: usize,
    pub lookback_days: i64,
    pub history_limit: usize,
    pub prefix_mask_len: usize,
    pub suffix_mask_len: usize,
    pub min_balance: f64,
    pub max_balance: f64,
    pub min_tx_count: u64,
    pub max_tx_count: u64,
    pub policy: ThresholdPolicy,
    pub frequent: FrequentRule,
    /// Seed window on block transfers.
    pub min_seed_amount: Decimal,
    pub max_seed_amount: Decimal,
}

impl ActivityConfig {
    pub fn from_settings(activity: &settings::Activity, token: &settings::Token) -> Self {
        let policy = match activity.threshold_policy {
            ThresholdPolicyKind::Fixed => ThresholdPolicy::Fixed,
            ThresholdPolicyKind::DepthScaled => ThresholdPolicy::DepthScaled {
                growth: activity.growth_factor,
            },
        };
        Self {
            token_contract: token.contract.clone(),
            concurrency: activity.concurrency.max(1),
            max_depth: activity.max_depth,
            max_addresses_per_level: activity.max_addresses_per_level,
            lookback_days: activity.lookback_days,
            history_limit: activity.history_limit,
            prefix_mask_len: activity.prefix_mask_len,
            suffix_mask_len: activity.suffix_mask_len,
            min_balance: activity.min_balance,
            max_balance: activity.max_balance,
            min_tx_count: activity.min_tx_count,
            max_tx_count: activity.max_tx_count,
            policy,
            frequent: FrequentRule {
                large_transfer_amount: to_decimal(activity.large_transfer_amount),
                min_large_transfers: activity.min_large_transfers,
                min_out_transfers: activity.min_out_transfers,
                min_avg_out_amount: to_decimal(activity.min_avg_out_amount),
                max_avg_out_amount: to_decimal(activity.max_avg_out_amount),
            },
            min_seed_amount: to_decimal(activity.min_tx_amount),
            max_seed_amount: to_decimal(activity.max_tx_amount),
        }
    }

    pub fn gate_at(&self, depth: usize) -> LevelGate {
        let factor = self.policy.factor(depth);
        LevelGate {
            min_balance: to_decimal(self.min_balance * factor),
            max_balance: to_decimal(self.max_balance * factor),
            min_tx_count: (self.min_tx_count as f64 * factor) as u64,
            max_tx_count: (self.max_tx_count as f64 * factor) as u64,
        }
    }
}

/// Aggregates `source`'s outbound transfers per recipient and keeps the
/// recipients that satisfy `rule`, largest total first.
pub fn analyze_frequent_out(
    source: &str,
    transfers: &[Transfer],
    rule: &FrequentRule,
    prefix_len: usize,
    suffix_len: usize,
) -> Vec<FrequentOutAddress> {
    let mut stats: HashMap<&str, FrequentOutAddress> = HashMap::new();

    for transfer in transfers.iter().filter(|t| t.from == source && t.to != source) {
        let when = transfer.timestamp();
        let stat = stats
            .entry(transfer.to.as_str())
            .or_insert_with(|| FrequentOutAddress {
                address: transfer.to.clone(),
                masked_address: mask_address(&transfer.to, prefix_len, suffix_len),
                out_count: 0,
                total_out_amount: Decimal::ZERO,
                avg_out_amount: Decimal::ZERO,
                large_out_count: 0,
                last_tx_time: when,
            });
        stat.out_count += 1;
        stat.total_out_amount += transfer.amount;
        if transfer.amount > rule.large_transfer_amount {
            stat.large_out_count += 1;
        }
        if when > stat.last_tx_time {
            stat.last_tx_time = when;
        }
    }

    let mut frequent: Vec<FrequentOutAddress> = stats
        .into_values()
        .filter_map(|mut stat| {
            stat.avg_out_amount = (stat.total_out_amount / Decimal::from(stat.out_count)).normalize();
            rule.qualifies(stat.out_count, stat.large_out_count, stat.avg_out_amount)
                .then_some(stat)
        })
        .collect();

    frequent.sort_by(|a, b| {
        b.total_out_amount
            .cmp(&a.total_out_amount)
            .then_with(|| a.address.cmp(&b.address))
    });
    frequent
}

/// `YYYYMMDDHHmm` (local time) + last four characters of the counterpart.
pub fn order_id(now: DateTime<Local>, counterpart: &str) -> String {
    let chars: Vec<char> = counterpart.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}{}", now.format("%Y%m%d%H%M"), tail)
}

pub fn build_orders(record: &ActiveAddressRecord, now: DateTime<Local>) -> Vec<Order> {
    record
        .frequent_out_addrs
        .iter()
        .map(|f| Order {
            order_id: order_id(now, &f.address),
            active_address: record.address.clone(),
            frequent_out_addr: f.masked_address.clone(),
            counterpart_address: f.address.clone(),
            last_tx_time: f.last_tx_time,
            fixed_amount: f.avg_out_amount,
            recursion_depth: record.recursion_depth,
        })
        .collect()
}

/// Why an address did not become active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Active,
    Balance,
    TxCount,
    NoFrequentCounterpart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityLevelStats {
    pub depth: usize,
    pub frontier: usize,
    pub analyzed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub active: u64,
    pub orders: u64,
    pub pruned_balance: u64,
    pub pruned_tx_count: u64,
    pub pruned_no_counterpart: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityReport {
    pub levels: Vec<ActivityLevelStats>,
    pub active: Vec<ActiveAddressRecord>,
    pub orders: Vec<Order>,
    pub cancelled: bool,
}

#[derive(Default)]
struct CrawlState {
    visited: HashSet<String>,
    level: ActivityLevelStats,
}

/// Per-level accumulator of active addresses, their orders and the next frontier.
#[derive(Default)]
struct LevelOutput {
    active: Vec<ActiveAddressRecord>,
    orders: Vec<Order>,
    next: Vec<String>,
}

struct Shared {
    chain: Arc<dyn ChainApi>,
    cfg: ActivityConfig,
    state: Mutex<CrawlState>,
}

pub struct ActivityCrawler {
    shared: Arc<Shared>,
    store: Arc<dyn ActivityStore>,
    parser: Option<BlockParser>,
    cancel: CancellationToken,
}

impl ActivityCrawler {
    pub fn new(
        chain: Arc<dyn ChainApi>,
        store: Arc<dyn ActivityStore>,
        cfg: ActivityConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                cfg,
                state: Mutex::new(CrawlState::default()),
            }),
            store,
            parser: None,
            cancel,
        }
    }

    /// Enables seeding from the latest block's token transfers.
    pub fn with_block_parser(mut self, parser: BlockParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Senders and recipients of latest-block transfers inside the seed amount window.
    pub async fn seed_from_latest_block(&self) -> Result<Vec<String>, ChainError> {
        let Some(parser) = &self.parser else {
            return Ok(Vec::new());
        };
        let block = self.shared.chain.fetch_latest_block().await?;
        let cfg = &self.shared.cfg;
        let seeds: Vec<String> = parser
            .extract_transfers(&block)
            .into_iter()
            .filter(|t| t.amount >= cfg.min_seed_amount && t.amount <= cfg.max_seed_amount)
            .flat_map(|t| [t.from, t.to])
            .collect();
        let seeds = dedup(seeds);
        info!(
            "Block {} yielded {} seed address(es)",
            block.block_header.raw_data.number,
            seeds.len()
        );
        Ok(seeds)
    }

    /// Seeds from the latest block and runs the crawl.
    pub async fn run_once(&self) -> Result<ActivityReport, ChainError> {
        let seeds = self.seed_from_latest_block().await?;
        Ok(self.crawl(seeds).await)
    }

    pub async fn crawl(&self, seeds: Vec<String>) -> ActivityReport {
        let cfg = &self.shared.cfg;
        let semaphore = Arc::new(Semaphore::new(cfg.concurrency));
        let mut report = ActivityReport::default();
        *self.shared.state.lock().await = CrawlState::default();

        let seeds = seeds
            .into_iter()
            .filter_map(|s| normalize_address(&s).ok())
            .collect();
        let mut frontier = cap_level(dedup(seeds), cfg.max_addresses_per_level);
        info!(
            "🚀 Activity crawl started: {} seed(s), max_depth={}, policy={:?}",
            frontier.len(),
            cfg.max_depth,
            cfg.policy
        );

        for depth in 0..cfg.max_depth {
            if frontier.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let gate = cfg.gate_at(depth);
            {
                let mut state = self.shared.state.lock().await;
                state.level = ActivityLevelStats {
                    depth,
                    frontier: frontier.len(),
                    ..ActivityLevelStats::default()
                };
            }

            let output = Arc::new(Mutex::new(LevelOutput::default()));
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
                let output = Arc::clone(&output);
                let gate = gate.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    process_address(&shared, &gate, address, depth, &output).await;
                });
            }

            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("⚠️ activity worker panicked: {}", e);
                }
            }

            let level = std::mem::take(&mut *output.lock().await);
            let mut stats = self.shared.state.lock().await.level.clone();
            stats.orders = level.orders.len() as u64;
            self.persist(&level).await;

            info!(
                "✅ Activity level {} done: frontier={} analyzed={} active={} orders={} failed={} pruned(balance={}, tx_count={}, counterpart={})",
                depth,
                stats.frontier,
                stats.analyzed,
                stats.active,
                stats.orders,
                stats.failed,
                stats.pruned_balance,
                stats.pruned_tx_count,
                stats.pruned_no_counterpart
            );
            report.levels.push(stats);
            report.active.extend(level.active);
            report.orders.extend(level.orders);

            if report.cancelled {
                break;
            }
            frontier = cap_level(dedup(level.next), cfg.max_addresses_per_level);
        }

        info!(
            "🏁 Activity crawl finished: levels={} active={} orders={}",
            report.levels.len(),
            report.active.len(),
            report.orders.len()
        );
        report
    }

    async fn persist(&self, level: &LevelOutput) {
        if !level.active.is_empty() {
            if let Err(e) = self.store.save_active_addresses(&level.active).await {
                error!("❌ Failed to save {} active address(es): {}", level.active.len(), e);
            }
        }
        if !level.orders.is_empty() {
            match self.store.save_orders(&level.orders).await {
                Ok(n) => debug!("saved {} new order(s)", n),
                Err(e) => error!("❌ Failed to save {} order(s): {}", level.orders.len(), e),
            }
        }
    }
}

async fn process_address(
    shared: &Shared,
    gate: &LevelGate,
    address: String,
    depth: usize,
    output: &Mutex<LevelOutput>,
) {
    {
        let mut state = shared.state.lock().await;
        if !state.visited.insert(address.clone()) {
            state.level.skipped += 1;
            return;
        }
    }

    let analyzed = analyze_address(shared, gate, &address, depth).await;
    let mut state = shared.state.lock().await;
    let (verdict, record) = match analyzed {
        Ok(result) => result,
        Err(e) => {
            warn!("⚠️ Skipping {}: {}", address, e);
            state.level.failed += 1;
            return;
        }
    };
    state.level.analyzed += 1;
    match verdict {
        Verdict::Active => state.level.active += 1,
        Verdict::Balance => state.level.pruned_balance += 1,
        Verdict::TxCount => state.level.pruned_tx_count += 1,
        Verdict::NoFrequentCounterpart => state.level.pruned_no_counterpart += 1,
    }
    drop(state);

    if verdict != Verdict::Active {
        debug!("{} pruned at depth {}: {:?}", address, depth, verdict);
        return;
    }

    let orders = build_orders(&record, Local::now());
    let mut out = output.lock().await;
    out.next
        .extend(record.frequent_out_addrs.iter().map(|f| f.address.clone()));
    out.orders.extend(orders);
    out.active.push(record);
}

async fn analyze_address(
    shared: &Shared,
    gate: &LevelGate,
    address: &str,
    depth: usize,
) -> Result<(Verdict, ActiveAddressRecord), ChainError> {
    let cfg = &shared.cfg;
    let mut record = ActiveAddressRecord {
        address: address.to_string(),
        balance: Decimal::ZERO,
        tx_count: 0,
        last_active_time: None,
        frequent_out_addrs: Vec::new(),
        is_active: false,
        recursion_depth: depth,
    };

    record.balance = shared
        .chain
        .fetch_token_balance(address, &cfg.token_contract)
        .await?;
    if !gate.balance_ok(record.balance) {
        return Ok((Verdict::Balance, record));
    }

    // one past the upper bound is enough to fail the gate
    let count_filter = TransferFilter::for_contract(&cfg.token_contract)
        .with_limit(gate.max_tx_count.saturating_add(1) as usize);
    record.tx_count = shared
        .chain
        .fetch_transaction_count(address, &count_filter)
        .await?;
    if !gate.tx_count_ok(record.tx_count) {
        return Ok((Verdict::TxCount, record));
    }

    // only the source's own sends count toward history_limit
    let now = Utc::now();
    let since = now - Duration::days(cfg.lookback_days);
    let history_filter = TransferFilter::for_contract(&cfg.token_contract)
        .since(since.timestamp_millis())
        .until(now.timestamp_millis())
        .outbound_only()
        .with_limit(cfg.history_limit);
    let transfers = shared.chain.collect_transfers(address, &history_filter).await?;
    record.last_active_time = transfers.iter().map(Transfer::timestamp).max();

    record.frequent_out_addrs = analyze_frequent_out(
        address,
        &transfers,
        &cfg.frequent,
        cfg.prefix_mask_len,
        cfg.suffix_mask_len,
    );
    if record.frequent_out_addrs.is_empty() {
        return Ok((Verdict::NoFrequentCounterpart, record));
    }
    record.is_active = true;
    Ok((Verdict::Active, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn rule() -> FrequentRule {
        FrequentRule {
            large_transfer_amount: dec("10000"),
            min_large_transfers: 5,
            min_out_transfers: 2,
            min_avg_out_amount: dec("1000"),
            max_avg_out_amount: dec("3000"),
        }
    }

    fn transfer(from: &str, to: &str, amount: &str, ts: i64) -> Transfer {
        Transfer {
            tx_id: format!("{}-{}-{}", from, to, ts),
            block_number: 0,
            block_timestamp: ts,
            from: from.to_string(),
            to: to.to_string(),
            amount: dec(amount),
            contract_address: settings::USDT_CONTRACT.to_string(),
            confirmed: true,
            fee: Decimal::ZERO,
        }
    }

    fn config(policy: ThresholdPolicy) -> ActivityConfig {
        let mut activity = settings::Activity::default();
        activity.threshold_policy = ThresholdPolicyKind::Fixed;
        let mut cfg = ActivityConfig::from_settings(&activity, &settings::Token::default());
        cfg.policy = policy;
        cfg
    }

    #[test]
    fn balance_gate_is_inclusive() {
        let gate = config(ThresholdPolicy::Fixed).gate_at(0);
        assert!(gate.balance_ok(dec("5000")));
        assert!(gate.balance_ok(dec("50000")));
        assert!(!gate.balance_ok(dec("4999.999999")));
        assert!(!gate.balance_ok(dec("50000.000001")));
        assert!(gate.tx_count_ok(20));
        assert!(gate.tx_count_ok(20000));
        assert!(!gate.tx_count_ok(19));
        assert!(!gate.tx_count_ok(20001));
    }

    #[test]
    fn depth_scaled_gate_grows_per_level() {
        let cfg = config(ThresholdPolicy::DepthScaled { growth: 1.1 });
        assert_eq!(cfg.gate_at(0), config(ThresholdPolicy::Fixed).gate_at(0));

        let gate = cfg.gate_at(2);
        assert_eq!(gate.min_balance, dec("6050"));
        assert_eq!(gate.max_balance, dec("60500"));
        assert_eq!(gate.min_tx_count, 24);
        assert_eq!(gate.max_tx_count, 24200);

        assert_eq!(config(ThresholdPolicy::Fixed).gate_at(7).min_balance, dec("5000"));
    }

    #[test]
    fn frequent_rule_boundaries() {
        let r = rule();
        assert!(r.qualifies(2, 5, dec("1000")));
        assert!(r.qualifies(6, 5, dec("3000")));
        assert!(!r.qualifies(6, 4, dec("2000")));
        assert!(!r.qualifies(1, 5, dec("2000")));
        assert!(!r.qualifies(6, 5, dec("999.99")));
        assert!(!r.qualifies(6, 5, dec("3000.01")));
    }

    #[test]
    fn aggregates_outbound_transfers_per_counterpart() {
        let mut transfers: Vec<Transfer> = (0..5)
            .map(|i| transfer("A", "B", "10500", 1_000 + i))
            .collect();
        transfers.extend((0..30).map(|i| transfer("A", "B", "200", 2_000 + i)));
        transfers.push(transfer("A", "C", "50", 3_000));
        transfers.push(transfer("C", "A", "20000", 4_000));
        transfers.push(transfer("A", "A", "20000", 5_000));

        let frequent = analyze_frequent_out("A", &transfers, &rule(), 3, 4);
        assert_eq!(frequent.len(), 1);
        let b = &frequent[0];
        assert_eq!(b.address, "B");
        assert_eq!(b.out_count, 35);
        assert_eq!(b.large_out_count, 5);
        assert_eq!(b.total_out_amount, dec("58500"));
        assert!(b.avg_out_amount > dec("1671") && b.avg_out_amount < dec("1672"));
        assert_eq!(b.last_tx_time, crate::types::millis_to_datetime(2_029));
    }

    #[test]
    fn four_large_transfers_do_not_qualify() {
        let mut transfers: Vec<Transfer> = (0..4)
            .map(|i| transfer("A", "B", "10001", i))
            .collect();
        transfers.extend((0..30).map(|i| transfer("A", "B", "100", 100 + i)));
        assert!(analyze_frequent_out("A", &transfers, &rule(), 3, 4).is_empty());
    }

    #[test]
    fn counterparts_sorted_by_total_descending() {
        let mut transfers = Vec::new();
        for (to, small) in [("B", 20), ("D", 40)] {
            transfers.extend((0..5).map(|i| transfer("A", to, "10500", i)));
            transfers.extend((0..small).map(|i| transfer("A", to, "100", 100 + i)));
        }
        let frequent = analyze_frequent_out("A", &transfers, &rule(), 3, 4);
        let order: Vec<&str> = frequent.iter().map(|f| f.address.as_str()).collect();
        assert_eq!(order, vec!["D", "B"]);
    }

    #[test]
    fn order_id_uses_minute_timestamp_and_counterpart_tail() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 59).unwrap();
        assert_eq!(
            order_id(now, "TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf"),
            "202403090705hSCf"
        );
    }
}
