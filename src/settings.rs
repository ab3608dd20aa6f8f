use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

/// USDT (TRC20) on mainnet.
pub const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
/// Hard page-size ceiling of the `/v1` listing endpoints.
pub const MAX_PAGE_SIZE: usize = 200;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_bucket")]
    pub bucket: u32,
    /// Period of the single permit left after the gateway throttles us.
    #[serde(default = "default_throttled_period_seconds")]
    pub throttled_period_seconds: u64,
    /// Restore the nominal quota once every cool-down has elapsed.
    #[serde(default = "default_true")]
    pub restore_after_cooldown: bool,
}

fn default_requests_per_second() -> u32 {
    15
}
fn default_bucket() -> u32 {
    10
}
fn default_throttled_period_seconds() -> u64 {
    10
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            bucket: default_bucket(),
            throttled_period_seconds: default_throttled_period_seconds(),
            restore_after_cooldown: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Api {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

fn default_base_url() -> String {
    "https://api.trongrid.io".to_string()
}
fn default_http_timeout_seconds() -> u64 {
    30
}
fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            page_size: default_page_size(),
            rate_limit: RateLimit::default(),
        }
    }
}

impl Api {
    /// Page size actually sent; the server rejects anything above 200.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Token {
    #[serde(default = "default_token_contract")]
    pub contract: String,
    #[serde(default = "default_token_decimals")]
    pub decimals: u32,
}

fn default_token_contract() -> String {
    USDT_CONTRACT.to_string()
}
fn default_token_decimals() -> u32 {
    6
}

impl Default for Token {
    fn default() -> Self {
        Self {
            contract: default_token_contract(),
            decimals: default_token_decimals(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    AddressPool,
    ToAddressRecords,
    ReceiveOrders,
}

impl Default for SinkKind {
    fn default() -> Self {
        SinkKind::AddressPool
    }
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address_pool" => Ok(Self::AddressPool),
            "to_address_records" => Ok(Self::ToAddressRecords),
            "receive_orders" => Ok(Self::ReceiveOrders),
            other => Err(format!("unknown sink: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Crawler {
    #[serde(default)]
    pub seed_address: Option<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_addresses_per_level")]
    pub max_addresses_per_level: usize,
    #[serde(default = "default_crawler_concurrency")]
    pub concurrency: usize,
    /// 0 disables the cap.
    #[serde(default = "default_max_pages_per_address")]
    pub max_pages_per_address: usize,
    #[serde(default)]
    pub sink: SinkKind,
    #[serde(default = "default_prefix_len")]
    pub pattern_prefix_len: usize,
    #[serde(default = "default_suffix_len")]
    pub pattern_suffix_len: usize,
}

fn default_max_depth() -> usize {
    100
}
fn default_max_addresses_per_level() -> usize {
    1000
}
fn default_crawler_concurrency() -> usize {
    50
}
fn default_max_pages_per_address() -> usize {
    10
}
fn default_prefix_len() -> usize {
    3
}
fn default_suffix_len() -> usize {
    4
}

impl Default for Crawler {
    fn default() -> Self {
        Self {
            seed_address: None,
            max_depth: default_max_depth(),
            max_addresses_per_level: default_max_addresses_per_level(),
            concurrency: default_crawler_concurrency(),
            max_pages_per_address: default_max_pages_per_address(),
            sink: SinkKind::default(),
            pattern_prefix_len: default_prefix_len(),
            pattern_suffix_len: default_suffix_len(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicyKind {
    Fixed,
    DepthScaled,
}

impl Default for ThresholdPolicyKind {
    fn default() -> Self {
        ThresholdPolicyKind::Fixed
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Activity {
    #[serde(default = "default_activity_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_addresses_per_level")]
    pub max_addresses_per_level: usize,
    #[serde(default = "default_prefix_len")]
    pub prefix_mask_len: usize,
    #[serde(default = "default_suffix_len")]
    pub suffix_mask_len: usize,
    #[serde(default = "default_min_balance")]
    pub min_balance: f64,
    #[serde(default = "default_max_balance")]
    pub max_balance: f64,
    #[serde(default = "default_min_tx_count")]
    pub min_tx_count: u64,
    #[serde(default = "default_max_tx_count")]
    pub max_tx_count: u64,
    #[serde(default)]
    pub threshold_policy: ThresholdPolicyKind,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Amount window for seed transfers taken from the latest block.
    #[serde(default = "default_min_tx_amount")]
    pub min_tx_amount: f64,
    #[serde(default = "default_max_tx_amount")]
    pub max_tx_amount: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_large_transfer_amount")]
    pub large_transfer_amount: f64,
    #[serde(default = "default_min_large_transfers")]
    pub min_large_transfers: u32,
    #[serde(default = "default_min_out_transfers")]
    pub min_out_transfers: u32,
    #[serde(default = "default_min_avg_out_amount")]
    pub min_avg_out_amount: f64,
    #[serde(default = "default_max_avg_out_amount")]
    pub max_avg_out_amount: f64,
    #[serde(default = "default_activity_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_activity_concurrency() -> usize {
    200
}
fn default_lookback_days() -> i64 {
    30
}
fn default_min_balance() -> f64 {
    5000.0
}
fn default_max_balance() -> f64 {
    50000.0
}
fn default_min_tx_count() -> u64 {
    20
}
fn default_max_tx_count() -> u64 {
    20000
}
fn default_growth_factor() -> f64 {
    1.1
}
fn default_min_tx_amount() -> f64 {
    1000.0
}
fn default_max_tx_amount() -> f64 {
    5000.0
}
fn default_history_limit() -> usize {
    1000
}
fn default_large_transfer_amount() -> f64 {
    10000.0
}
fn default_min_large_transfers() -> u32 {
    5
}
fn default_min_out_transfers() -> u32 {
    2
}
fn default_min_avg_out_amount() -> f64 {
    1000.0
}
fn default_max_avg_out_amount() -> f64 {
    3000.0
}
fn default_activity_interval_seconds() -> u64 {
    600
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            concurrency: default_activity_concurrency(),
            lookback_days: default_lookback_days(),
            max_depth: default_max_depth(),
            max_addresses_per_level: default_max_addresses_per_level(),
            prefix_mask_len: default_prefix_len(),
            suffix_mask_len: default_suffix_len(),
            min_balance: default_min_balance(),
            max_balance: default_max_balance(),
            min_tx_count: default_min_tx_count(),
            max_tx_count: default_max_tx_count(),
            threshold_policy: ThresholdPolicyKind::default(),
            growth_factor: default_growth_factor(),
            min_tx_amount: default_min_tx_amount(),
            max_tx_amount: default_max_tx_amount(),
            history_limit: default_history_limit(),
            large_transfer_amount: default_large_transfer_amount(),
            min_large_transfers: default_min_large_transfers(),
            min_out_transfers: default_min_out_transfers(),
            min_avg_out_amount: default_min_avg_out_amount(),
            max_avg_out_amount: default_max_avg_out_amount(),
            interval_seconds: default_activity_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTable {
    AddressPool,
    ActiveAddresses,
}

impl Default for BalanceTable {
    fn default() -> Self {
        BalanceTable::AddressPool
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Balance {
    #[serde(default)]
    pub table: BalanceTable,
    #[serde(default = "default_balance_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_balance_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_balance_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages_in_flight")]
    pub max_pages_in_flight: usize,
    #[serde(default = "default_balance_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_balance_concurrency() -> usize {
    15
}
fn default_balance_batch_size() -> usize {
    50
}
fn default_balance_page_size() -> usize {
    500
}
fn default_max_pages_in_flight() -> usize {
    5
}
fn default_balance_interval_seconds() -> u64 {
    1800
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            table: BalanceTable::default(),
            concurrency: default_balance_concurrency(),
            batch_size: default_balance_batch_size(),
            page_size: default_balance_page_size(),
            max_pages_in_flight: default_max_pages_in_flight(),
            interval_seconds: default_balance_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Matcher {
    #[serde(default = "default_matcher_executable")]
    pub executable: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: usize,
    #[serde(default = "default_run_minutes")]
    pub run_minutes: u64,
    #[serde(default = "default_record_threshold")]
    pub record_threshold: i64,
    #[serde(default = "default_pattern_limit")]
    pub pattern_limit: i64,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    #[serde(default = "default_suffix_len")]
    pub suffix_len: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_threshold_check_seconds")]
    pub threshold_check_seconds: u64,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
}

fn default_matcher_executable() -> String {
    "./tron-matcher".to_string()
}
fn default_gpu_count() -> usize {
    1
}
fn default_run_minutes() -> u64 {
    5
}
fn default_record_threshold() -> i64 {
    10
}
fn default_pattern_limit() -> i64 {
    30000
}
fn default_work_dir() -> String {
    "temp_files".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_threshold_check_seconds() -> u64 {
    10
}
fn default_flush_batch_size() -> usize {
    10
}
fn default_flush_interval_seconds() -> u64 {
    5
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            executable: default_matcher_executable(),
            gpu_count: default_gpu_count(),
            run_minutes: default_run_minutes(),
            record_threshold: default_record_threshold(),
            pattern_limit: default_pattern_limit(),
            work_dir: default_work_dir(),
            prefix_len: default_prefix_len(),
            suffix_len: default_suffix_len(),
            poll_interval_ms: default_poll_interval_ms(),
            threshold_check_seconds: default_threshold_check_seconds(),
            flush_batch_size: default_flush_batch_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> usize {
    10
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Every tunable of the SDK, resolved once and handed to components at construction.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub token: Token,
    #[serde(default)]
    pub crawler: Crawler,
    #[serde(default)]
    pub activity: Activity,
    #[serde(default)]
    pub balance: Balance,
    #[serde(default)]
    pub matcher: Matcher,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub log: Log,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env("TRON_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(key) = non_empty_env("TRON_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(url) = non_empty_env("DATABASE_URL") {
            self.database.url = Some(url);
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.api.rate_limit.requests_per_second, 15);
        assert_eq!(settings.api.rate_limit.bucket, 10);
        assert_eq!(settings.crawler.max_addresses_per_level, 1000);
        assert_eq!(settings.activity.concurrency, 200);
        assert_eq!(settings.activity.threshold_policy, ThresholdPolicyKind::Fixed);
        assert_eq!(settings.balance.batch_size, 50);
        assert_eq!(settings.token.contract, USDT_CONTRACT);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[api]\npage_size = 500\n[api.rate_limit]\nrequests_per_second = 3\n\n[activity]\nthreshold_policy = \"depth_scaled\"\n\n[crawler]\nsink = \"receive_orders\""
        )
        .unwrap();

        let settings = Settings::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.api.rate_limit.requests_per_second, 3);
        assert_eq!(settings.api.rate_limit.bucket, 10);
        assert_eq!(settings.api.effective_page_size(), MAX_PAGE_SIZE);
        assert_eq!(settings.activity.threshold_policy, ThresholdPolicyKind::DepthScaled);
        assert_eq!(settings.crawler.sink, SinkKind::ReceiveOrders);
        assert_eq!(settings.balance.page_size, 500);
    }

    #[test]
    fn sink_kind_parses_from_cli_strings() {
        assert_eq!("to_address_records".parse::<SinkKind>(), Ok(SinkKind::ToAddressRecords));
        assert!("nope".parse::<SinkKind>().is_err());
    }
}
