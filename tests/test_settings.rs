//! Integration tests for settings loading
//!
//! The repository's Config.toml must deserialize and agree with the built-in defaults.

use tron_flow_sdk::settings::{BalanceTable, Settings, SinkKind, ThresholdPolicyKind, USDT_CONTRACT};

#[test]
fn test_repository_config_loads() {
    let settings = Settings::from_file("Config.toml").expect("Failed to load settings");

    assert_eq!(settings.token.contract, USDT_CONTRACT);
    assert_eq!(settings.token.decimals, 6);
    assert_eq!(settings.crawler.sink, SinkKind::AddressPool);
    assert_eq!(settings.balance.table, BalanceTable::AddressPool);
    assert_eq!(settings.activity.threshold_policy, ThresholdPolicyKind::Fixed);
}

#[test]
fn test_repository_config_matches_defaults() {
    let file = Settings::from_file("Config.toml").expect("Failed to load settings");
    let defaults = Settings::default();

    assert_eq!(file.api.rate_limit.requests_per_second, defaults.api.rate_limit.requests_per_second);
    assert_eq!(file.api.rate_limit.bucket, defaults.api.rate_limit.bucket);
    assert_eq!(file.api.effective_page_size(), defaults.api.effective_page_size());
    assert_eq!(file.crawler.max_addresses_per_level, defaults.crawler.max_addresses_per_level);
    assert_eq!(file.activity.min_balance, defaults.activity.min_balance);
    assert_eq!(file.activity.max_tx_count, defaults.activity.max_tx_count);
    assert_eq!(file.balance.batch_size, defaults.balance.batch_size);
    assert_eq!(file.matcher.threshold_check_seconds, defaults.matcher.threshold_check_seconds);
}

#[test]
fn test_missing_file_uses_defaults() {
    let settings = Settings::from_file("does-not-exist.toml").expect("defaults should apply");
    assert_eq!(settings.api.http_timeout_seconds, 30);
    assert_eq!(settings.activity.lookback_days, 30);
    assert!(settings.api.rate_limit.restore_after_cooldown);
}
