//! # TRON Flow Operator
//!
//! Command-line entry point wiring settings, the chain client, PostgreSQL and the
//! engines together.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin tron_flow -- crawl --seed TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf
//! cargo run --bin tron_flow -- schedule
//! ```
//!
//! Ctrl+C cancels in-flight work; everything already persisted stays.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tron_flow_sdk::{
    activity_crawler::{ActivityConfig, ActivityCrawler},
    address::TronAddress,
    balance_refresh::{BalanceConfig, BalanceRefresher},
    block_parser::BlockParser,
    chain_client::{ChainApi, ChainClient},
    database::{self, DbPool},
    frontier_crawler::{FrontierConfig, FrontierCrawler},
    matcher::{MatcherConfig, MatcherSession},
    settings::{Settings, SinkKind},
    store::{AddressPoolSink, AddressSink, PgStore, ReceiveOrderSink, ToAddressRecordSink},
};

#[derive(Parser)]
#[command(name = "tron_flow", about = "TRON transfer-graph crawler and analyzer")]
struct Cli {
    /// Settings file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Frontier crawl from a seed address
    Crawl {
        #[arg(long)]
        seed: Option<String>,
        #[arg(long)]
        sink: Option<SinkKind>,
    },
    /// One activity analysis pass seeded from the latest block
    Analyze,
    /// Refresh every balance of the configured table, or a single address
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
    /// Run balance refresh and activity analysis on their intervals until Ctrl+C
    Schedule,
    /// Generate and store pending pattern tasks
    GenPatterns {
        #[arg(long, default_value_t = 100)]
        count: usize,
    },
    /// Run one external matcher session over the pending patterns
    Match,
    /// Check that a private key derives the given address
    Verify {
        #[arg(long)]
        private_key: String,
        #[arg(long)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::from_file(&cli.config).context("loading settings")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log.level))
        .init();
    info!("✅ Settings loaded from {}", cli.config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 Shutdown signal received, cancelling in-flight work...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Verify { private_key, address } => verify(&private_key, &address),
        Command::Crawl { seed, sink } => crawl(&settings, seed, sink, cancel).await,
        Command::Analyze => {
            let crawler = activity_crawler(&settings, &connect(&settings).await?, cancel)?;
            crawler.run_once().await?;
            Ok(())
        }
        Command::Balance { address } => {
            let refresher = balance_refresher(&settings, &connect(&settings).await?, cancel)?;
            match address {
                Some(address) => {
                    refresher.refresh_one(&address).await?;
                }
                None => {
                    refresher.run().await?;
                }
            }
            Ok(())
        }
        Command::Schedule => schedule(&settings, cancel).await,
        Command::GenPatterns { count } => {
            matcher_session(&settings, &connect(&settings).await?, cancel)
                .seed_patterns(count)
                .await?;
            Ok(())
        }
        Command::Match => {
            matcher_session(&settings, &connect(&settings).await?, cancel).run().await?;
            Ok(())
        }
    }
}

fn verify(private_key: &str, address: &str) -> Result<()> {
    let derived = TronAddress::from_private_key(private_key)?;
    let claimed = TronAddress::parse(address)?;
    if derived != claimed {
        bail!("key derives {}, not {}", derived, claimed);
    }
    info!("✅ {} verified", derived);
    println!("{}", derived);
    Ok(())
}

async fn connect(settings: &Settings) -> Result<DbPool> {
    let pool = database::connect(&settings.database).await?;
    info!("✅ Database connected");
    Ok(pool)
}

fn chain_client(settings: &Settings, cancel: CancellationToken) -> Result<Arc<dyn ChainApi>> {
    Ok(Arc::new(ChainClient::new(&settings.api, &settings.token, cancel)?))
}

async fn crawl(
    settings: &Settings,
    seed: Option<String>,
    sink: Option<SinkKind>,
    cancel: CancellationToken,
) -> Result<()> {
    let Some(seed) = seed.or_else(|| settings.crawler.seed_address.clone()) else {
        bail!("no seed address: pass --seed or set crawler.seed_address");
    };
    let pool = connect(settings).await?;
    let cfg = &settings.crawler;
    let sink: Arc<dyn AddressSink> = match sink.unwrap_or(cfg.sink) {
        SinkKind::AddressPool => Arc::new(AddressPoolSink::new(pool)),
        SinkKind::ToAddressRecords => Arc::new(ToAddressRecordSink::new(
            pool,
            cfg.pattern_prefix_len,
            cfg.pattern_suffix_len,
        )),
        SinkKind::ReceiveOrders => Arc::new(ReceiveOrderSink::new(
            pool,
            cfg.pattern_prefix_len,
            cfg.pattern_suffix_len,
        )),
    };

    let crawler = FrontierCrawler::new(
        chain_client(settings, cancel.clone())?,
        sink,
        FrontierConfig::from(cfg),
        cancel,
    );
    crawler.crawl(vec![seed]).await;
    Ok(())
}

fn activity_crawler(settings: &Settings, pool: &DbPool, cancel: CancellationToken) -> Result<ActivityCrawler> {
    let store = Arc::new(PgStore::new(pool.clone(), settings.balance.table));
    let parser = BlockParser::new(&settings.token)?;
    Ok(ActivityCrawler::new(
        chain_client(settings, cancel.clone())?,
        store,
        ActivityConfig::from_settings(&settings.activity, &settings.token),
        cancel,
    )
    .with_block_parser(parser))
}

fn balance_refresher(settings: &Settings, pool: &DbPool, cancel: CancellationToken) -> Result<BalanceRefresher> {
    let store = Arc::new(PgStore::new(pool.clone(), settings.balance.table));
    Ok(BalanceRefresher::new(
        chain_client(settings, cancel.clone())?,
        store,
        BalanceConfig::from_settings(&settings.balance, &settings.token),
        cancel,
    ))
}

fn matcher_session(settings: &Settings, pool: &DbPool, cancel: CancellationToken) -> MatcherSession {
    let store = Arc::new(PgStore::new(pool.clone(), settings.balance.table));
    MatcherSession::new(MatcherConfig::from(&settings.matcher), store, cancel)
}

async fn schedule(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let pool = connect(settings).await?;
    let refresher = balance_refresher(settings, &pool, cancel.clone())?;
    let analyzer = activity_crawler(settings, &pool, cancel.clone())?;
    let balance_every = settings.balance.interval_seconds.max(1);
    let activity_every = settings.activity.interval_seconds.max(1);
    info!(
        "🚀 Scheduler started: balance every {}s, activity every {}s",
        balance_every, activity_every
    );

    let balance_loop = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(balance_every));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = refresher.run().await {
                            error!("❌ Balance refresh failed: {:#}", e);
                        }
                    }
                }
            }
        })
    };

    let activity_loop = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(activity_every));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = analyzer.run_once().await {
                            error!("❌ Activity analysis failed: {}", e);
                        }
                    }
                }
            }
        })
    };

    for joined in join_all([balance_loop, activity_loop]).await {
        if let Err(e) = joined {
            error!("❌ Scheduled task panicked: {}", e);
        }
    }
    info!("🏁 Scheduler stopped");
    Ok(())
}
