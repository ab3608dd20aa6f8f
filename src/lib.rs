//! # TRON Flow SDK
//!
//! Transfer-graph discovery and activity analysis for USDT (TRC20) on TRON.
//!
//! ## Overview
//!
//! All chain access goes through one rate-limited client that recovers from gateway
//! throttling on its own. On top of it sit:
//!
//! - **Frontier crawl**: expands seed addresses level by level into their counterparts
//! - **Activity crawl**: the same traversal, pruned by balance, transfer count and
//!   frequent-counterpart gates, emitting work orders
//! - **Balance refresh**: paged, bounded-concurrency balance lookups written in batches
//! - **Matcher bridge**: pattern tasks for the external vanity matcher and
//!   verification of the key pairs it reports
//!
//! ## Architecture
//!
//! ### Primitives
//! Address codecs, fixed-point amounts, wire and domain types, error taxonomy.
//!
//! ### Infrastructure
//! Token-bucket gate, HTTP chain client, PostgreSQL persistence, settings.
//!
//! ### Engines
//! Crawlers and pipelines. Every engine takes its collaborators as trait objects
//! (`ChainApi`, the store traits) and a `CancellationToken`.

// Primitives
/// Base58check / hex addresses, key-derived addresses, masking
pub mod address;
/// Wire payloads, domain records and amount conversions
pub mod types;
/// Chain and persistence error taxonomy
pub mod error;

// Infrastructure
/// Token bucket with throttle recovery
pub mod rate_limiter;
/// Rate-limited TRON HTTP client
pub mod chain_client;
/// PostgreSQL database integration
pub mod database;
/// Persistence traits and their PostgreSQL implementations
pub mod store;

// Engines
/// Token transfer extraction from blocks
pub mod block_parser;
/// Depth-bounded counterpart discovery
pub mod frontier_crawler;
/// Gated activity analysis and order generation
pub mod activity_crawler;
/// Batched balance refresh
pub mod balance_refresh;
/// Vanity pattern generation and glob matching
pub mod patterns;
/// External matcher session and result verification
pub mod matcher;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use activity_crawler::ActivityCrawler;
pub use address::TronAddress;
pub use balance_refresh::BalanceRefresher;
pub use chain_client::{ChainApi, ChainClient};
pub use error::{ChainError, StoreError};
pub use frontier_crawler::FrontierCrawler;
pub use matcher::MatcherSession;
pub use settings::Settings;
