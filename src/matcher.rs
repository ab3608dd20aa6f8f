//! # Vanity Matcher Bridge
//!
//! Drives the external GPU matcher: hands it the pending patterns, tails its output
//! file, verifies every reported key pair and fills the matching pattern task.
//!
//! A result line is `address---privateKey`. The address is re-derived from the key;
//! unparseable keys go to `failed_private_address.log`, derivation mismatches to
//! `mismatched_private_address.log`, and neither is ever stored as a match.

use crate::address::{AddressError, TronAddress};
use crate::patterns::{find_matching, generate_patterns};
use crate::settings;
use crate::store::PatternStore;
use crate::types::MatchResult;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const FAILED_KEYS_LOG: &str = "failed_private_address.log";
pub const MISMATCHED_KEYS_LOG: &str = "mismatched_private_address.log";
const RESULT_SEPARATOR: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("malformed result line")]
    Malformed,
    #[error("private key rejected: {0}")]
    InvalidKey(AddressError),
    #[error("key derives {derived}, not {claimed}")]
    Mismatch { claimed: String, derived: String },
}

/// Splits `address---privateKey`.
pub fn parse_result_line(line: &str) -> Option<(&str, &str)> {
    let (address, key) = line.trim().split_once(RESULT_SEPARATOR)?;
    let (address, key) = (address.trim(), key.trim());
    (!address.is_empty() && !key.is_empty()).then_some((address, key))
}

/// Accepts a key pair only if the key derives exactly the claimed address.
pub fn verify_match(address: &str, private_key: &str) -> Result<MatchResult, Rejection> {
    let derived = TronAddress::from_private_key(private_key)
        .map_err(Rejection::InvalidKey)?
        .to_base58();
    if derived != address {
        return Err(Rejection::Mismatch {
            claimed: address.to_string(),
            derived,
        });
    }
    Ok(MatchResult {
        address: derived,
        private_key: private_key.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub executable: PathBuf,
    pub gpu_count: usize,
    pub run_for: Duration,
    pub record_threshold: i64,
    pub pattern_limit: i64,
    pub work_dir: PathBuf,
    pub prefix_len: usize,
    pub suffix_len: usize,
    pub poll_interval: Duration,
    pub threshold_check: Duration,
    pub flush_batch_size: usize,
    pub flush_interval: Duration,
}

impl From<&settings::Matcher> for MatcherConfig {
    fn from(cfg: &settings::Matcher) -> Self {
        Self {
            executable: PathBuf::from(&cfg.executable),
            gpu_count: cfg.gpu_count.max(1),
            run_for: Duration::from_secs(cfg.run_minutes * 60),
            record_threshold: cfg.record_threshold,
            pattern_limit: cfg.pattern_limit,
            work_dir: PathBuf::from(&cfg.work_dir),
            prefix_len: cfg.prefix_len,
            suffix_len: cfg.suffix_len,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            threshold_check: Duration::from_secs(cfg.threshold_check_seconds.max(1)),
            flush_batch_size: cfg.flush_batch_size.max(1),
            flush_interval: Duration::from_secs(cfg.flush_interval_seconds.max(1)),
        }
    }
}

impl MatcherConfig {
    /// `0,1,..,gpu_count-1`
    pub fn gpu_ids(&self) -> String {
        (0..self.gpu_count)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Appends rejected result lines to the two audit logs under `dir`.
#[derive(Debug, Clone)]
pub struct RejectLog {
    dir: PathBuf,
}

impl RejectLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn record(&self, line: &str, rejection: &Rejection) {
        let file = match rejection {
            Rejection::Mismatch { .. } => MISMATCHED_KEYS_LOG,
            Rejection::InvalidKey(_) | Rejection::Malformed => FAILED_KEYS_LOG,
        };
        if let Err(e) = append_line(&self.dir.join(file), line).await {
            error!("❌ Could not append to {}: {}", file, e);
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(format!("{}\n", line.trim_end()).as_bytes()).await
}

/// Moves the output file aside and returns its contents; empty if nothing new.
pub async fn drain_output(path: &Path) -> std::io::Result<String> {
    let rotated = path.with_extension("old");
    match fs::rename(path, &rotated).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    }
    let content = fs::read_to_string(&rotated).await?;
    fs::remove_file(&rotated).await?;
    Ok(content)
}

/// Verifies result lines, logging rejections; returns the accepted matches.
pub async fn verify_lines(content: &str, rejects: &RejectLog) -> Vec<MatchResult> {
    let mut accepted = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let verdict = match parse_result_line(line) {
            Some((address, key)) => verify_match(address, key),
            None => Err(Rejection::Malformed),
        };
        match verdict {
            Ok(result) => accepted.push(result),
            Err(rejection) => {
                warn!("⚠️ Rejected matcher result: {}", rejection);
                rejects.record(line, &rejection).await;
            }
        }
    }
    accepted
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub filled: u64,
    pub unmatched: u64,
    pub already_filled: u64,
    pub failed: u64,
}

/// Batches verified results and fills their pattern tasks; flushes on batch size,
/// on the timer, and when the channel closes.
pub async fn ingest_results(
    store: Arc<dyn PatternStore>,
    patterns: Arc<Vec<String>>,
    mut rx: mpsc::Receiver<MatchResult>,
    batch_size: usize,
    flush_interval: Duration,
) -> IngestStats {
    let mut stats = IngestStats::default();
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(result) => {
                    stats.received += 1;
                    batch.push(result);
                    if batch.len() >= batch_size {
                        fill_batch(store.as_ref(), &patterns, &mut batch, &mut stats).await;
                    }
                }
                None => {
                    fill_batch(store.as_ref(), &patterns, &mut batch, &mut stats).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                fill_batch(store.as_ref(), &patterns, &mut batch, &mut stats).await;
            }
        }
    }
    stats
}

async fn fill_batch(
    store: &dyn PatternStore,
    patterns: &[String],
    batch: &mut Vec<MatchResult>,
    stats: &mut IngestStats,
) {
    for result in batch.drain(..) {
        let Some(pattern) = find_matching(patterns, &result.address) else {
            debug!("{} matches no pending pattern", result.address);
            stats.unmatched += 1;
            continue;
        };
        match store.fill_match(pattern, &result).await {
            Ok(true) => {
                stats.filled += 1;
                info!("✅ Pattern {} matched by {}", pattern, result.address);
            }
            Ok(false) => stats.already_filled += 1,
            Err(e) => {
                stats.failed += 1;
                error!("❌ Failed to store match for {}: {}", pattern, e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    Threshold,
    ProcessExited,
    Cancelled,
    NoPatterns,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub patterns: usize,
    pub stop: StopReason,
    pub ingest: IngestStats,
}

pub struct MatcherSession {
    cfg: MatcherConfig,
    store: Arc<dyn PatternStore>,
    cancel: CancellationToken,
}

impl MatcherSession {
    pub fn new(cfg: MatcherConfig, store: Arc<dyn PatternStore>, cancel: CancellationToken) -> Self {
        Self { cfg, store, cancel }
    }

    /// Generates and stores `count` fresh pending patterns.
    pub async fn seed_patterns(&self, count: usize) -> Result<u64> {
        let patterns = generate_patterns(count, self.cfg.prefix_len, self.cfg.suffix_len);
        let inserted = self.store.insert_patterns(&patterns).await?;
        info!("✅ Stored {} new pattern task(s) of {} generated", inserted, patterns.len());
        Ok(inserted)
    }

    pub async fn run(&self) -> Result<SessionReport> {
        let patterns = self.store.pending_patterns(self.cfg.pattern_limit).await?;
        if patterns.is_empty() {
            info!("No pending patterns, matcher not started");
            return Ok(SessionReport {
                patterns: 0,
                stop: StopReason::NoPatterns,
                ingest: IngestStats::default(),
            });
        }
        let patterns = Arc::new(patterns);

        fs::create_dir_all(&self.cfg.work_dir)
            .await
            .with_context(|| format!("creating {}", self.cfg.work_dir.display()))?;
        let started = Utc::now();
        let stamp = started.timestamp_millis();
        let input = self.cfg.work_dir.join(format!("patterns_{}.txt", stamp));
        let output = self.cfg.work_dir.join(format!("results_{}.txt", stamp));
        fs::write(&input, format!("{}\n", patterns.join("\n")))
            .await
            .with_context(|| format!("writing {}", input.display()))?;

        let gpu_ids = self.cfg.gpu_ids();
        info!(
            "🚀 Starting matcher: {} -gpu -gpuId {} -i {} -o {} ({} pattern(s))",
            self.cfg.executable.display(),
            gpu_ids,
            input.display(),
            output.display(),
            patterns.len()
        );
        let mut child = Command::new(&self.cfg.executable)
            .arg("-gpu")
            .arg("-gpuId")
            .arg(&gpu_ids)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.cfg.executable.display()))?;

        let (tx, rx) = mpsc::channel(self.cfg.flush_batch_size * 4);
        let ingest = tokio::spawn(ingest_results(
            Arc::clone(&self.store),
            Arc::clone(&patterns),
            rx,
            self.cfg.flush_batch_size,
            self.cfg.flush_interval,
        ));
        let rejects = RejectLog::new(&self.cfg.work_dir);

        let deadline = Instant::now() + self.cfg.run_for;
        let mut poll = interval(self.cfg.poll_interval);
        let mut threshold = interval(self.cfg.threshold_check);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        threshold.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut child_done = false;

        let stop = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                _ = sleep_until(deadline) => break StopReason::Deadline,
                status = child.wait() => {
                    child_done = true;
                    match status {
                        Ok(status) => info!("Matcher exited: {}", status),
                        Err(e) => warn!("⚠️ Waiting for matcher failed: {}", e),
                    }
                    break StopReason::ProcessExited;
                }
                _ = poll.tick() => {
                    self.forward_output(&output, &rejects, &tx).await;
                }
                _ = threshold.tick() => {
                    match self.store.count_pending_since(started).await {
                        Ok(n) if n >= self.cfg.record_threshold => {
                            info!("{} new pending pattern(s) since start, restarting with a fresh list", n);
                            break StopReason::Threshold;
                        }
                        Ok(_) => {}
                        Err(e) => warn!("⚠️ Pending-pattern count failed: {}", e),
                    }
                }
            }
        };

        if !child_done {
            if let Err(e) = child.kill().await {
                warn!("⚠️ Could not stop matcher: {}", e);
            }
        }
        // results written before shutdown
        self.forward_output(&output, &rejects, &tx).await;
        drop(tx);
        let ingest = ingest.await?;

        for path in [&input, &output] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("⚠️ Could not remove {}: {}", path.display(), e);
                }
            }
        }
        info!(
            "🏁 Matcher session ended ({:?}): received={} filled={} unmatched={}",
            stop, ingest.received, ingest.filled, ingest.unmatched
        );
        Ok(SessionReport {
            patterns: patterns.len(),
            stop,
            ingest,
        })
    }

    async fn forward_output(&self, output: &Path, rejects: &RejectLog, tx: &mpsc::Sender<MatchResult>) {
        let content = match drain_output(output).await {
            Ok(content) => content,
            Err(e) => {
                warn!("⚠️ Reading {} failed: {}", output.display(), e);
                return;
            }
        };
        for result in verify_lines(&content, rejects).await {
            if tx.send(result).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const KEY_TWO: &str = "0000000000000000000000000000000000000000000000000000000000000002";

    fn address_of(key: &str) -> String {
        TronAddress::from_private_key(key).unwrap().to_base58()
    }

    #[derive(Default)]
    struct MemoryPatterns {
        filled: StdMutex<HashMap<String, MatchResult>>,
    }

    #[async_trait]
    impl PatternStore for MemoryPatterns {
        async fn insert_patterns(&self, patterns: &[String]) -> Result<u64, StoreError> {
            Ok(patterns.len() as u64)
        }
        async fn pending_patterns(&self, _: i64) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn count_pending_since(&self, _: DateTime<Utc>) -> Result<i64, StoreError> {
            Ok(0)
        }
        async fn fill_match(&self, pattern: &str, result: &MatchResult) -> Result<bool, StoreError> {
            let mut filled = self.filled.lock().unwrap();
            if filled.contains_key(pattern) {
                return Ok(false);
            }
            filled.insert(pattern.to_string(), result.clone());
            Ok(true)
        }
    }

    #[test]
    fn parses_result_lines() {
        assert_eq!(parse_result_line("TAbc---deadbeef\n"), Some(("TAbc", "deadbeef")));
        assert_eq!(parse_result_line("TAbc deadbeef"), None);
        assert_eq!(parse_result_line("---deadbeef"), None);
    }

    #[test]
    fn verification_derives_the_address() {
        let address = address_of(KEY_ONE);
        assert_eq!(verify_match(&address, KEY_ONE).unwrap().address, address);

        match verify_match(&address, KEY_TWO) {
            Err(Rejection::Mismatch { derived, .. }) => assert_eq!(derived, address_of(KEY_TWO)),
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert!(matches!(verify_match(&address, "zz"), Err(Rejection::InvalidKey(_))));
    }

    #[tokio::test]
    async fn drain_rotates_and_rejects_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("results.txt");
        let good = format!("{}---{}", address_of(KEY_ONE), KEY_ONE);
        let mismatched = format!("{}---{}", address_of(KEY_ONE), KEY_TWO);
        let bad = "TXyz---not-a-key".to_string();
        fs::write(&output, format!("{}\n{}\n\n{}\n", good, mismatched, bad)).await.unwrap();

        let content = drain_output(&output).await.unwrap();
        assert!(!output.exists());
        assert!(drain_output(&output).await.unwrap().is_empty());

        let rejects = RejectLog::new(dir.path());
        let accepted = verify_lines(&content, &rejects).await;
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].private_key, KEY_ONE);

        let mismatches = fs::read_to_string(dir.path().join(MISMATCHED_KEYS_LOG)).await.unwrap();
        assert_eq!(mismatches.trim(), mismatched);
        let failures = fs::read_to_string(dir.path().join(FAILED_KEYS_LOG)).await.unwrap();
        assert_eq!(failures.trim(), bad);
    }

    #[tokio::test]
    async fn ingest_fills_each_pattern_once() {
        let address = address_of(KEY_ONE);
        let prefix: String = address.chars().take(5).collect();
        let suffix: String = address.chars().skip(address.len() - 6).collect();
        let pattern = format!("{}*{}", prefix, suffix);
        let patterns = Arc::new(vec!["T1*zzzz".to_string(), pattern.clone()]);

        let store = Arc::new(MemoryPatterns::default());
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(ingest_results(store.clone(), patterns, rx, 2, Duration::from_secs(5)));

        let result = MatchResult {
            address: address.clone(),
            private_key: KEY_ONE.to_string(),
        };
        tx.send(result.clone()).await.unwrap();
        tx.send(result.clone()).await.unwrap();
        tx.send(MatchResult {
            address: address_of(KEY_TWO),
            private_key: KEY_TWO.to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.already_filled, 1);
        assert_eq!(store.filled.lock().unwrap()[&pattern], result);
        assert_eq!(stats.unmatched, 1);
    }

    #[tokio::test]
    async fn session_without_patterns_does_not_spawn() {
        let mut cfg = MatcherConfig::from(&settings::Matcher::default());
        cfg.executable = PathBuf::from("/nonexistent/matcher");
        let session = MatcherSession::new(cfg, Arc::new(MemoryPatterns::default()), CancellationToken::new());
        let report = session.run().await.unwrap();
        assert_eq!(report.stop, StopReason::NoPatterns);
    }

    #[test]
    fn gpu_ids_list_every_device() {
        let mut cfg = MatcherConfig::from(&settings::Matcher::default());
        cfg.gpu_count = 3;
        assert_eq!(cfg.gpu_ids(), "0,1,2");
    }
}
