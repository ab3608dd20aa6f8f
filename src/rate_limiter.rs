// Token-bucket gate shared by every outbound chain call.

use crate::error::ChainError;
use crate::settings::RateLimit;
use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{info, warn};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

#[derive(Debug, Default)]
struct ThrottleState {
    /// Throttle recoveries currently sleeping.
    active: usize,
    degraded: bool,
}

/// Rate limiter with server-driven degradation.
///
/// The active bucket is swapped as a whole: a throttled gateway response installs
/// a one-permit-per-period bucket, and the nominal bucket comes back once the last
/// overlapping cool-down ends (unless restoring is disabled).
pub struct RateGate {
    nominal: Quota,
    degraded: Quota,
    restore_after_cooldown: bool,
    limiter: ArcSwap<DefaultDirectRateLimiter>,
    throttle: Mutex<ThrottleState>,
}

impl RateGate {
    pub fn new(
        requests_per_second: u32,
        burst: u32,
        throttled_period: Duration,
        restore_after_cooldown: bool,
    ) -> Self {
        let nominal = Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        let degraded = Quota::with_period(throttled_period)
            .unwrap_or_else(|| Quota::per_minute(non_zero(6)))
            .allow_burst(NonZeroU32::MIN);

        Self {
            nominal,
            degraded,
            restore_after_cooldown,
            limiter: ArcSwap::from_pointee(RateLimiter::direct(nominal)),
            throttle: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn from_settings(cfg: &RateLimit) -> Self {
        Self::new(
            cfg.requests_per_second,
            cfg.bucket,
            Duration::from_secs(cfg.throttled_period_seconds),
            cfg.restore_after_cooldown,
        )
    }

    /// Waits for a permit. Returns `Cancelled` if the token fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ChainError> {
        let limiter: Arc<DefaultDirectRateLimiter> = self.limiter.load_full();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChainError::Cancelled),
            _ = limiter.until_ready() => Ok(()),
        }
    }

    /// Drops to the degraded quota until the returned guard is released.
    pub fn begin_throttle(&self) -> ThrottleGuard<'_> {
        let mut state = self.state();
        state.active += 1;
        if !state.degraded {
            state.degraded = true;
            self.limiter.store(Arc::new(RateLimiter::direct(self.degraded)));
            warn!(
                "⚠️ Gateway throttled us: rate limit degraded to 1 request / {:?}",
                self.degraded.replenish_interval()
            );
        }
        ThrottleGuard { gate: self }
    }

    fn end_throttle(&self) {
        let mut state = self.state();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 && state.degraded && self.restore_after_cooldown {
            state.degraded = false;
            self.limiter.store(Arc::new(RateLimiter::direct(self.nominal)));
            info!(
                "✅ Throttle cool-down complete, nominal rate restored (burst {})",
                self.nominal.burst_size()
            );
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.state().degraded
    }

    fn state(&self) -> MutexGuard<'_, ThrottleState> {
        match self.throttle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("nominal", &self.nominal)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Keeps the gate degraded while alive.
pub struct ThrottleGuard<'a> {
    gate: &'a RateGate,
}

impl Drop for ThrottleGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_throttle();
    }
}
