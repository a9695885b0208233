//! Sliding-window admission control keyed by user and client address.
//!
//! # Design
//! - Each identity owns a window of `(instant, count)` samples behind its own
//!   mutex; the map lock is only held to find or insert a window.
//! - User windows look back one hour, address windows one minute. Samples
//!   older than the lookback are purged on every check.
//! - A rejection records nothing, so a throttled caller does not extend its
//!   own penalty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use proxyseed_config::RateLimitSettings;
use proxyseed_core::Identity;
use tracing::debug;

use crate::error::{LimitScope, RateLimited};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

#[derive(Debug)]
struct RateWindow {
    lookback: Duration,
    samples: VecDeque<(Instant, u32)>,
}

impl RateWindow {
    const fn new(lookback: Duration) -> Self {
        Self {
            lookback,
            samples: VecDeque::new(),
        }
    }

    fn purge(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) >= self.lookback {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, span: Duration) -> u64 {
        self.samples
            .iter()
            .rev()
            .take_while(|(at, _)| now.saturating_duration_since(*at) < span)
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    /// Samples stay ordered by instant: a caller whose clock reading predates
    /// the newest sample is folded into it.
    fn record(&mut self, now: Instant) {
        match self.samples.back_mut() {
            Some((at, count)) if *at >= now => *count = count.saturating_add(1),
            _ => self.samples.push_back((now, 1)),
        }
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

type WindowSlot = Arc<Mutex<RateWindow>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WindowKey {
    User(String),
    Ip(String),
}

/// Per-identity sliding-window rate limiter.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    settings: RateLimitSettings,
    windows: RwLock<HashMap<WindowKey, WindowSlot>>,
}

impl SlidingWindowRateLimiter {
    /// Limiter enforcing `settings`.
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Limits in force.
    #[must_use]
    pub const fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Admit or reject one submission from `identity` now.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] when a window is exhausted.
    pub fn admit(&self, identity: &Identity) -> Result<(), RateLimited> {
        self.admit_at(identity, Instant::now())
    }

    /// Admit or reject one submission from `identity` at `now`.
    ///
    /// User windows are checked before the address window. On admission one
    /// unit is recorded against both.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] when a window is exhausted.
    pub fn admit_at(&self, identity: &Identity, now: Instant) -> Result<(), RateLimited> {
        if !self.settings.enabled {
            return Ok(());
        }

        let user_slot = identity
            .user_id
            .as_ref()
            .map(|user| self.window(WindowKey::User(user.clone()), HOUR));
        let ip_slot = self.window(WindowKey::Ip(identity.client_ip.clone()), MINUTE);

        let mut user_window = user_slot
            .as_ref()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner));
        let mut ip_window = ip_slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(window) = user_window.as_deref_mut() {
            window.purge(now);
            if window.count_within(now, MINUTE) >= u64::from(self.settings.requests_per_minute) {
                return Err(rejected(LimitScope::UserMinute, identity));
            }
            if window.count_within(now, HOUR) >= u64::from(self.settings.requests_per_hour) {
                return Err(rejected(LimitScope::UserHour, identity));
            }
        }
        ip_window.purge(now);
        if ip_window.count_within(now, MINUTE) >= u64::from(self.settings.requests_per_ip_minute) {
            return Err(rejected(LimitScope::IpMinute, identity));
        }

        if let Some(window) = user_window.as_deref_mut() {
            window.record(now);
        }
        ip_window.record(now);
        Ok(())
    }

    /// Drop identities whose windows are empty at `now`. Returns how many were removed.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let mut window = slot.lock().unwrap_or_else(PoisonError::into_inner);
            window.purge(now);
            !window.is_empty()
        });
        let removed = before - windows.len();
        drop(windows);
        if removed > 0 {
            debug!(removed, "swept idle rate-limit windows");
        }
        removed
    }

    /// Drop identities whose windows are empty now.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Identities currently tracked.
    #[must_use]
    pub fn tracked_identities(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn window(&self, key: WindowKey, lookback: Duration) -> WindowSlot {
        if let Some(slot) = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(slot);
        }
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            windows
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(lookback)))),
        )
    }
}

fn rejected(scope: LimitScope, identity: &Identity) -> RateLimited {
    let retry_after_secs = match scope {
        LimitScope::UserHour => HOUR.as_secs(),
        LimitScope::UserMinute | LimitScope::IpMinute => MINUTE.as_secs(),
    };
    debug!(
        scope = scope.as_str(),
        user_id = identity.user_id.as_deref().unwrap_or("-"),
        client_ip = %identity.client_ip,
        retry_after_secs,
        "admission rejected"
    );
    RateLimited {
        retry_after_secs,
        scope,
    }
}
