//! # Circuit Breaker
//!
//! Guards the tax authority from being hammered while it is down, and the
//! issuer from waiting on it.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────┐  consecutive failures ≥ threshold   ┌──────────┐        │
//! │   │  CLOSED  │ ──────────────────────────────────► │   OPEN   │        │
//! │   └────▲─────┘                                     └────┬─────┘        │
//! │        │                                                │              │
//! │        │ probe succeeded        now − last_failure >    │              │
//! │        │                        reset_timeout           │              │
//! │        │                        (on try_acquire)        ▼              │
//! │        │                                          ┌───────────┐        │
//! │        └──────────────────────────────────────────│ HALF-OPEN │        │
//! │                                                   └─────┬─────┘        │
//! │                     probe failed (timer restarted)      │              │
//! │                   OPEN ◄────────────────────────────────┘              │
//! │                                                                         │
//! │   HALF-OPEN admits exactly one probe. Everyone else is refused until   │
//! │   the probe reports back. A probe dropped unsettled reports failure.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One breaker per branch, handed out by [`BreakerRegistry`]. State lives
//! behind a single `tokio::sync::RwLock`; transitions are published on a
//! `watch` channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dte_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::BreakerSettings;

// =============================================================================
// Circuit State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused; documents go to contingency.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
    state_tx: watch::Sender<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(CircuitState::Closed);
        CircuitBreaker {
            name: name.into(),
            settings,
            clock,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            state_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks to send one request upstream.
    ///
    /// The returned permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]. A half-open probe permit dropped unsettled
    /// (the caller was cancelled) counts as a failed probe.
    ///
    /// ## Returns
    /// * `Some(permit)` - Closed, or this caller is the single half-open probe
    /// * `None` - Open and still cooling down, or a probe is already out
    pub async fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        if self.inner.read().await.state == CircuitState::Closed {
            return Some(CallPermit::new(self.clone(), false));
        }

        let mut inner = self.inner.write().await;
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.cooled_down(inner.last_failure) {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                true
            }
            CircuitState::HalfOpen if inner.probe_in_flight => return None,
            CircuitState::HalfOpen => true,
        };
        inner.probe_in_flight |= probe;
        Some(CallPermit::new(self.clone(), probe))
    }

    /// Reports a successful upstream call. Closes the circuit.
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Reports a failed upstream call.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        self.fail(&mut inner);
    }

    fn fail(&self, inner: &mut Inner) {
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(self.clock.now());
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.settings.failure_threshold => {
                self.transition(inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                debug!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.settings.failure_threshold,
                    "Upstream failure recorded"
                );
            }
            CircuitState::HalfOpen => self.transition(inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Probe dropped without an outcome.
    fn abandon_probe(self: &Arc<Self>) {
        warn!(breaker = %self.name, "Probe abandoned, reopening circuit");
        match self.inner.try_write() {
            Ok(mut inner) => self.fail(&mut inner),
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let breaker = self.clone();
                    handle.spawn(async move { breaker.record_failure().await });
                }
                Err(_) => warn!(breaker = %self.name, "No runtime to release abandoned probe"),
            },
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.read().await.consecutive_failures
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    fn cooled_down(&self, last_failure: Option<DateTime<Utc>>) -> bool {
        let Some(last) = last_failure else {
            return true;
        };
        let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
        elapsed > self.settings.reset_timeout()
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                %from,
                failures = inner.consecutive_failures,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => info!(breaker = %self.name, %from, "Circuit half-open, probing"),
            CircuitState::Closed => info!(breaker = %self.name, %from, "Circuit closed"),
        }

        self.state_tx.send_replace(to);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Call Permit
// =============================================================================

/// Admission for one upstream call, from [`CircuitBreaker::try_acquire`].
#[must_use = "settle the permit with success() or failure()"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        CallPermit {
            breaker,
            probe,
            settled: false,
        }
    }

    /// True for the single half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub async fn success(mut self) {
        self.settled = true;
        self.breaker.record_success().await;
    }

    pub async fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure().await;
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.abandon_probe();
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("probe", &self.probe)
            .field("settled", &self.settled)
            .finish()
    }
}

// =============================================================================
// Breaker Registry
// =============================================================================

/// One breaker per branch, created on first use.
#[derive(Clone)]
pub struct BreakerRegistry {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        BreakerRegistry {
            settings,
            clock,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the breaker of `branch_id`, creating it closed if needed.
    pub async fn get(&self, branch_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(branch_id) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(branch_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(branch_id, self.settings, self.clock.clone()))
            })
            .clone()
    }

    /// Current state of every known breaker.
    pub async fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.read().await;
        let mut states = HashMap::with_capacity(breakers.len());
        for (branch, breaker) in breakers.iter() {
            states.insert(branch.clone(), breaker.state().await);
        }
        states
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dte_core::ManualClock;

    fn breaker(threshold: u32) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let settings = BreakerSettings {
            failure_threshold: threshold,
            reset_timeout_secs: 30,
        };
        (Arc::new(CircuitBreaker::new("branch-1", settings, clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (cb, _) = breaker(3);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        let permit = cb.try_acquire().await.unwrap();
        assert!(!permit.is_probe());

        permit.failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.try_acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_counter_while_closed() {
        let (cb, _) = breaker(3);

        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        assert_eq!(cb.consecutive_failures().await, 0);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_single_probe_after_reset_timeout() {
        let (cb, clock) = breaker(1);
        cb.record_failure().await;

        clock.advance(chrono::Duration::seconds(30));
        assert!(cb.try_acquire().await.is_none(), "timeout must be strictly exceeded");

        clock.advance(chrono::Duration::seconds(1));
        let probe = cb.try_acquire().await.unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.try_acquire().await.is_none());
        assert!(cb.try_acquire().await.is_none());
        probe.success().await;
    }

    #[tokio::test]
    async fn test_probe_success_closes() {
        let (cb, clock) = breaker(2);
        cb.record_failure().await;
        cb.record_failure().await;

        clock.advance(chrono::Duration::seconds(31));
        cb.try_acquire().await.unwrap().success().await;

        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.consecutive_failures().await, 0);
        assert!(cb.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_and_restarts_timer() {
        let (cb, clock) = breaker(1);
        cb.record_failure().await;

        clock.advance(chrono::Duration::seconds(31));
        cb.try_acquire().await.unwrap().failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        clock.advance(chrono::Duration::seconds(20));
        assert!(cb.try_acquire().await.is_none());

        clock.advance(chrono::Duration::seconds(11));
        assert!(cb.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_probe_reopens_circuit() {
        let (cb, clock) = breaker(1);
        cb.record_failure().await;
        clock.advance(chrono::Duration::seconds(31));

        let probe = cb.try_acquire().await.unwrap();
        drop(probe);
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.try_acquire().await.is_none());

        clock.advance(chrono::Duration::seconds(31));
        let probe = cb.try_acquire().await.unwrap();
        assert!(probe.is_probe());
        probe.success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_call_releases_breaker() {
        let (cb, clock) = breaker(1);
        cb.record_failure().await;
        clock.advance(chrono::Duration::seconds(31));

        let call = {
            let cb = cb.clone();
            async move {
                let permit = cb.try_acquire().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                permit.success().await;
            }
        };
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), call).await;
        assert!(timed_out.is_err());

        assert_eq!(cb.state().await, CircuitState::Open);
        clock.advance(chrono::Duration::seconds(31));
        assert!(cb.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_closed_permit_changes_nothing() {
        let (cb, _) = breaker(1);
        drop(cb.try_acquire().await.unwrap());

        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let (cb, clock) = breaker(1);
        let mut rx = cb.subscribe();

        cb.record_failure().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), CircuitState::Open);

        clock.advance(chrono::Duration::seconds(31));
        let _probe = cb.try_acquire().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_concurrent_half_open_admits_one() {
        let (cb, clock) = breaker(1);
        cb.record_failure().await;
        clock.advance(chrono::Duration::seconds(31));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = cb.clone();
                tokio::spawn(async move { cb.try_acquire().await })
            })
            .collect();

        let mut permits = Vec::new();
        for handle in handles {
            permits.extend(handle.await.unwrap());
        }
        assert_eq!(permits.len(), 1);
        assert!(permits[0].is_probe());
    }

    #[tokio::test]
    async fn test_registry_one_breaker_per_branch() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = BreakerRegistry::new(
            BreakerSettings {
                failure_threshold: 1,
                reset_timeout_secs: 60,
            },
            clock,
        );

        let a = registry.get("a").await;
        assert!(Arc::ptr_eq(&a, &registry.get("a").await));

        a.record_failure().await;
        assert_eq!(registry.get("b").await.state().await, CircuitState::Closed);

        let states = registry.states().await;
        assert_eq!(states.get("a"), Some(&CircuitState::Open));
        assert_eq!(states.get("b"), Some(&CircuitState::Closed));
    }
}
