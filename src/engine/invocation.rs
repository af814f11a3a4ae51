//! Invocation state shared between an adapter call and its timer
//!
//! One `InvocationState` lives for a whole invocation chain: the first
//! attempt and every retry started by the timeout callback. The retry
//! deadline is measured from the start of the chain.

use crate::domain::model::Model;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of one port attempt
#[derive(Debug, Clone)]
pub enum PortOutcome {
    /// Port disabled or unbound; nothing ran
    Skipped,
    /// Adapter succeeded
    Completed(Model),
    /// Adapter failed; the armed timer will retry
    Retrying { attempt: u32, error: String },
    /// The port gave up and its error callback ran
    Exhausted { error: String },
}

impl PortOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PortOutcome::Completed(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PortOutcome::Exhausted { .. })
    }

    pub fn model(&self) -> Option<&Model> {
        match self {
            PortOutcome::Completed(model) => Some(model),
            _ => None,
        }
    }

    pub fn into_model(self) -> Option<Model> {
        match self {
            PortOutcome::Completed(model) => Some(model),
            _ => None,
        }
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            PortOutcome::Skipped => "skipped",
            PortOutcome::Completed(_) => "completed",
            PortOutcome::Retrying { .. } => "retrying",
            PortOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

/// Lifecycle of an invocation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvocationPhase {
    Running = 0,
    Completed = 1,
    Exhausted = 2,
}

impl InvocationPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InvocationPhase::Completed,
            2 => InvocationPhase::Exhausted,
            _ => InvocationPhase::Running,
        }
    }
}

/// Atomic state of an invocation chain
#[derive(Debug)]
pub struct InvocationState {
    started: Instant,
    retry_timeout: Duration,
    phase: AtomicU8,
    attempts: AtomicU32,
    timeouts: AtomicU32,
}

impl InvocationState {
    pub fn new(retry_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            retry_timeout,
            phase: AtomicU8::new(InvocationPhase::Running as u8),
            attempts: AtomicU32::new(0),
            timeouts: AtomicU32::new(0),
        })
    }

    /// Count a new attempt, returning its 1-based number
    pub fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn record_timeout(&self) -> u32 {
        self.timeouts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the retry window since the first attempt is spent
    pub fn deadline_passed(&self) -> bool {
        self.elapsed() > self.retry_timeout
    }

    pub fn phase(&self) -> InvocationPhase {
        InvocationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == InvocationPhase::Running
    }

    /// Move to `Completed`; false when the chain already settled
    pub fn complete(&self) -> bool {
        self.transition(InvocationPhase::Completed)
    }

    /// Move to `Exhausted`; true for exactly one caller per chain
    pub fn try_exhaust(&self) -> bool {
        self.transition(InvocationPhase::Exhausted)
    }

    fn transition(&self, to: InvocationPhase) -> bool {
        self.phase
            .compare_exchange(
                InvocationPhase::Running as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Timer racing an adapter call
///
/// The timer fires `on_fire` after the delay unless cancelled first. It never
/// interrupts the adapter call.
pub(crate) struct PortTimer {
    token: CancellationToken,
}

impl PortTimer {
    pub(crate) fn arm<F>(after: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => on_fire.await,
            }
        });
        Self { token }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_exhaust_once() {
        let state = InvocationState::new(Duration::from_secs(5));
        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(state.begin_attempt(), 2);
        assert!(state.try_exhaust());
        assert!(!state.try_exhaust());
        assert!(!state.complete());
        assert_eq!(state.phase(), InvocationPhase::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let state = InvocationState::new(Duration::from_secs(5));
        assert!(!state.deadline_passed());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(state.deadline_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = PortTimer::arm(Duration::from_secs(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));

        let flag = fired.clone();
        let _timer = PortTimer::arm(Duration::from_secs(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
