// src/sched.rs
//! Wait-until-instant scheduling with an injectable clock.
//!
//! The remote side of a coordinated run sleeps in shell; the local side uses
//! this primitive so a `--start-at` run can be cancelled and so tests can
//! drive a virtual clock instead of real time.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::constants::WAIT_POLL_MAX;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    Cancelled,
}

/// Block until the clock reaches `target` or `cancel` fires. Sleeps are
/// bounded so cancellation is prompt and clock skew is re-checked.
pub async fn wait_until(
    clock: &dyn Clock,
    target: DateTime<Utc>,
    cancel: &Arc<Notify>,
) -> WaitOutcome {
    loop {
        let now = clock.now_utc();
        let remaining = match (target - now).to_std() {
            Ok(d) if !d.is_zero() => d,
            _ => return WaitOutcome::Reached,
        };
        let sleep_for = remaining.min(WAIT_POLL_MAX);
        tokio::select! {
            _ = cancel.notified() => return WaitOutcome::Cancelled,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// Clock that only moves when the test advances it.
    struct VirtualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl VirtualClock {
        fn at(now: DateTime<Utc>) -> Self {
            VirtualClock { now: Mutex::new(now) }
        }
    }

    impl Clock for VirtualClock {
        fn now_utc(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn past_target_returns_immediately() {
        let now = Utc::now();
        let clock = VirtualClock::at(now);
        let cancel = Arc::new(Notify::new());
        let outcome = wait_until(&clock, now - ChronoDuration::minutes(5), &cancel).await;
        assert_eq!(outcome, WaitOutcome::Reached);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let now = Utc::now();
        let clock = SystemClock;
        let cancel = Arc::new(Notify::new());
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.notify_one();
        });
        let started = std::time::Instant::now();
        let outcome = wait_until(&clock, now + ChronoDuration::hours(1), &cancel).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_once_clock_advances() {
        let start = Utc::now();
        let clock = Arc::new(VirtualClock::at(start));
        let cancel = Arc::new(Notify::new());

        let target = start + ChronoDuration::seconds(30);
        // Move the virtual clock past the target; paused tokio time
        // auto-advances through the bounded sleeps.
        *clock.now.lock().unwrap() = target + ChronoDuration::seconds(1);
        let outcome = wait_until(clock.as_ref(), target, &cancel).await;
        assert_eq!(outcome, WaitOutcome::Reached);
    }
}
