// File: idlebot-core/src/worker/timers.rs

use std::time::Duration;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use idlebot_common::models::ReconnectPolicy;

/// A single timer that can be re-armed.
///
/// Arming aborts whatever the slot held before and bumps its generation;
/// ticks carry the generation they were armed with so late ticks from an
/// aborted timer can be recognised and dropped.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `make(generation)` every `period`, first after one full period.
    pub fn arm_interval<T, F>(&mut self, period: Duration, tx: mpsc::UnboundedSender<T>, make: F)
    where
        T: Send + 'static,
        F: Fn(u64) -> T + Send + 'static,
    {
        let generation = self.rearm();
        self.handle = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Fires `make(generation)` once after `delay`.
    pub fn arm_once<T, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<T>, make: F)
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        let generation = self.rearm();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(make(generation));
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// True if a tick with this generation belongs to the armed timer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// One-shot timers disarm themselves once their tick is consumed.
    pub fn disarm(&mut self) {
        self.handle = None;
    }

    fn rearm(&mut self) -> u64 {
        self.cancel();
        self.generation
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Delay before the `attempt`-th consecutive reconnect (1-based).
pub fn reconnect_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    match *policy {
        ReconnectPolicy::Fixed { delay_secs } => Duration::from_secs(delay_secs),
        ReconnectPolicy::Backoff { base_secs, max_secs } => {
            let exponent = attempt.saturating_sub(1).min(20);
            let ceiling = base_secs
                .saturating_mul(1u64 << exponent)
                .min(max_secs.max(base_secs));
            // Half fixed, half random.
            let half = ceiling / 2;
            let jitter = if half == 0 { 0 } else { rand::rng().random_range(0..=half) };
            Duration::from_secs(ceiling - half + jitter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_leaves_one_live_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        for _ in 0..10 {
            slot.arm_interval(Duration::from_secs(600), tx.clone(), |g| g);
        }

        time::sleep(Duration::from_secs(601)).await;
        let mut ticks = Vec::new();
        while let Ok(g) = rx.try_recv() {
            ticks.push(g);
        }
        assert_eq!(ticks.len(), 1);
        assert!(slot.is_current(ticks[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tick_is_not_current() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        slot.arm_once(Duration::from_secs(60), tx, |g| g);
        let armed_generation = slot.generation;
        slot.cancel();
        assert!(!slot.is_current(armed_generation));

        time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fixed_policy_ignores_attempts() {
        let policy = ReconnectPolicy::Fixed { delay_secs: 60 };
        assert_eq!(reconnect_delay(&policy, 1), Duration::from_secs(60));
        assert_eq!(reconnect_delay(&policy, 9), Duration::from_secs(60));
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let policy = ReconnectPolicy::Backoff { base_secs: 60, max_secs: 1800 };
        for attempt in 1..=12 {
            let ceiling = (60u64 << (attempt - 1).min(20)).min(1800);
            let delay = reconnect_delay(&policy, attempt).as_secs();
            assert!(delay >= ceiling / 2 && delay <= ceiling, "attempt {attempt}: {delay}");
        }
    }
}
