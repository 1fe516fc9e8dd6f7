/// Clock contract behind the two run modes
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time. The simulated clock reports the active bar's timestamp.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep until `deadline`. No-op for the simulated clock; the wall clock
    /// wakes early when shutdown is requested.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Bar-driven clock for backtests. Each `advance` call moves exactly one bar.
pub struct SimClock {
    timestamps: Vec<DateTime<Utc>>,
    cursor: AtomicUsize,
}

impl SimClock {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        SimClock {
            timestamps,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Step to the next bar; returns its timestamp, or None past the end
    pub fn advance(&self) -> Option<DateTime<Utc>> {
        let next = self.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        self.timestamps.get(next).copied()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) + 1 >= self.timestamps.len()
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        let idx = self.cursor.load(Ordering::SeqCst).min(
            self.timestamps.len().saturating_sub(1),
        );
        self.timestamps
            .get(idx)
            .copied()
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }

    async fn sleep_until(&self, _deadline: DateTime<Utc>) {}
}

/// Wall clock for paper/live sessions, cancellable via the shutdown channel
pub struct WallClock {
    shutdown: watch::Receiver<bool>,
}

impl WallClock {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        WallClock { shutdown }
    }
}

#[async_trait]
impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let wait = deadline - Utc::now();
        let Ok(wait) = wait.to_std() else {
            return; // deadline already passed
        };

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                debug!("sleep_until cancelled by shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 4, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sim_clock_advances_one_bar_per_call() {
        let clock = SimClock::new(vec![ts(0), ts(5), ts(10)]);
        assert_eq!(clock.now(), ts(0));

        assert_eq!(clock.advance(), Some(ts(5)));
        assert_eq!(clock.now(), ts(5));

        assert_eq!(clock.advance(), Some(ts(10)));
        assert!(clock.is_exhausted());
        assert_eq!(clock.advance(), None);

        // sleep is a no-op
        clock.sleep_until(ts(59)).await;
    }

    #[tokio::test]
    async fn test_wall_clock_sleep_cancelled_by_shutdown() {
        let (tx, rx) = watch::channel(false);
        let clock = WallClock::new(rx);

        let deadline = Utc::now() + chrono::Duration::seconds(30);
        let sleeper = tokio::spawn(async move { clock.sleep_until(deadline).await });

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), sleeper)
            .await
            .expect("sleep did not cancel")
            .unwrap();
    }
}
