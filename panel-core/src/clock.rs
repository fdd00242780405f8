//! Monotonic time and delay seam.
//!
//! Delays longer than [`COARSE_DELAY_THRESHOLD`] park the caller on the
//! platform timer. Shorter ones spin on the clock while yielding to the
//! executor, which keeps settling times tight without starving other tasks.

use core::future::Future;
use core::time::Duration;

/// Delays above this length use the coarse sleep path.
pub const COARSE_DELAY_THRESHOLD: Duration = Duration::from_millis(20);

/// Monotonic clock plus async sleep provided by the platform.
pub trait PanelClock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Suspends the caller for at least `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;

    /// Fine-grained wait: spins on [`PanelClock::now`] and yields in between.
    fn settle(&self, duration: Duration) -> impl Future<Output = ()> {
        async move {
            let deadline = self.now().saturating_add(duration);
            while self.now() < deadline {
                embassy_futures::yield_now().await;
            }
        }
    }
}

/// Waits for at least `duration`, choosing the coarse or fine path.
pub async fn delay<C: PanelClock>(clock: &C, duration: Duration) {
    if duration.is_zero() {
        return;
    }

    if duration > COARSE_DELAY_THRESHOLD {
        clock.sleep(duration).await;
    } else {
        clock.settle(duration).await;
    }
}
