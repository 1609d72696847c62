//! Coalesces a burst of "kick" signals into a single downstream notification.
//!
//! Used by the watch-based resolver and the config source's prefix watcher to
//! avoid re-fetching on every individual change event in a burst.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Sending half of a debounced kick channel. Cloneable; any clone can signal
/// that a fetch-and-notify cycle should run.
#[derive(Clone)]
pub struct Kicker {
    tx: mpsc::Sender<()>,
}

impl Kicker {
    /// Signal that something changed. Non-blocking: if the channel is full
    /// (capacity 1, a kick is already pending) the signal is dropped, since a
    /// pending kick already implies a future fetch will observe this change.
    pub fn kick(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Consumes kicks and yields at most one coalesced notification per debounce
/// window.
pub struct Debouncer {
    rx: mpsc::Receiver<()>,
    window: Duration,
}

/// Creates a linked `Kicker`/`Debouncer` pair with a capacity-1 channel: a
/// pending kick is sufficient, duplicates collapse for free.
pub fn debounced(window: Duration) -> (Kicker, Debouncer) {
    let (tx, rx) = mpsc::channel(1);
    (Kicker { tx }, Debouncer { rx, window })
}

impl Debouncer {
    /// Waits for the next kick, then drains any further kicks that arrive
    /// within `window`, returning once the burst goes quiet. Returns `None`
    /// once the paired `Kicker` (and all its clones) have been dropped.
    pub async fn next(&mut self) -> Option<()> {
        self.rx.recv().await?;
        if self.window.is_zero() {
            return Some(());
        }
        let mut deadline = Instant::now() + self.window;
        loop {
            tokio::select! {
                biased;
                _ = time::sleep_until(deadline) => return Some(()),
                maybe = self.rx.recv() => {
                    if maybe.is_none() {
                        // Channel closed mid-burst; still deliver the pending kick.
                        return Some(());
                    }
                    deadline = Instant::now() + self.window;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn coalesces_a_burst_into_one_notification() {
        let (kicker, mut debouncer) = debounced(Duration::from_millis(50));
        kicker.kick();
        kicker.kick();
        kicker.kick();

        let recv = tokio::spawn(async move { debouncer.next().await });
        time::advance(Duration::from_millis(60)).await;
        assert_eq!(recv.await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn zero_window_fires_immediately() {
        let (kicker, mut debouncer) = debounced(Duration::ZERO);
        kicker.kick();
        assert_eq!(debouncer.next().await, Some(()));
    }

    #[tokio::test]
    async fn closed_kicker_yields_none() {
        let (kicker, mut debouncer) = debounced(Duration::from_millis(10));
        drop(kicker);
        assert_eq!(debouncer.next().await, None);
    }
}
