//! Suite progress indicator
//!
//! A spinner that keeps animating while a long command runs. The animation
//! is driven by a background task which is stopped through a watch channel
//! and awaited, so no task outlives the suite.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(120);

pub struct Ticker {
    bar: ProgressBar,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start ticking for a suite of `total` cases
    ///
    /// With `visible` false nothing is drawn, but the task still runs so the
    /// lifecycle is the same in both cases.
    pub fn start(total: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let tick_bar = bar.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick_bar.tick(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            bar,
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn set_message(&self, message: String) {
        self.bar.set_message(message);
    }

    /// Count one finished case
    pub fn inc(&self) {
        self.bar.inc(1);
    }

    /// Hide the spinner while `f` prints
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }

    /// Stop the background task and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.bar.finish_and_clear();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        // Only reached without stop(), e.g. when the suite future is dropped
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_joins_background_task() {
        let ticker = Ticker::start(3, false);
        assert!(ticker.is_running());
        ticker.set_message("repository_installation".to_string());
        ticker.inc();
        tokio::time::timeout(Duration::from_secs(2), ticker.stop())
            .await
            .expect("ticker did not stop");
    }

    #[tokio::test]
    async fn test_suspend_returns_value() {
        let ticker = Ticker::start(1, false);
        assert_eq!(ticker.suspend(|| 7), 7);
        ticker.stop().await;
    }
}
