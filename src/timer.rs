//! Cancellable one-shot timers that post back into an actor's channel.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A single re-armable timer.
///
/// Arming always cancels the previous shot. Each shot carries a generation
/// number; the owner must call [`Timer::fire`] with the generation it
/// received and ignore the message when that returns `false`, since a
/// message can already be queued when the timer is cancelled.
#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<E, F>(&mut self, delay: Duration, tx: &UnboundedSender<E>, make: F) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(generation));
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Accept a fired message. Returns `false` for stale or cancelled shots.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let generation = timer.arm(Duration::from_millis(50), &tx, |g| g);

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert!(rx.try_recv().is_err());

        let got = rx.recv().await.unwrap();
        assert_eq!(got, generation);
        assert!(timer.fire(got));
        assert!(!timer.is_armed());
        assert!(!timer.fire(got));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_previous_shot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let first = timer.arm(Duration::from_millis(10), &tx, |g| g);
        let second = timer.arm(Duration::from_millis(20), &tx, |g| g);
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rx.recv().await.unwrap(), second);
        assert!(rx.try_recv().is_err());
        assert!(!timer.fire(first));
        assert!(timer.fire(second));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_rejects_queued_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let generation = timer.arm(Duration::from_millis(5), &tx, |g| g);
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.cancel();

        assert_eq!(rx.recv().await.unwrap(), generation);
        assert!(!timer.fire(generation));
    }
}
