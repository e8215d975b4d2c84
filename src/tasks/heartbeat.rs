use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};

use crate::config::WebSocketConfig;
use crate::websocket::OutboundMessage;

/// Background task sending `{"module":"heartbeat"}` while the session is open
pub struct HeartbeatTask {
    interval: Duration,
    jitter: f64,
    sender: mpsc::Sender<OutboundMessage>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: &WebSocketConfig,
        sender: mpsc::Sender<OutboundMessage>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            jitter: config.heartbeat_jitter,
            sender,
            shutdown,
        }
    }

    /// Send a heartbeat immediately, then once per interval until shutdown
    /// is signalled or the outbound channel closes.
    pub async fn run(mut self) {
        tracing::info!(
            heartbeat_interval_secs = self.interval.as_secs(),
            heartbeat_jitter = self.jitter,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::debug!("Heartbeat task received shutdown signal");
                    break;
                }
                sent = self.sender.send(OutboundMessage::Heartbeat) => {
                    if sent.is_err() {
                        tracing::debug!("Outbound channel closed, stopping heartbeat");
                        break;
                    }
                    tracing::trace!("Heartbeat queued");
                }
            }

            let delay = heartbeat_delay(self.interval, self.jitter);
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::debug!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Heartbeat task stopped");
    }
}

/// Wait before the next heartbeat. With `jitter > 0` the wait is drawn from
/// `[interval * (1 - jitter), interval]`, never longer than the interval.
pub fn heartbeat_delay(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return interval;
    }

    let earliest = interval.mul_f64(1.0 - jitter.min(1.0));
    if earliest >= interval {
        return interval;
    }
    rand::rng().random_range(earliest..=interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn config(interval: u64, jitter: f64) -> WebSocketConfig {
        WebSocketConfig {
            heartbeat_interval: interval,
            heartbeat_jitter: jitter,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_heartbeat_per_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = HeartbeatTask::new(&config(30, 0.0), tx, shutdown_rx);
        let handle = tokio::spawn(task.run());

        // First heartbeat goes out immediately
        let start = Instant::now();
        assert_eq!(rx.recv().await, Some(OutboundMessage::Heartbeat));
        assert!(start.elapsed() < Duration::from_secs(1));

        let mut last = Instant::now();
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(OutboundMessage::Heartbeat));
            let gap = last.elapsed();
            assert!(gap >= Duration::from_secs(30), "gap was {:?}", gap);
            assert!(gap < Duration::from_secs(31), "gap was {:?}", gap);
            last = Instant::now();
        }

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");

        // Task dropped its sender without queueing anything else
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeats_after_shutdown() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(HeartbeatTask::new(&config(30, 0.0), tx, shutdown_rx).run());
        assert_eq!(rx.recv().await, Some(OutboundMessage::Heartbeat));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_channel_closed() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        drop(rx);

        let handle = tokio::spawn(HeartbeatTask::new(&config(30, 0.0), tx, shutdown_rx).run());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_channel_full() {
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(HeartbeatTask::new(&config(1, 0.0), tx, shutdown_rx).run());
        // Let the first heartbeat fill the channel and the second block
        tokio::time::sleep(Duration::from_secs(5)).await;

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[test]
    fn test_delay_without_jitter_is_fixed() {
        let interval = Duration::from_secs(30);
        for _ in 0..10 {
            assert_eq!(heartbeat_delay(interval, 0.0), interval);
        }
    }

    #[test]
    fn test_delay_with_jitter_stays_in_range() {
        let interval = Duration::from_secs(30);
        for _ in 0..100 {
            let delay = heartbeat_delay(interval, 0.5);
            assert!(delay >= Duration::from_secs(15));
            assert!(delay <= interval);
        }
    }
}
