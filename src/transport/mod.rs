//! Transport manager.
//!
//! Maintains a single live update channel when the backend offers one,
//! with a one-way fallback to timer-driven polling. Consumers see a
//! uniform event stream either way. Once a session has degraded to
//! polling it stays there; only a fresh start attempts the live channel
//! again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::model::LatestPayload;

/// Transport channel state. Owned here; the rest of the client only
/// observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Push channel open.
    Live,
    /// Timer-driven refresh active.
    Polling,
    /// No channel and auto-update disabled.
    Disconnected,
}

/// Uniform "new data" signal, independent of transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A payload arrived on the live channel; no network request needed.
    Pushed(LatestPayload),
    /// The poll timer fired; the consumer should refresh.
    PollTick,
    /// The live channel closed or errored; now polling.
    Degraded,
}

/// Live-channel/polling state machine.
#[derive(Clone)]
pub struct TransportManager {
    ws_url: String,
    interval: Duration,
    state: Arc<RwLock<TransportState>>,
    auto_update: Arc<RwLock<bool>>,
    events: mpsc::Sender<TransportEvent>,
    /// Stop handle for the poll timer. At most one timer is armed;
    /// re-arming signals the previous one first.
    poll_stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl TransportManager {
    /// Build a manager for `base_url` and hand back the event stream.
    pub fn new(base_url: &str, interval: Duration) -> (Self, mpsc::Receiver<TransportEvent>) {
        let ws_url = base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://")
            + "/ws";

        let (tx, rx) = mpsc::channel(64);

        let manager = Self {
            ws_url,
            interval,
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            auto_update: Arc::new(RwLock::new(true)),
            events: tx,
            poll_stop: Arc::new(Mutex::new(None)),
        };

        (manager, rx)
    }

    pub async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    pub async fn auto_update(&self) -> bool {
        *self.auto_update.read().await
    }

    /// Attempt the live channel; fall to polling if it cannot be
    /// opened. Returns the handle of the channel task.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();

        tokio::spawn(async move {
            match tokio_tungstenite::connect_async(&manager.ws_url).await {
                Ok((mut ws_stream, _response)) => {
                    tracing::info!("Live channel established at {}", manager.ws_url);
                    *manager.state.write().await = TransportState::Live;

                    while let Some(msg_result) = ws_stream.next().await {
                        match msg_result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<LatestPayload>(&text) {
                                    Ok(payload) if payload.is_data() => {
                                        if manager
                                            .events
                                            .send(TransportEvent::Pushed(payload))
                                            .await
                                            .is_err()
                                        {
                                            return;
                                        }
                                    }
                                    Ok(_) => {
                                        tracing::debug!("Live channel: non-data message skipped");
                                    }
                                    Err(e) => {
                                        tracing::debug!("Live channel: unparseable frame: {}", e);
                                    }
                                }
                            }
                            Ok(Message::Ping(data)) => {
                                let _ = ws_stream.send(Message::Pong(data)).await;
                            }
                            Ok(Message::Close(_)) => {
                                tracing::info!("Live channel closed by server");
                                break;
                            }
                            Err(e) => {
                                tracing::warn!("Live channel error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }

                    manager.degrade().await;
                }
                Err(e) => {
                    tracing::warn!("Live channel unavailable: {}; polling instead", e);
                    manager.degrade().await;
                }
            }
        })
    }

    /// Leave Live for Polling. Idempotent: repeated close events arm at
    /// most one timer.
    pub async fn degrade(&self) {
        {
            let mut state = self.state.write().await;
            if *state == TransportState::Polling {
                return;
            }
            *state = TransportState::Polling;
        }

        let _ = self.events.send(TransportEvent::Degraded).await;
        self.arm_poll_timer().await;
    }

    /// Toggle the auto-update flag. Disabling cancels the poll timer;
    /// enabling re-arms it unless the live channel is up.
    pub async fn set_auto_update(&self, enabled: bool) {
        *self.auto_update.write().await = enabled;

        if !enabled {
            self.stop_poll_timer().await;
            let mut state = self.state.write().await;
            if *state == TransportState::Polling {
                *state = TransportState::Disconnected;
            }
            return;
        }

        let state = *self.state.read().await;
        if state != TransportState::Live {
            *self.state.write().await = TransportState::Polling;
            self.arm_poll_timer().await;
        }
    }

    /// Arm the poll timer, clearing any prior one first.
    async fn arm_poll_timer(&self) {
        if !*self.auto_update.read().await {
            let mut state = self.state.write().await;
            if *state != TransportState::Live {
                *state = TransportState::Disconnected;
            }
            return;
        }

        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        {
            let mut guard = self.poll_stop.lock().await;
            if let Some(prev) = guard.replace(stop_tx) {
                let _ = prev.send(());
            }
        }

        let events = self.events.clone();
        let interval_duration = self.interval;

        tokio::spawn(async move {
            // Startup jitter to avoid a thundering herd of clients
            // polling in lockstep.
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        if events.send(TransportEvent::PollTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn stop_poll_timer(&self) {
        let mut guard = self.poll_stop.lock().await;
        if let Some(stop_tx) = guard.take() {
            let _ = stop_tx.send(());
        }
    }

    /// True while a poll timer is outstanding.
    pub async fn poll_timer_armed(&self) -> bool {
        self.poll_stop.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(interval: Duration) -> (TransportManager, mpsc::Receiver<TransportEvent>) {
        TransportManager::new("http://127.0.0.1:9", interval)
    }

    fn drain_ticks(rx: &mut mpsc::Receiver<TransportEvent>) -> (usize, usize) {
        let mut ticks = 0;
        let mut degraded = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                TransportEvent::PollTick => ticks += 1,
                TransportEvent::Degraded => degraded += 1,
                TransportEvent::Pushed(_) => {}
            }
        }
        (ticks, degraded)
    }

    /// Let spawned timer tasks reach their first await point.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_degrade_arms_single_timer() {
        let (manager, mut rx) = manager(Duration::from_secs(30));

        manager.degrade().await;
        manager.degrade().await;
        manager.degrade().await;

        assert_eq!(manager.state().await, TransportState::Polling);
        assert!(manager.poll_timer_armed().await);

        // One 30s timer: an immediate tick once the startup jitter
        // elapses, then one per interval. A duplicate timer would
        // double the count.
        settle().await;
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(30)).await;
            settle().await;
        }

        let (ticks, degraded) = drain_ticks(&mut rx);
        assert!((3..=4).contains(&ticks), "expected one timer's ticks, saw {}", ticks);
        assert_eq!(degraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_auto_update_cancels_timer() {
        let (manager, mut rx) = manager(Duration::from_secs(30));
        manager.degrade().await;

        manager.set_auto_update(false).await;
        assert!(!manager.poll_timer_armed().await);
        assert_eq!(manager.state().await, TransportState::Disconnected);

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        let (ticks, _) = drain_ticks(&mut rx);
        // The cancelled timer may have fired its immediate first tick
        // before the stop landed, but nothing after.
        assert!(ticks <= 1, "expected no further ticks, saw {}", ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_auto_update_rearms_when_not_live() {
        let (manager, mut rx) = manager(Duration::from_secs(30));
        manager.degrade().await;
        manager.set_auto_update(false).await;
        drain_ticks(&mut rx);

        manager.set_auto_update(true).await;
        assert_eq!(manager.state().await, TransportState::Polling);
        assert!(manager.poll_timer_armed().await);

        settle().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        settle().await;

        let (ticks, _) = drain_ticks(&mut rx);
        assert!(ticks >= 1);
    }

    #[tokio::test]
    async fn test_unreachable_live_endpoint_falls_to_polling() {
        let (manager, _rx) = manager(Duration::from_secs(30));

        let handle = manager.start();
        let _ = handle.await;

        assert_eq!(manager.state().await, TransportState::Polling);
        assert!(manager.poll_timer_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrade_while_auto_update_disabled_does_not_arm() {
        let (manager, _rx) = manager(Duration::from_secs(30));
        manager.set_auto_update(false).await;

        manager.degrade().await;

        assert!(!manager.poll_timer_armed().await);
        assert_eq!(manager.state().await, TransportState::Disconnected);
    }
}
