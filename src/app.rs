//! Application state and event dispatch.
//!
//! One explicit state object owns the components instead of ambient
//! globals. Transport events are consumed in a single dispatch loop and
//! re-emitted as typed client events; the presenter subscribes to those
//! and never sees the transport directly.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::cache::{self, FreshnessCache, Notification};
use crate::config::{ClientConfig, Settings};
use crate::fetcher::{ConnectivityStatus, DataFetcher, RefreshOutcome};
use crate::health::activity::{ActivityLog, ActivitySource};
use crate::health::{self, SnapshotView};
use crate::model::{Metric, SensorSnapshot, SeriesPoint, SystemInfo};
use crate::transport::{TransportEvent, TransportManager};

/// Typed events consumed by the presenter.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The snapshot was replaced; the view carries everything the
    /// gauges and health panel need.
    SnapshotUpdated(Box<SnapshotView>),
    /// A refresh confirmed nothing changed.
    SnapshotUnchanged,
    Connectivity(ConnectivityStatus),
    /// One or more chart series were replaced.
    SeriesUpdated,
    SystemInfoUpdated(SystemInfo),
    /// A background-sync wake-up asked for a refresh.
    SyncRequested,
    Notification(Notification),
}

/// Application state with a defined initialization and reset lifecycle.
pub struct App {
    pub config: ClientConfig,
    pub settings: Arc<Mutex<Settings>>,
    pub cache: FreshnessCache,
    pub fetcher: DataFetcher,
    pub transport: TransportManager,
    pub activity: Arc<Mutex<ActivityLog>>,
    events: broadcast::Sender<ClientEvent>,
}

impl App {
    pub fn new(
        config: ClientConfig,
        settings: Settings,
        cache: FreshnessCache,
        fetcher: DataFetcher,
        transport: TransportManager,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            settings: Arc::new(Mutex::new(settings)),
            cache,
            fetcher,
            transport,
            activity: Arc::new(Mutex::new(ActivityLog::new())),
            events,
        }
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    /// Consume transport events until the stream closes.
    pub async fn run(&self, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        self.activity
            .lock()
            .await
            .record(ActivitySource::System, "Dashboard initialized");

        while let Some(event) = transport_rx.recv().await {
            match event {
                TransportEvent::Pushed(payload) => match self.fetcher.apply_pushed_data(payload).await {
                    Ok(RefreshOutcome::Updated { previous }) => {
                        self.handle_update(previous).await;
                        self.emit(ClientEvent::Connectivity(ConnectivityStatus::Live));
                    }
                    Ok(RefreshOutcome::NotModified) => {}
                    Err(e) => {
                        tracing::warn!("Pushed payload rejected: {}", e);
                    }
                },
                TransportEvent::PollTick => {
                    self.refresh(false).await;
                }
                TransportEvent::Degraded => {
                    self.activity.lock().await.record(
                        ActivitySource::System,
                        "Live channel lost. Polling for updates.",
                    );
                }
            }
        }
    }

    /// Record significant changes against the superseded snapshot and
    /// emit the freshly derived view.
    async fn handle_update(&self, previous: SensorSnapshot) {
        let current = self.fetcher.snapshot().await;
        self.activity
            .lock()
            .await
            .record_changes(&previous, &current);

        let view = {
            let settings = self.settings.lock().await;
            health::view(&current, &settings)
        };
        self.emit(ClientEvent::SnapshotUpdated(Box::new(view)));
    }

    /// One refresh pass: conditional latest fetch, activity diff, and
    /// event emission. Never panics; failures become a connectivity
    /// indicator plus an activity entry.
    pub async fn refresh(&self, force: bool) {
        match self.fetcher.refresh_latest(force).await {
            Ok(RefreshOutcome::Updated { previous }) => {
                self.handle_update(previous).await;
            }
            Ok(RefreshOutcome::NotModified) => {
                self.emit(ClientEvent::SnapshotUnchanged);
            }
            Err(e) => {
                tracing::error!("Refresh failed: {}", e);
                self.activity
                    .lock()
                    .await
                    .record(ActivitySource::Error, format!("Refresh failed: {}", e));
            }
        }

        self.emit(ClientEvent::Connectivity(self.fetcher.connectivity().await));
    }

    /// Fetch every metric's chart series, waiting for all requests.
    /// Returns how many metrics were updated; failures keep prior data.
    pub async fn load_series(&self) -> usize {
        let results = self.fetcher.refresh_all_series().await;
        let updated = results.iter().filter(|(_, result)| result.is_ok()).count();
        if updated > 0 {
            self.emit(ClientEvent::SeriesUpdated);
        }
        updated
    }

    /// A metric's series trimmed to the configured chart time range.
    pub async fn series_for_display(&self, metric: Metric, now_epoch: f64) -> Vec<SeriesPoint> {
        let window = self.settings.lock().await.chart_time_range.window();
        let from = now_epoch - window.as_secs_f64();

        self.fetcher
            .series(metric)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|point| point.time >= from)
            .collect()
    }

    /// Fetch host resource utilization for the system-status view.
    pub async fn load_system_info(&self) {
        match self.fetcher.fetch_system_info().await {
            Ok(info) => self.emit(ClientEvent::SystemInfoUpdated(info)),
            Err(e) => {
                tracing::error!("System info fetch failed: {}", e);
                self.activity
                    .lock()
                    .await
                    .record(ActivitySource::Error, format!("System info fetch failed: {}", e));
            }
        }
    }

    /// Handle a background-sync wake-up for the given tag.
    pub async fn background_sync(&self, tag: &str) {
        if !cache::sync_requests_refresh(tag) {
            return;
        }
        self.emit(ClientEvent::SyncRequested);
        self.refresh(false).await;
    }

    /// Handle an incoming push payload.
    pub async fn push(&self, payload: &[u8]) {
        match cache::notification_for_push(payload) {
            Some(notification) => {
                tracing::info!("Push notification: {}", notification.body);
                self.emit(ClientEvent::Notification(notification));
            }
            None => {
                tracing::warn!("Malformed push payload dropped");
            }
        }
    }

    /// Replace the settings and persist the blob.
    pub async fn update_settings(&self, new_settings: Settings) -> std::io::Result<()> {
        {
            let mut settings = self.settings.lock().await;
            *settings = new_settings.clone();
        }
        new_settings.save(&self.config.settings_path)?;
        self.activity
            .lock()
            .await
            .record(ActivitySource::System, "Settings updated");
        Ok(())
    }

    /// Reset settings to defaults and remove the persisted blob.
    pub async fn reset_settings(&self) -> std::io::Result<()> {
        {
            let mut settings = self.settings.lock().await;
            *settings = Settings::default();
        }
        match std::fs::remove_file(&self.config.settings_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.activity
            .lock()
            .await
            .record(ActivitySource::System, "Settings reset to defaults");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::model::{LatestPayload, Metric, Reading};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Base URL with nothing listening, so network attempts fail fast.
    const DEAD_BASE: &str = "http://127.0.0.1:9";

    fn app() -> (tempfile::TempDir, App, mpsc::Receiver<TransportEvent>) {
        let dir = tempdir().unwrap();
        let config = ClientConfig {
            base_url: DEAD_BASE.to_string(),
            cache_db_path: dir.path().join("cache.db").to_string_lossy().into_owned(),
            settings_path: dir.path().join("settings.json").to_string_lossy().into_owned(),
        };

        let store = CacheStore::new(&config.cache_db_path).unwrap();
        let cache = FreshnessCache::new(DEAD_BASE, store, Duration::from_secs(2)).unwrap();
        let fetcher = DataFetcher::new(cache.clone(), Duration::from_secs(5));
        let (transport, transport_rx) =
            TransportManager::new(DEAD_BASE, Duration::from_secs(30));

        let app = App::new(config, Settings::default(), cache, fetcher, transport);
        (dir, app, transport_rx)
    }

    fn sample_payload() -> LatestPayload {
        LatestPayload {
            temperature: Some(Reading { value: 22.5, time: 1.0 }),
            ph: Some(Reading { value: 6.2, time: 1.0 }),
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event wait timed out")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_pushed_payload_flows_to_snapshot_and_events() {
        let (_dir, app, _transport_rx) = app();
        let app = Arc::new(app);
        let mut events = app.subscribe();

        let (tx, rx) = mpsc::channel(4);
        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run(rx).await })
        };

        tx.send(TransportEvent::Pushed(sample_payload()))
            .await
            .unwrap();

        match next_event(&mut events).await {
            ClientEvent::SnapshotUpdated(view) => {
                assert_eq!(
                    view.statuses[&Metric::Ph],
                    crate::health::Status::Good
                );
            }
            other => panic!("expected snapshot update, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::Connectivity(ConnectivityStatus::Live)
        ));
        assert_eq!(
            app.fetcher.snapshot().await.reading(Metric::Ph).unwrap().value,
            6.2
        );

        drop(tx);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn test_load_series_offline_updates_nothing() {
        let (_dir, app, _rx) = app();
        let mut events = app.subscribe();

        let updated = app.load_series().await;

        assert_eq!(updated, 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_series_for_display_respects_time_range() {
        let (_dir, app, _rx) = app();
        let now = 1_700_000_000.0;
        let day = 24.0 * 60.0 * 60.0;

        // One point well inside the day window, one outside it. Seeded
        // through the freshness cache: the dead backend forces the
        // fetch onto the cached-fallback path.
        let body = format!(
            r#"[{{"time": {}, "value": 6.0}}, {{"time": {}, "value": 6.5}}]"#,
            now - 2.0 * day,
            now - 60.0,
        );
        let key = cache::cache_key(app.cache.origin(), "/data/pH", None);
        app.cache
            .store()
            .put(
                cache::CACHE_GENERATION,
                &key,
                body.as_bytes(),
                "application/json",
                chrono::Utc::now(),
            )
            .unwrap();
        app.fetcher.fetch_series(Metric::Ph).await.unwrap();

        let points = app.series_for_display(Metric::Ph, now).await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 6.5);
    }

    #[tokio::test]
    async fn test_refresh_offline_records_error_and_connectivity() {
        let (_dir, app, _rx) = app();
        let mut events = app.subscribe();

        app.refresh(false).await;

        let activity = app.activity.lock().await;
        assert!(activity
            .entries()
            .any(|e| e.source == ActivitySource::Error));
        drop(activity);

        match next_event(&mut events).await {
            ClientEvent::Connectivity(status) => assert!(matches!(
                status,
                ConnectivityStatus::Offline | ConnectivityStatus::SlowConnection
            )),
            other => panic!("expected connectivity event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_background_sync_ignores_other_tags() {
        let (_dir, app, _rx) = app();
        let mut events = app.subscribe();

        app.background_sync("sync-unrelated").await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_background_sync_emits_and_refreshes() {
        let (_dir, app, _rx) = app();
        let mut events = app.subscribe();

        app.background_sync(cache::SYNC_TAG).await;

        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::SyncRequested
        ));
    }

    #[tokio::test]
    async fn test_push_emits_notification() {
        let (_dir, app, _rx) = app();
        let mut events = app.subscribe();

        app.push(br#"{"message":"pH drift detected","url":"/charts"}"#)
            .await;

        match next_event(&mut events).await {
            ClientEvent::Notification(notification) => {
                assert_eq!(notification.body, "pH drift detected");
                assert_eq!(notification.url, "/charts");
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_settings_persists_blob() {
        let (_dir, app, _rx) = app();

        let mut new_settings = Settings::default();
        new_settings.refresh_interval = 10_000;
        app.update_settings(new_settings.clone()).await.unwrap();

        let reloaded = Settings::load(&app.config.settings_path);
        assert_eq!(reloaded, new_settings);

        app.reset_settings().await.unwrap();
        assert_eq!(
            Settings::load(&app.config.settings_path),
            Settings::default()
        );
    }
}
