//! # Application Wiring
//!
//! Explicit construction of the Monitor: one `AppState` wires the store,
//! cache, broadcaster and services together, and `MonitorRuntime` owns the
//! background loops and the HTTP server lifecycle.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cortex_common::cache::TtlCache;
use cortex_common::settings::Settings;
use cortex_common::IntentRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::routers;
use crate::services::{
    AlertAggregator, DecisionEngine, HeartbeatChecker, LanguageModel, Notifier, TopologyService,
    UpstreamForwarder,
};
use crate::store::Store;
use crate::ws::Broadcaster;
use crate::MonitorError;

pub struct AppState {
    pub settings: Settings,
    pub store: Store,
    pub intents: Arc<IntentRecorder>,
    pub cache: Arc<TtlCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: DecisionEngine,
    pub forwarder: UpstreamForwarder,
    pub aggregator: AlertAggregator,
    pub notifier: Notifier,
    pub topology: TopologyService,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Store,
        intents: Arc<IntentRecorder>,
        model: Arc<dyn LanguageModel>,
    ) -> Arc<Self> {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let broadcaster = Arc::new(Broadcaster::new());

        let engine = DecisionEngine::new(model, store.clone(), Arc::clone(&intents));
        let forwarder = UpstreamForwarder::new(Duration::from_secs(30))
            .with_shared_secret(settings.monitor.registration_token.clone());
        let aggregator = AlertAggregator::new(
            store.clone(),
            Arc::clone(&intents),
            settings.monitor.alert_dedup_window_minutes,
        );
        let notifier = Notifier::new(
            settings.notifier.enabled,
            settings.notifier.bot_token.as_deref(),
            settings.notifier.chat_id.as_deref(),
        );
        let topology = TopologyService::new(store.clone(), Arc::clone(&cache));

        Arc::new(Self {
            settings,
            store,
            intents,
            cache,
            broadcaster,
            engine,
            forwarder,
            aggregator,
            notifier,
            topology,
        })
    }

    /// Invalidate every cached read view that a cluster write can affect.
    pub async fn invalidate_cluster_views(&self) {
        self.cache.clear_pattern("cluster:").await;
        self.cache.clear_pattern("agents:").await;
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(routers::auth::router())
        .merge(routers::reports::router())
        .merge(routers::cluster::router())
        .merge(routers::decisions::router())
        .merge(routers::alerts::router())
        .merge(routers::intents::router());

    Router::new()
        .route("/health", get(routers::health::health))
        .route("/ws", get(ws_upgrade))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut feed = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            event = feed.recv() => {
                match event {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }

    debug!("monitor ws client disconnected");
}

/// Owns the server plus the background loops, with an orderly shutdown.
pub struct MonitorRuntime {
    pub state: Arc<AppState>,
    heartbeat: Arc<HeartbeatChecker>,
}

impl MonitorRuntime {
    pub async fn new(settings: Settings, model: Arc<dyn LanguageModel>) -> Result<Self, MonitorError> {
        let store = Store::open(&settings.monitor.database_url).await?;
        let intents = Arc::new(
            IntentRecorder::open(&settings.intent_engine)
                .await
                .map_err(|err| MonitorError::Internal(err.to_string()))?,
        );

        let state = AppState::new(settings, store, intents, model);
        let heartbeat = Arc::new(HeartbeatChecker::new(
            state.store.clone(),
            Arc::clone(&state.broadcaster),
            state.settings.monitor.heartbeat_timeout_minutes,
            Duration::from_secs(state.settings.monitor.heartbeat_check_interval_seconds),
        ));

        Ok(Self { state, heartbeat })
    }

    /// Serve until ctrl-c, then stop the loops.
    pub async fn run(&self) -> Result<(), MonitorError> {
        self.heartbeat.start().await;
        self.spawn_report_purge();

        let addr = format!(
            "{}:{}",
            self.state.settings.monitor.host, self.state.settings.monitor.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|err| MonitorError::Internal(format!("failed to bind {addr}: {err}")))?;

        info!("monitor listening on {}", addr);

        let router = build_router(Arc::clone(&self.state));
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
            .map_err(|err| MonitorError::Internal(err.to_string()))?;

        self.heartbeat.stop().await;
        Ok(())
    }

    /// Daily purge honoring the retention window.
    fn spawn_report_purge(&self) {
        let store = self.state.store.clone();
        let retention_days = self.state.settings.probe.report_retention_days as i64;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                if let Err(err) = store.purge_reports_older_than(retention_days).await {
                    error!("report purge failed: {}", err);
                }
            }
        });
    }
}
