use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use ctrl_core::ConfigDefaults;
use ctrl_proxy::{Pipeline, PipelineOptions};
use ctrl_store::{ConfigStore, CookieJar};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::error::ServerError;
use crate::handlers;
use crate::notifier::ReloadNotifier;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Per-viewer push queue depth.
    pub max_send_queue: usize,
    /// Values restored by `/api/reset`.
    pub defaults: ConfigDefaults,
    pub proxy: PipelineOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 1337)),
            max_send_queue: 16,
            defaults: ConfigDefaults::default(),
            proxy: PipelineOptions::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub jar: Arc<CookieJar>,
    pub pipeline: Arc<Pipeline>,
    pub registry: Arc<ClientRegistry>,
    pub notifier: ReloadNotifier,
    pub defaults: Arc<ConfigDefaults>,
    pub public_authority: Option<Arc<str>>,
    /// Last height reported by a viewer, for operators only.
    pub page_height: Arc<Mutex<Option<f64>>>,
}

/// Build the Axum router: the control API under `/api`, the proxy for
/// everything else.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/config", get(handlers::get_config).post(handlers::post_config))
        .route("/api/reset", post(handlers::reset))
        .route("/api/clear-cookies", post(handlers::clear_cookies))
        .route("/api/report-height", post(handlers::report_height))
        .route("/api/version", get(handlers::version))
        .route("/api/status", get(handlers::status))
        .route("/api/health", get(handlers::health))
        .route("/api/ws", get(handlers::ws_handler))
        .layer(CorsLayer::permissive());

    Router::new()
        .merge(api)
        .fallback(handlers::proxy)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. The returned handle keeps background tasks
/// alive and shuts the server down.
pub async fn start(
    config: ServerConfig,
    config_store: Arc<ConfigStore>,
    jar: Arc<CookieJar>,
) -> Result<ServerHandle, ServerError> {
    let public_authority = config.proxy.public_authority.as_deref().map(Arc::from);
    let pipeline = Pipeline::new(Arc::clone(&config_store), Arc::clone(&jar), config.proxy)?;

    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let notifier = ReloadNotifier::new(64);
    let bridge = notifier.start_bridge(Arc::clone(&registry));
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), Duration::from_secs(60));

    let state = AppState {
        config: config_store,
        jar,
        pipeline: Arc::new(pipeline),
        registry,
        notifier,
        defaults: Arc::new(config.defaults),
        public_authority,
        page_height: Arc::new(Mutex::new(None)),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "ctrl server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router = build_router(state);
    let server = tokio::spawn(async move {
        let signal = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(signal).await {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        shutdown_tx: Some(shutdown_tx),
        server,
        bridge,
        cleanup,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and give in-flight requests a short grace
    /// period before the server task is dropped.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server).await.is_err() {
            tracing::warn!("in-flight requests outlived the shutdown grace period");
            self.server.abort();
        }
        self.bridge.abort();
        self.cleanup.abort();
        tracing::info!("ctrl server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrl_store::Database;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    type WsStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    struct TestServer {
        handle: ServerHandle,
        config: Arc<ConfigStore>,
        jar: Arc<CookieJar>,
        db: Database,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("http://127.0.0.1:{}{path}", self.handle.port)
        }
    }

    async fn spawn(target_url: &str) -> TestServer {
        let db = Database::in_memory().unwrap();
        let defaults = ConfigDefaults {
            target_url: target_url.into(),
            ..Default::default()
        };
        let config = Arc::new(ConfigStore::open(db.clone(), &defaults).unwrap());
        let jar = Arc::new(CookieJar::open(db.clone()).unwrap());
        let server_config = ServerConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            defaults,
            ..Default::default()
        };
        let handle = start(server_config, Arc::clone(&config), Arc::clone(&jar))
            .await
            .unwrap();
        TestServer {
            handle,
            config,
            jar,
            db,
        }
    }

    async fn next_text(ws: &mut WsStream) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timeout waiting for push")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let server = spawn("https://news.example.com/").await;
        assert!(server.handle.port > 0);

        let resp = reqwest::get(server.url("/api/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn config_round_trip_bumps_version() {
        let server = spawn("https://news.example.com/").await;
        let client = reqwest::Client::new();
        let before = server.config.version();

        let resp = client
            .post(server.url("/api/config"))
            .json(&json!({ "scaleFactor": 0.5, "autoScroll": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["scaleFactor"], 0.5);
        assert_eq!(body["autoScroll"], true);
        assert_eq!(body["targetUrl"], "https://news.example.com/");
        assert!(body["lastModified"].as_i64().unwrap() > before);

        let version: Value = reqwest::get(server.url("/api/version")).await.unwrap().json().await.unwrap();
        assert_eq!(version["lastModified"], body["lastModified"]);

        let current: Value = reqwest::get(server.url("/api/config")).await.unwrap().json().await.unwrap();
        assert_eq!(current["scaleFactor"], 0.5);
    }

    #[tokio::test]
    async fn websocket_receives_version_on_connect_and_after_commit() {
        let server = spawn("https://news.example.com/").await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/api/ws", server.handle.port))
            .await
            .unwrap();

        let hello = next_text(&mut ws).await;
        assert_eq!(hello, json!({ "type": "reload", "lastModified": server.config.version() }));

        let body: Value = reqwest::Client::new()
            .post(server.url("/api/config"))
            .json(&json!({ "targetUrl": "https://weather.example.org/" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let version = body["lastModified"].as_i64().unwrap();
        assert!(version > hello["lastModified"].as_i64().unwrap());

        let pushed = next_text(&mut ws).await;
        assert_eq!(pushed, json!({ "type": "reload", "lastModified": version }));
    }

    #[tokio::test]
    async fn malformed_config_is_rejected_without_change() {
        let server = spawn("https://news.example.com/").await;
        let client = reqwest::Client::new();
        let before = server.config.snapshot();

        let resp = client
            .post(server.url("/api/config"))
            .header("content-type", "application/json")
            .body("{\"scaleFactor\":")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(server.url("/api/config"))
            .json(&json!({ "targetUrl": "ftp://files.example.com/" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("invalid target URL"));

        assert_eq!(*server.config.snapshot(), *before);
    }

    #[tokio::test]
    async fn target_pointing_at_proxy_is_refused() {
        let server = spawn("https://news.example.com/").await;
        let resp = reqwest::Client::new()
            .post(server.url("/api/config"))
            .json(&json!({ "targetUrl": server.url("/") }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(server.config.snapshot().target_url, "https://news.example.com/");
    }

    #[tokio::test]
    async fn reset_restores_defaults_and_keeps_history() {
        let server = spawn("https://news.example.com/").await;
        let client = reqwest::Client::new();
        client
            .post(server.url("/api/config"))
            .json(&json!({ "targetUrl": "https://weather.example.org/", "scaleFactor": 2.0 }))
            .send()
            .await
            .unwrap();

        let body: Value = client
            .post(server.url("/api/reset"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["targetUrl"], "https://news.example.com/");
        assert_eq!(body["scaleFactor"], 1.0);
        let history: Vec<&str> = body["history"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|item| item["url"].as_str())
            .collect();
        assert!(history.contains(&"https://weather.example.org/"), "{history:?}");
    }

    #[tokio::test]
    async fn clear_cookies_empties_jar_and_bumps_version() {
        let server = spawn("https://news.example.com/").await;
        server
            .jar
            .merge([ctrl_core::CookieDirective::Upsert(ctrl_core::CookieEntry {
                name: "sid".into(),
                value: "abc".into(),
                domain: "news.example.com".into(),
                path: "/".into(),
            })])
            .unwrap();
        let before = server.config.version();

        let body: Value = reqwest::Client::new()
            .post(server.url("/api/clear-cookies"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["cleared"], 1);
        assert!(body["lastModified"].as_i64().unwrap() > before);
        assert!(server.jar.snapshot().is_empty());
    }

    #[tokio::test]
    async fn clear_cookies_succeeds_when_version_bump_fails() {
        let server = spawn("https://news.example.com/").await;
        server
            .jar
            .merge([ctrl_core::CookieDirective::Upsert(ctrl_core::CookieEntry {
                name: "sid".into(),
                value: "abc".into(),
                domain: "news.example.com".into(),
                path: "/".into(),
            })])
            .unwrap();
        let before = server.config.version();
        server
            .db
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE config")?;
                Ok(())
            })
            .unwrap();

        let resp = reqwest::Client::new()
            .post(server.url("/api/clear-cookies"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["cleared"], 1);
        assert_eq!(body["lastModified"], before);
        assert!(server.jar.snapshot().is_empty());
    }

    #[tokio::test]
    async fn report_height_validates_and_shows_in_status() {
        let server = spawn("https://news.example.com/").await;
        let client = reqwest::Client::new();

        let bad = client
            .post(server.url("/api/report-height"))
            .json(&json!({ "height": "tall" }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        let negative = client
            .post(server.url("/api/report-height"))
            .json(&json!({ "height": -5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(negative.status(), 400);

        let ok = client
            .post(server.url("/api/report-height"))
            .json(&json!({ "height": 4321 }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 204);

        let status: Value = reqwest::get(server.url("/api/status")).await.unwrap().json().await.unwrap();
        assert_eq!(status["pageHeight"], 4321.0);
        assert_eq!(status["connectedClients"], 0);
        assert_eq!(status["targetUrl"], "https://news.example.com/");
    }

    #[tokio::test]
    async fn unknown_paths_go_to_the_proxy() {
        let server = spawn("http://127.0.0.1:9/").await;
        let resp = reqwest::get(server.url("/static/app.js")).await.unwrap();
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn shutdown_stops_listening() {
        let server = spawn("https://news.example.com/").await;
        let url = server.url("/api/health");
        server.handle.shutdown().await;
        assert!(reqwest::get(url).await.is_err());
    }
}
