//! Turbolink demo: one HTTP backend, one WebSocket backend, and a failover
//! between them.
//!
//! The demo starts both backends locally, connects a [`ConnectionService`] to
//! them (HTTP preferred), sends a request, stops the HTTP backend and sends
//! again. The second request is delivered over the WebSocket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turbolink::{ChannelConfig, ConnectionService, ConnectionServiceConfig, ManagedChannel};
use turbolink_http::{HttpChannel, HttpChannelConfig};
use turbolink_websocket::{WebSocketChannel, WebSocketChannelConfig};

#[derive(Parser, Debug)]
#[command(
    name = "turbolink-demo",
    version,
    about = "Fail over from an HTTP backend to a WebSocket backend"
)]
struct Cli {
    /// Port for the local HTTP backend
    #[arg(long, default_value_t = 3000, env = "TURBOLINK_DEMO_HTTP_PORT")]
    http_port: u16,

    /// Port for the local WebSocket backend
    #[arg(long, default_value_t = 3001, env = "TURBOLINK_DEMO_WS_PORT")]
    ws_port: u16,

    /// Service configuration file (.toml, .yaml or .json)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// A backend server that can be stopped on demand
struct Backend {
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Backend {
    async fn start(port: u16, app: Router) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });
        info!(%addr, "backend listening");
        Ok(Self { stop, task })
    }

    async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.task.await??;
        Ok(())
    }
}

fn http_backend() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/api/data",
            post(|Json(body): Json<Value>| async move { Json(json!({ "received": body })) }),
        )
}

fn ws_backend() -> Router {
    Router::new().route(
        "/ws",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(echo) }),
    )
}

async fn echo(socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                info!(message = %text.as_str(), "ws backend received");
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let service_config = match &cli.config {
        Some(path) => ConnectionServiceConfig::from_file(path)?,
        None => ConnectionServiceConfig::default(),
    };

    let http_backend = Backend::start(cli.http_port, http_backend()).await?;
    let ws_backend = Backend::start(cli.ws_port, ws_backend()).await?;

    let http = HttpChannel::new(
        HttpChannelConfig::new(format!("http://127.0.0.1:{}", cli.http_port))
            .with_timeout(Duration::from_secs(2)),
    )?;
    let ws = WebSocketChannel::new(
        WebSocketChannelConfig::new(format!("ws://127.0.0.1:{}/ws", cli.ws_port))
            .with_reconnect_interval(Duration::from_secs(2)),
    )?;
    let mut pushed = ws.subscribe_messages();

    let channels = vec![
        Arc::new(ManagedChannel::new(
            ChannelConfig::new("http-primary", 10)
                .with_health_check_interval(Duration::from_secs(2)),
            Arc::new(http),
        )),
        Arc::new(ManagedChannel::new(
            ChannelConfig::new("ws-backup", 5).with_health_check_interval(Duration::from_secs(2)),
            Arc::new(ws),
        )),
    ];

    let service = ConnectionService::with_config(service_config);
    let mut events = service.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.name(), channel = ?event.channel_id(), "{event:?}");
        }
    });
    let echo_log = tokio::spawn(async move {
        while let Ok(message) = pushed.recv().await {
            info!(%message, "ws echo");
        }
    });

    service.initialize(channels).await?;
    info!(channel = ?service.get_current_channel_id()?, "service ready");

    let reply = service.send(json!({ "order": 1 }), false).await?;
    info!(%reply, "first request delivered");

    info!("stopping HTTP backend");
    http_backend.stop().await?;

    match service.send(json!({ "order": 2 }), false).await {
        Ok(reply) => info!(
            %reply,
            channel = ?service.get_current_channel_id().ok().flatten(),
            "second request delivered after failover"
        ),
        Err(e) => warn!(error = %e, "second request failed"),
    }

    for summary in service.get_available_channels()? {
        info!(
            id = %summary.id,
            priority = summary.priority,
            status = %summary.status,
            endpoint = ?summary.endpoint,
            "channel"
        );
    }
    info!(stats = ?service.stats(), "delivery stats");

    tokio::time::sleep(Duration::from_millis(200)).await;
    service.shutdown().await;
    ws_backend.stop().await?;
    event_log.abort();
    echo_log.abort();
    Ok(())
}
