//! Server network layer handling WebSocket upgrades and background task wiring

use crate::config::ServerConfig;
use crate::dispatcher::BroadcastDispatcher;
use crate::identity::IdentityGenerator;
use crate::registry::ConnectionRegistry;
use crate::session::{run_session, SessionContext};
use crate::status::{collect_rows, render_status_page};
use crate::sweeper::IdleSweeper;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::{Html, Response};
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use shared::{GAME_PATH, STATUS_PATH};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds the HTTP routes: the game upgrade endpoint and the status page
pub fn build_router(ctx: SessionContext) -> Router {
    Router::new()
        .route(GAME_PATH, get(game_upgrade))
        .route(STATUS_PATH, get(status_page))
        .with_state(ctx)
}

async fn game_upgrade(
    State(ctx): State<SessionContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_failed_upgrade(move |e| warn!("WebSocket upgrade error from {}: {}", addr, e))
        .on_upgrade(move |socket| run_session(socket, Some(addr), ctx))
}

async fn status_page(State(ctx): State<SessionContext>) -> Html<String> {
    Html(render_status_page(&collect_rows(&ctx.registry)))
}

/// Aborts the dispatcher and sweeper when the server goes away
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// A bound relay server with its dispatcher and sweeper already running
pub struct Server {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    router: Router,
    _background: BackgroundTasks,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Game server listening on {}", listener.local_addr()?);

        let registry = Arc::new(ConnectionRegistry::new());
        let (publisher, dispatcher) = BroadcastDispatcher::new(
            Arc::clone(&registry),
            config.dispatch_queue,
            config.write_timeout,
        );
        let sweeper = IdleSweeper::new(
            Arc::clone(&registry),
            config.sweep_interval,
            config.stale_timeout,
        );

        let background = BackgroundTasks(vec![
            tokio::spawn(dispatcher.run()),
            tokio::spawn(sweeper.run()),
        ]);

        let ctx = SessionContext {
            registry: Arc::clone(&registry),
            publisher,
            identities: Arc::new(IdentityGenerator::new(config.id_bytes)),
            config: config.session(),
        };

        Ok(Server {
            listener,
            registry,
            router: build_router(ctx),
            _background: background,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until the listener fails
    pub async fn run(self) -> Result<(), BoxError> {
        let Server {
            listener,
            router,
            _background,
            ..
        } = self;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        drop(_background);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = Server::bind(local_config()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let config = ServerConfig {
            port: taken.port(),
            ..local_config()
        };
        assert!(Server::bind(config).await.is_err());
    }
}
