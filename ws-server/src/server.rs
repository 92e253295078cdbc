use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, Level};

use sync_cvr::CvrStore;
use sync_streamer::{ChangeLogStore, ReplicaStore};

use crate::client_ip::SmartClientIp;
use crate::connection::{self, ConnectParams};
use crate::registry::ViewSyncerRegistry;
use crate::user_agent::OptionalUserAgent;

/// Owns the `/ws` route and binds it to a socket (§4.I).
pub struct WebsocketServer<L, R, Cv> {
    registry: Option<Arc<ViewSyncerRegistry<L, R, Cv>>>,
}

impl<L, R, Cv> WebsocketServer<L, R, Cv>
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    pub fn new(registry: ViewSyncerRegistry<L, R, Cv>) -> Self { Self { registry: Some(Arc::new(registry)) } }

    pub async fn run(&mut self, bind_address: &str) -> Result<()> {
        let Some(registry) = self.registry.take() else {
            return Err(anyhow::anyhow!("server has already been run"));
        };

        let app = Router::new().route("/ws", get(ws_handler)).with_state(registry).layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            ),
        );

        let listener = tokio::net::TcpListener::bind(bind_address).await?;
        info!("sync server listening on {}", listener.local_addr()?);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        Ok(())
    }
}

async fn ws_handler<L, R, Cv>(
    ws: WebSocketUpgrade, Query(params): Query<ConnectParams>, SmartClientIp(client_ip): SmartClientIp, OptionalUserAgent(user_agent): OptionalUserAgent,
    State(registry): State<Arc<ViewSyncerRegistry<L, R, Cv>>>,
) -> impl IntoResponse
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    let user_agent = user_agent.unwrap_or_else(|| "unknown".to_string());
    debug!(%client_ip, %user_agent, client_group = %params.client_group_id, client = %params.client_id, "websocket upgrading");
    ws.on_upgrade(move |socket| connection::run(socket, registry, params))
}
