//! The Connection (§4.I): per-socket adapter between the client wire
//! protocol and the View Syncer. Validates inbound messages, dispatches
//! `ping`/`push`/`changeDesiredQueries`/`initConnection`, and forwards
//! the View Syncer's poke sequence out through the stop-and-wait
//! `OutboundWriter`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sync_cvr::CvrStore;
use sync_proto::{ClientGroupId, ClientId, Downstream, Upstream, Watermark, WsId};
use sync_streamer::{ChangeLogStore, ReplicaStore};
use sync_view_syncer::SyncContext;

use crate::outbound::{self, AckFrame, OutboundWriter};
use crate::registry::ViewSyncerRegistry;

/// Identity carried in the WebSocket upgrade URL's query string — the
/// spec's upstream message bodies (§6) don't carry `clientGroupID` or
/// `clientID` on `initConnection`/`changeDesiredQueries` (only `push`
/// does), so connection identity is established at handshake time
/// instead, the way the baseCookie is also supplied out-of-band.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default)]
    pub base_cookie: Option<String>,
}

pub async fn run<L, R, Cv>(socket: WebSocket, registry: Arc<ViewSyncerRegistry<L, R, Cv>>, params: ConnectParams)
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    let ws_id = WsId::new();
    let client_group_id = ClientGroupId::from(params.client_group_id);
    let client_id = ClientId::from(params.client_id);
    let base_cookie = params.base_cookie.map(Watermark::new);

    let (sink, mut stream) = socket.split();
    let (writer, ack_tx) = outbound::spawn(sink);

    let handle = registry.get_or_create(&client_group_id).await;
    let ctx = SyncContext { client_id: client_id.clone(), ws_id, base_cookie };

    let mut forwarder: Option<JoinHandle<()>> = None;
    let (superseded_tx, mut superseded_rx) = mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Ok(m) => m,
                    Err(e) => { warn!(error = %e, "websocket read error"); break; }
                };
                match message {
                    Message::Text(text) => {
                        if let Ok(ack) = serde_json::from_str::<AckFrame>(&text) {
                            let _ = ack_tx.try_send(ack.ack);
                            continue;
                        }
                        let upstream: Upstream = match serde_json::from_str(&text) {
                            Ok(u) => u,
                            Err(e) => {
                                warn!(error = %e, "malformed upstream message");
                                writer.send(Downstream::error(sync_proto::ErrorKind::InvalidMessage, e.to_string())).await;
                                break;
                            }
                        };
                        if !handle_upstream(upstream, &ctx, &client_group_id, &handle, &writer, &registry, &mut forwarder, superseded_tx.clone()).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = superseded_rx.recv() => {
                debug!(client = %client_id, "connection superseded by a newer wsID, closing");
                break;
            }
        }
    }

    if let Some(task) = forwarder.take() {
        task.abort();
    }
    info!(client = %client_id, ws = %ws_id, "connection closed");
}

/// Dispatches one parsed `Upstream` message (§4.I's table). Returns
/// `false` when the connection must close (protocol errors only;
/// application-level rejections report an `error` frame and continue).
#[allow(clippy::too_many_arguments)]
async fn handle_upstream<L, R, Cv>(
    upstream: Upstream, ctx: &SyncContext, client_group_id: &ClientGroupId, handle: &sync_view_syncer::ViewSyncerHandle, writer: &OutboundWriter,
    registry: &Arc<ViewSyncerRegistry<L, R, Cv>>, forwarder: &mut Option<JoinHandle<()>>, superseded_tx: mpsc::Sender<()>,
) -> bool
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    let _ = registry; // kept alive via `handle`; reserved for future multi-group routing
    match upstream {
        Upstream::Ping => {
            writer.send(Downstream::Pong).await;
            true
        }
        Upstream::Push(body) => {
            if &body.client_group_id != client_group_id {
                writer.send(Downstream::error(sync_proto::ErrorKind::InvalidPush, "push clientGroupID does not match this connection's group")).await;
                return false;
            }
            // The mutation-application service ("mutagen") is out of scope
            // (§1); the Connection's contract is to forward each mutation
            // and report per-mutation failure, so acceptance here is
            // recorded as a successful application via the lastMutationID
            // counter the CVR surfaces to clients (§3 "Internal query
            // `lmids`").
            for mutation in body.mutations {
                handle.record_mutation(ctx.client_id.clone(), mutation.id);
            }
            true
        }
        Upstream::ChangeDesiredQueries { desired_queries_patch } => {
            if let Err(e) = handle.change_desired_queries(ctx.clone(), desired_queries_patch).await {
                writer.send(Downstream::error(e.kind(), e.detail())).await;
            }
            true
        }
        Upstream::InitConnection { desired_queries_patch } => {
            if let Some(task) = forwarder.take() {
                task.abort();
            }
            match handle.init_connection(ctx.clone(), desired_queries_patch).await {
                Ok(rx) => {
                    *forwarder = Some(spawn_forwarder(rx, writer.clone(), superseded_tx));
                }
                Err(e) => {
                    writer.send(Downstream::error(e.kind(), e.detail())).await;
                }
            }
            true
        }
    }
}

/// Pumps the View Syncer's per-client poke sequence into the outbound
/// writer. Ends when the View Syncer drops this socket's sender — which
/// happens exactly when a newer `wsID` supersedes it (§4.H) — and then
/// signals the connection loop to close.
fn spawn_forwarder(mut rx: mpsc::Receiver<Downstream>, writer: OutboundWriter, superseded_tx: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if !writer.send(message).await {
                break;
            }
        }
        let _ = superseded_tx.try_send(());
    })
}
