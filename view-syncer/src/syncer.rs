//! The View Syncer's single owning task (§4.H, §5 "query pipelines
//! execute synchronously inside the View Syncer's task"). One instance
//! per client group; `ViewSyncerHandle` is the cheap, cloneable front
//! door `Connection` tasks talk to.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use sync_cvr::{Cvr, CvrStore, QueryResult, RowPatchOp};
use sync_ivm::{compile, Catalog, Pipeline};
use sync_proto::{
    ClientGroupId, ClientId, Connected, DesiredQueriesPatchOp, Downstream, EntitiesPatchOp, ErrorBody, ErrorKind, PatchOp, PokeEndBody,
    PokePartBody, PokeStartBody, QueryHash, Row, TableSchema, Watermark, WsId,
};
use sync_streamer::{ChangeLogStore, ChangeStreamerService, ReplicaStore, SubscribeRequest};

use crate::error::SyncError;
use crate::translate::{changes_to_row_changes, full_snapshot_changes};

const POKE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct SyncContext {
    pub client_id: ClientId,
    pub ws_id: WsId,
    pub base_cookie: Option<Watermark>,
}

enum SyncerCommand {
    InitConnection {
        ctx: SyncContext,
        desired_queries_patch: Vec<DesiredQueriesPatchOp>,
        reply: oneshot::Sender<Result<mpsc::Receiver<Downstream>, SyncError>>,
    },
    ChangeDesiredQueries { ctx: SyncContext, desired_queries_patch: Vec<DesiredQueriesPatchOp>, reply: oneshot::Sender<Result<(), SyncError>> },
    RecordMutation { client_id: ClientId, mutation_id: u64 },
    Stop,
}

/// Cheap, cloneable handle to a running View Syncer task (§4.H "Public
/// operations").
#[derive(Clone)]
pub struct ViewSyncerHandle {
    tx: mpsc::Sender<SyncerCommand>,
}

impl ViewSyncerHandle {
    pub async fn init_connection(
        &self, ctx: SyncContext, desired_queries_patch: Vec<DesiredQueriesPatchOp>,
    ) -> Result<mpsc::Receiver<Downstream>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SyncerCommand::InitConnection { ctx, desired_queries_patch, reply })
            .await
            .map_err(|_| SyncError::Internal("view syncer task is gone".into()))?;
        rx.await.map_err(|_| SyncError::Internal("view syncer task dropped the reply".into()))?
    }

    pub async fn change_desired_queries(&self, ctx: SyncContext, desired_queries_patch: Vec<DesiredQueriesPatchOp>) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SyncerCommand::ChangeDesiredQueries { ctx, desired_queries_patch, reply })
            .await
            .map_err(|_| SyncError::Internal("view syncer task is gone".into()))?;
        rx.await.map_err(|_| SyncError::Internal("view syncer task dropped the reply".into()))?
    }

    pub fn record_mutation(&self, client_id: ClientId, mutation_id: u64) {
        let _ = self.tx.try_send(SyncerCommand::RecordMutation { client_id, mutation_id });
    }

    pub fn stop(&self) { let _ = self.tx.try_send(SyncerCommand::Stop); }
}

struct State {
    group: ClientGroupId,
    tables: BTreeMap<String, TableSchema>,
    replica_version: String,
    cvr: Cvr,
    pipelines: BTreeMap<QueryHash, Pipeline>,
    /// Current socket per client, superseding any prior one on
    /// `initConnection` (§4.H).
    outboxes: BTreeMap<ClientId, (WsId, mpsc::Sender<Downstream>)>,
}

impl State {
    fn recompile_query(&mut self, hash: &QueryHash, replica_snapshot: &BTreeMap<String, Vec<sync_ivm::RowChange>>) -> Result<(), SyncError> {
        let record = self.cvr.queries.get(hash).expect("caller ensures the query exists before recompiling");
        let catalog = Catalog { tables: &self.tables };
        let mut pipeline = compile(&record.ast, &catalog)?;
        pipeline.apply_commit(&replica_snapshot.clone())?;
        self.pipelines.insert(hash.clone(), pipeline);
        Ok(())
    }

    fn drop_unreferenced_pipelines(&mut self) {
        let live: std::collections::BTreeSet<_> = self.cvr.queries.keys().cloned().collect();
        self.pipelines.retain(|hash, _| live.contains(hash));
    }

    /// Validates and applies a `desiredQueriesPatch`, recompiling any
    /// newly-put query's pipeline from a full snapshot of the replica.
    /// On the first compile failure, nothing is mutated (§4.H "if AST
    /// compilation fails, rejects without mutating the CVR").
    ///
    /// Returns the `gotQueriesPatch` (queries that started or stopped
    /// being compiled as a result of this patch, §3 `queries`, §6
    /// `pokePart.gotQueriesPatch`) alongside the `desiredQueriesPatch`
    /// actually applied, for the caller to fold into the next poke's
    /// `desiredQueriesPatches[clientID]` (§6).
    async fn apply_desired_queries_patch(
        &mut self, client_id: ClientId, patch: Vec<DesiredQueriesPatchOp>, replica: &dyn ReplicaStore,
    ) -> Result<(Vec<DesiredQueriesPatchOp>, Vec<DesiredQueriesPatchOp>), SyncError> {
        let catalog = Catalog { tables: &self.tables };
        for op in &patch {
            if op.op == PatchOp::Put {
                let ast = op.ast.as_ref().ok_or_else(|| SyncError::InvalidMessage(format!("put patch for `{}` missing ast", op.hash)))?;
                compile(ast, &catalog)?;
            }
        }

        let before: std::collections::BTreeSet<_> = self.cvr.queries.keys().cloned().collect();
        let applied = patch.clone();
        for op in patch {
            self.cvr.put_desired_query(client_id.clone(), op.op, op.hash, op.ast);
        }
        self.drop_unreferenced_pipelines();

        let snapshot = full_snapshot_changes(replica, &self.tables).await.map_err(|e| SyncError::Internal(e.to_string()))?;
        let hashes: Vec<_> = self.cvr.queries.keys().cloned().collect();
        for hash in &hashes {
            if !self.pipelines.contains_key(hash) {
                self.recompile_query(hash, &snapshot)?;
            }
        }

        let after: std::collections::BTreeSet<_> = hashes.into_iter().collect();
        let mut got_queries_patch = Vec::new();
        for hash in after.difference(&before) {
            let ast = self.cvr.queries.get(hash).expect("just compiled").ast.clone();
            got_queries_patch.push(DesiredQueriesPatchOp { op: PatchOp::Put, hash: hash.clone(), ast: Some(ast) });
        }
        for hash in before.difference(&after) {
            got_queries_patch.push(DesiredQueriesPatchOp { op: PatchOp::Del, hash: hash.clone(), ast: None });
        }

        Ok((got_queries_patch, applied))
    }

    /// Pulls every desired query's current result set, labeled with the
    /// columns it selects (§4.G `QueryResult`).
    fn query_results(&self) -> Vec<QueryResult> {
        self.cvr
            .queries
            .iter()
            .filter_map(|(hash, record)| {
                let pipeline = self.pipelines.get(hash)?;
                let columns: std::collections::BTreeSet<String> = record.ast.columns.iter().cloned().collect();
                let rows: Vec<Row> = pipeline.rows().iter().map(|n| n.row.clone()).collect();
                Some(QueryResult { hash: hash.clone(), columns, rows })
            })
            .collect()
    }

    fn broadcast(&mut self, message: Downstream) {
        let mut dead = Vec::new();
        for (client_id, (_, tx)) in self.outboxes.iter() {
            if tx.try_send(message.clone()).is_err() {
                dead.push(client_id.clone());
            }
        }
        for client_id in dead {
            warn!(%client_id, "client outbox closed, dropping from broadcast set");
            self.outboxes.remove(&client_id);
        }
    }
}

fn to_downstream(message: Downstream) -> Downstream { message }

/// `Number.MAX_SAFE_INTEGER` (2^53 - 1): the largest integer magnitude a
/// JSON-decoding client can represent exactly (§7 "Representability errors").
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Whether every integer nested in `value` is within the wire format's
/// representable range; floats and non-numeric values always pass.
fn is_representable(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.unsigned_abs() <= MAX_SAFE_INTEGER,
            (None, Some(u)) => u <= MAX_SAFE_INTEGER,
            (None, None) => true,
        },
        serde_json::Value::Array(items) => items.iter().all(is_representable),
        serde_json::Value::Object(map) => map.values().all(is_representable),
        _ => true,
    }
}

pub fn spawn<L, R, Cv>(
    group: ClientGroupId, tables: BTreeMap<String, TableSchema>, replica_version: String, streamer: ChangeStreamerService<L>,
    replica: Arc<R>, cvr_store: Arc<Cv>,
) -> ViewSyncerHandle
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(group, tables, replica_version, streamer, replica, cvr_store, rx));
    ViewSyncerHandle { tx }
}

async fn run<L, R, Cv>(
    group: ClientGroupId, tables: BTreeMap<String, TableSchema>, replica_version: String, streamer: ChangeStreamerService<L>,
    replica: Arc<R>, cvr_store: Arc<Cv>, mut commands: mpsc::Receiver<SyncerCommand>,
) where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    let cvr = match cvr_store.load(&group).await {
        Ok(cvr) => cvr,
        Err(e) => {
            error!(error = %e, "failed to load CVR, aborting view syncer");
            return;
        }
    };

    let mut state = State { group: group.clone(), tables, replica_version: replica_version.clone(), cvr, pipelines: BTreeMap::new(), outboxes: BTreeMap::new() };

    let snapshot = match full_snapshot_changes(replica.as_ref(), &state.tables).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to snapshot replica, aborting view syncer");
            return;
        }
    };
    let hashes: Vec<_> = state.cvr.queries.keys().cloned().collect();
    for hash in hashes {
        if let Err(e) = state.recompile_query(&hash, &snapshot) {
            error!(error = %e, query = %hash, "failed to compile a previously-desired query");
        }
    }

    let start_watermark = state.cvr.version.state_version.clone().unwrap_or_else(Watermark::zero);
    let initial = state.cvr.version.state_version.is_none();
    let (_sub_id, mut commit_stream) = match streamer
        .subscribe(SubscribeRequest { watermark: start_watermark, replica_version, initial })
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to subscribe to the change streamer, aborting view syncer");
            return;
        }
    };

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SyncerCommand::Stop) | None => break,
                    Some(SyncerCommand::InitConnection { ctx, desired_queries_patch, reply }) => {
                        let result = handle_init_connection(&mut state, ctx, desired_queries_patch, replica.as_ref(), cvr_store.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(SyncerCommand::ChangeDesiredQueries { ctx, desired_queries_patch, reply }) => {
                        let result = handle_change_desired_queries(&mut state, ctx, desired_queries_patch, replica.as_ref(), cvr_store.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(SyncerCommand::RecordMutation { client_id, mutation_id }) => {
                        state.cvr.record_mutation(client_id, mutation_id);
                    }
                }
            }
            commit = commit_stream.next() => {
                match commit {
                    Some(commit) => {
                        if let Err(e) = process_commit(&mut state, commit, cvr_store.as_ref()).await {
                            // Abort the poke, leave the CVR at its prior stateVersion, and
                            // tell every connected client rather than failing silently.
                            error!(error = %e, "aborting poke for this commit; CVR left at prior version");
                            state.broadcast(error_message(&e));
                        }
                    }
                    None => break,
                }
            }
        }
    }

    commit_stream.cancel();
}

async fn handle_init_connection(
    state: &mut State, ctx: SyncContext, patch: Vec<DesiredQueriesPatchOp>, replica: &dyn ReplicaStore, cvr_store: &dyn CvrStore,
) -> Result<mpsc::Receiver<Downstream>, SyncError> {
    let (got_queries_patch, applied) = state.apply_desired_queries_patch(ctx.client_id.clone(), patch, replica).await?;

    let (tx, rx) = mpsc::channel(POKE_BUFFER);
    // Supersedes any prior wsID for the same clientID: the old sender is
    // simply dropped, closing its receiver (§4.H).
    state.outboxes.insert(ctx.client_id.clone(), (ctx.ws_id, tx.clone()));
    let _ = tx.try_send(Downstream::Connected(Connected { wsid: ctx.ws_id, timestamp: 0 }));

    let mut desired_queries_patches = BTreeMap::new();
    if !applied.is_empty() {
        desired_queries_patches.insert(ctx.client_id, applied);
    }
    emit_reconciliation_poke(state, cvr_store, got_queries_patch, desired_queries_patches).await?;
    Ok(rx)
}

async fn handle_change_desired_queries(
    state: &mut State, ctx: SyncContext, patch: Vec<DesiredQueriesPatchOp>, replica: &dyn ReplicaStore, cvr_store: &dyn CvrStore,
) -> Result<(), SyncError> {
    match state.outboxes.get(&ctx.client_id) {
        Some((current_ws, _)) if *current_ws != ctx.ws_id => {
            // Superseded wsID: ignored, no effect on the CVR (§4.H, §8).
            debug!(client = %ctx.client_id, "ignoring changeDesiredQueries from a superseded wsID");
            return Ok(());
        }
        _ => {}
    }
    let (got_queries_patch, applied) = state.apply_desired_queries_patch(ctx.client_id.clone(), patch, replica).await?;
    let mut desired_queries_patches = BTreeMap::new();
    if !applied.is_empty() {
        desired_queries_patches.insert(ctx.client_id, applied);
    }
    emit_reconciliation_poke(state, cvr_store, got_queries_patch, desired_queries_patches).await
}

async fn process_commit(state: &mut State, commit: sync_streamer::Commit, cvr_store: &dyn CvrStore) -> Result<(), SyncError> {
    let changes = changes_to_row_changes(&commit.changes);
    for pipeline in state.pipelines.values_mut() {
        pipeline.apply_commit(&changes)?;
    }
    emit_poke(state, cvr_store, Some(commit.watermark), Vec::new(), BTreeMap::new()).await
}

/// Diffs `state.cvr`'s rows against every pipeline's current contents
/// and emits a poke if anything changed, without advancing
/// `stateVersion` (§3 "`minorVersion` increments for desired-query
/// changes that do not yet have a corresponding replica version", §4.H
/// step 3d). Used by `initConnection`/`changeDesiredQueries`, which can
/// change CVR row coverage (a newly desired query hydrates rows) ahead
/// of the next upstream commit.
async fn emit_reconciliation_poke(
    state: &mut State, cvr_store: &dyn CvrStore, got_queries_patch: Vec<DesiredQueriesPatchOp>,
    desired_queries_patches: BTreeMap<ClientId, Vec<DesiredQueriesPatchOp>>,
) -> Result<(), SyncError> {
    emit_poke(state, cvr_store, None, got_queries_patch, desired_queries_patches).await
}

/// Reconciles the CVR against every pipeline's current result, and —
/// if there is anything to tell clients — emits `pokeStart/pokePart/
/// pokeEnd`. `advance_to` is `Some(watermark)` when driven by an
/// upstream commit (§4.H step 3e `advanceVersion`), or `None` for a
/// desired-query-only change, which instead bumps `minorVersion` (§3).
async fn emit_poke(
    state: &mut State, cvr_store: &dyn CvrStore, advance_to: Option<Watermark>, got_queries_patch: Vec<DesiredQueriesPatchOp>,
    desired_queries_patches: BTreeMap<ClientId, Vec<DesiredQueriesPatchOp>>,
) -> Result<(), SyncError> {
    let results = state.query_results();
    let rows_by_key: BTreeMap<_, _> = results.iter().flat_map(|r| r.rows.iter().map(|row| (row.key(), row.clone()))).collect();
    let patches = state.cvr.reconcile_rows(&results);

    let entities_patch: Vec<EntitiesPatchOp> = patches
        .into_iter()
        .map(|p| match p.op {
            RowPatchOp::Put => {
                let row = rows_by_key.get(&p.row_key);
                let value = row.map(|r| {
                    let mut obj = serde_json::Map::new();
                    for col in &p.columns {
                        if let Some(v) = r.columns.get(col).or_else(|| r.primary_key.get(col)) {
                            obj.insert(col.clone(), v.clone());
                        }
                    }
                    serde_json::Value::Object(obj)
                });
                EntitiesPatchOp { op: PatchOp::Put, entity_type: p.row_key.table.clone(), entity_id: p.row_key.hash_hex(), value }
            }
            RowPatchOp::Del => EntitiesPatchOp { op: PatchOp::Del, entity_type: p.row_key.table.clone(), entity_id: p.row_key.hash_hex(), value: None },
        })
        .collect();

    // A value outside the wire format's representable-integer range fails
    // only this poke; the CVR's row coverage (already reconciled above)
    // and version still advance, per §7 "Representability errors".
    let unrepresentable = entities_patch.iter().any(|op| op.value.as_ref().is_some_and(|v| !is_representable(v)));
    if unrepresentable {
        warn!(group = %state.group, "poke contains a value outside the representable-integer range, failing this poke only");
        state.broadcast(Downstream::error(
            ErrorKind::Representability,
            "a row value is outside the wire format's representable-integer range",
        ));
        match advance_to {
            Some(to) => state.cvr.advance_version(to),
            None => state.cvr.version.minor_version += 1,
        }
        cvr_store.save(&state.cvr).await?;
        return Ok(());
    }

    let nothing_to_report =
        entities_patch.is_empty() && got_queries_patch.is_empty() && desired_queries_patches.is_empty() && state.cvr.clients.is_empty();
    if nothing_to_report && advance_to.is_none() {
        return Ok(());
    }

    let base_cookie = state.cvr.version.state_version.clone();
    let cookie = advance_to.clone().unwrap_or_else(|| base_cookie.clone().unwrap_or_else(Watermark::zero));

    state.broadcast(to_downstream(Downstream::PokeStart(PokeStartBody { poke_id: cookie.clone(), base_cookie, cookie: cookie.clone() })));
    if !nothing_to_report {
        let last_mutation_id_changes =
            if state.cvr.clients.is_empty() { None } else { Some(state.cvr.clients.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect()) };
        let desired_queries_patches: BTreeMap<String, Vec<DesiredQueriesPatchOp>> =
            desired_queries_patches.into_iter().map(|(k, v)| (k.as_str().to_string(), v)).collect();
        state.broadcast(Downstream::PokePart(PokePartBody {
            poke_id: cookie.clone(),
            entities_patch: if entities_patch.is_empty() { None } else { Some(entities_patch) },
            last_mutation_id_changes,
            got_queries_patch: if got_queries_patch.is_empty() { None } else { Some(got_queries_patch) },
            desired_queries_patches: if desired_queries_patches.is_empty() { None } else { Some(desired_queries_patches) },
            ..Default::default()
        }));
    }
    state.broadcast(Downstream::PokeEnd(PokeEndBody { poke_id: cookie.clone() }));

    match advance_to {
        Some(to) => state.cvr.advance_version(to),
        None => state.cvr.version.minor_version += 1,
    }
    cvr_store.save(&state.cvr).await?;
    Ok(())
}

fn error_message(err: &SyncError) -> Downstream { Downstream::Error(ErrorBody { kind: err.kind(), detail: err.detail() }) }
