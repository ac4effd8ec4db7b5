//! In-memory collaborators and environment setup shared by unit and
//! integration tests.

use crate::db_operations::SyncDb;
use crate::cursor::ScrollCursorStore;
use crate::entity::{EntityRef, EntityType, LocalRecord, RemoteRecord};
use crate::error::{SyncError, SyncResult};
use crate::events::MessageBus;
use crate::local::LocalStore;
use crate::orchestration::SyncOrchestrator;
use crate::remote::{FeedPosition, PulledPage, PushReceipt, RemoteClient, RemoteError, RemoteResult};
use crate::status::SyncStatusLock;
use crate::strategy::{
    DirectionSet, EntityOutcome, StrategyContext, StrategyError, StrategyId, StrategyPolicy,
    StrategyRegistry, SyncDirection, SyncStrategy,
};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build a field map from `(name, value)` pairs
pub fn fields<'a, I>(pairs: I) -> Map<String, JsonValue>
where
    I: IntoIterator<Item = (&'a str, JsonValue)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Default)]
struct RemoteState {
    pages: HashMap<(EntityType, Option<String>), PulledPage>,
    records: HashMap<(EntityType, String), RemoteRecord>,
    push_failures: HashMap<String, RemoteError>,
    fail_all: Option<RemoteError>,
    pushes: Vec<(EntityType, RemoteRecord)>,
    pulls: Vec<(EntityType, FeedPosition)>,
    fetches: Vec<(EntityType, String)>,
}

/// Scriptable [`RemoteClient`] that records every call.
///
/// Pages are keyed by the cursor they start after (`None` = start of feed);
/// an unscripted position returns an empty final page. Pushes succeed with
/// ids `r-1`, `r-2`, ... unless a failure is scripted for the record's
/// `name` field.
#[derive(Default)]
pub struct RecordingRemote {
    state: Mutex<RemoteState>,
    next_id: AtomicUsize,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, entity: EntityType, after: Option<&str>, page: PulledPage) -> Self {
        guard(&self.state)
            .pages
            .insert((entity, after.map(str::to_string)), page);
        self
    }

    pub fn with_record(self, entity: EntityType, record: RemoteRecord) -> Self {
        if let Some(id) = record.id.clone() {
            guard(&self.state).records.insert((entity, id), record);
        }
        self
    }

    /// Fail pushes of records whose `name` field equals `name`
    pub fn fail_push(self, name: &str, error: RemoteError) -> Self {
        guard(&self.state)
            .push_failures
            .insert(name.to_string(), error);
        self
    }

    /// Fail every call with `error`
    pub fn fail_all(self, error: RemoteError) -> Self {
        guard(&self.state).fail_all = Some(error);
        self
    }

    pub fn push_calls(&self) -> Vec<(EntityType, RemoteRecord)> {
        guard(&self.state).pushes.clone()
    }

    pub fn pull_calls(&self) -> Vec<(EntityType, FeedPosition)> {
        guard(&self.state).pulls.clone()
    }

    pub fn fetch_calls(&self) -> Vec<(EntityType, String)> {
        guard(&self.state).fetches.clone()
    }
}

#[async_trait]
impl RemoteClient for RecordingRemote {
    async fn push(&self, entity: EntityType, record: &RemoteRecord) -> RemoteResult<PushReceipt> {
        let mut state = guard(&self.state);
        state.pushes.push((entity, record.clone()));
        if let Some(error) = &state.fail_all {
            return Err(error.clone());
        }
        let name = record.fields.get("name").and_then(JsonValue::as_str);
        if let Some(error) = name.and_then(|n| state.push_failures.get(n)) {
            return Err(error.clone());
        }
        let remote_id = match &record.id {
            Some(id) => id.clone(),
            None => format!("r-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        Ok(PushReceipt { remote_id })
    }

    async fn pull(
        &self,
        entity: EntityType,
        position: &FeedPosition,
        _page_size: usize,
    ) -> RemoteResult<PulledPage> {
        let mut state = guard(&self.state);
        state.pulls.push((entity, position.clone()));
        if let Some(error) = &state.fail_all {
            return Err(error.clone());
        }
        let key = (entity, position.token().map(str::to_string));
        Ok(state.pages.get(&key).cloned().unwrap_or_default())
    }

    async fn fetch(&self, entity: EntityType, remote_id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let mut state = guard(&self.state);
        state.fetches.push((entity, remote_id.to_string()));
        if let Some(error) = &state.fail_all {
            return Err(error.clone());
        }
        Ok(state.records.get(&(entity, remote_id.to_string())).cloned())
    }
}

type UpsertHook = Box<dyn Fn(&str) -> SyncResult<()> + Send + Sync>;

/// [`LocalStore`] over a map, with its own monotonically numbered ids for
/// records created by pulls.
#[derive(Default)]
pub struct MemoryLocalStore {
    records: Mutex<BTreeMap<(EntityType, String), LocalRecord>>,
    next_id: AtomicUsize,
    upsert_hook: Mutex<Option<UpsertHook>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: LocalRecord) {
        guard(&self.records).insert((record.entity_type, record.id.clone()), record);
    }

    /// Called with the remote id before every upsert; an error fails that upsert
    pub fn on_upsert(&self, hook: impl Fn(&str) -> SyncResult<()> + Send + Sync + 'static) {
        *guard(&self.upsert_hook) = Some(Box::new(hook));
    }

    pub fn records(&self, entity: EntityType) -> Vec<LocalRecord> {
        guard(&self.records)
            .values()
            .filter(|r| r.entity_type == entity)
            .cloned()
            .collect()
    }
}

impl LocalStore for MemoryLocalStore {
    fn find(&self, entity: EntityType, local_id: &str) -> SyncResult<Option<LocalRecord>> {
        Ok(guard(&self.records).get(&(entity, local_id.to_string())).cloned())
    }

    fn pending_push(&self, entity: EntityType) -> SyncResult<Vec<LocalRecord>> {
        Ok(self
            .records(entity)
            .into_iter()
            .filter(|r| r.dirty)
            .collect())
    }

    fn mark_pushed(&self, entity: EntityType, local_id: &str, remote_id: &str) -> SyncResult<()> {
        let mut records = guard(&self.records);
        let record = records
            .get_mut(&(entity, local_id.to_string()))
            .ok_or_else(|| SyncError::NotFound {
                model_type: entity.to_string(),
                id: local_id.to_string(),
            })?;
        record.remote_id = Some(remote_id.to_string());
        record.dirty = false;
        Ok(())
    }

    fn upsert_remote(
        &self,
        entity: EntityType,
        remote_id: &str,
        fields: Map<String, JsonValue>,
    ) -> SyncResult<String> {
        if let Some(hook) = guard(&self.upsert_hook).as_ref() {
            hook(remote_id)?;
        }
        let mut records = guard(&self.records);
        if let Some(existing) = records
            .values_mut()
            .find(|r| r.entity_type == entity && r.remote_id.as_deref() == Some(remote_id))
        {
            existing.fields = fields;
            existing.dirty = false;
            return Ok(existing.id.clone());
        }
        let id = format!("l-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut record = LocalRecord::new(entity, id.clone(), fields);
        record.remote_id = Some(remote_id.to_string());
        record.dirty = false;
        records.insert((entity, id.clone()), record);
        Ok(id)
    }

    fn save(&self, record: &LocalRecord) -> SyncResult<()> {
        self.insert(record.clone());
        Ok(())
    }
}

type Hook = Box<dyn Fn(&StrategyContext) + Send + Sync>;

/// Strategy that replays a fixed list of per-entity outcomes and records
/// every invocation.
pub struct ScriptedStrategy {
    id: StrategyId,
    directions: DirectionSet,
    policy: StrategyPolicy,
    steps: Vec<EntityOutcome>,
    finish: Option<StrategyError>,
    hook: Option<Hook>,
    calls: Mutex<Vec<SyncDirection>>,
    model_calls: Mutex<Vec<String>>,
}

impl ScriptedStrategy {
    pub fn new(id: StrategyId, directions: DirectionSet) -> Self {
        Self {
            id,
            directions,
            policy: StrategyPolicy::default(),
            steps: Vec::new(),
            finish: None,
            hook: None,
            calls: Mutex::new(Vec::new()),
            model_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: StrategyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_steps(mut self, steps: Vec<EntityOutcome>) -> Self {
        self.steps = steps;
        self
    }

    /// Return `error` after replaying the steps
    pub fn finishing_with(mut self, error: StrategyError) -> Self {
        self.finish = Some(error);
        self
    }

    /// Run `hook` at the start of every invocation
    pub fn with_hook(mut self, hook: impl Fn(&StrategyContext) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Directions this strategy was invoked with, in order
    pub fn calls(&self) -> Vec<SyncDirection> {
        guard(&self.calls).clone()
    }

    /// Local ids passed to single-entity mode
    pub fn model_calls(&self) -> Vec<String> {
        guard(&self.model_calls).clone()
    }

    fn replay(&self, ctx: &mut StrategyContext, entity: impl Fn(usize) -> EntityRef) -> Result<(), StrategyError> {
        guard(&self.calls).push(ctx.direction);
        if let Some(hook) = &self.hook {
            hook(&*ctx);
        }
        for (i, step) in self.steps.iter().enumerate() {
            ctx.record(entity(i), step.clone());
        }
        match &self.finish {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncStrategy for ScriptedStrategy {
    fn id(&self) -> StrategyId {
        self.id
    }

    fn directions(&self) -> DirectionSet {
        self.directions
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn sync(&self, ctx: &mut StrategyContext) -> Result<(), StrategyError> {
        let entity = self.id.entity;
        self.replay(ctx, |i| EntityRef::local(entity, (i + 1).to_string()))
    }

    async fn sync_model(
        &self,
        record: &LocalRecord,
        ctx: &mut StrategyContext,
    ) -> Result<(), StrategyError> {
        guard(&self.model_calls).push(record.id.clone());
        self.replay(ctx, |_| record.entity_ref())
    }
}

/// Temporary store, lock, in-memory collaborators and a bus, wired together.
pub struct TestEnvironment {
    pub db: SyncDb,
    pub lock: Arc<SyncStatusLock>,
    pub cursors: Arc<ScrollCursorStore>,
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<RecordingRemote>,
    pub bus: Arc<MessageBus>,
}

impl TestEnvironment {
    pub fn new() -> SyncResult<Self> {
        Self::with_remote(RecordingRemote::new())
    }

    pub fn with_remote(remote: RecordingRemote) -> SyncResult<Self> {
        let db = SyncDb::temporary()?;
        Ok(Self {
            lock: Arc::new(SyncStatusLock::new(&db, "pipeliner-sync", 3600)),
            cursors: Arc::new(ScrollCursorStore::new(db.clone())),
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(remote),
            bus: Arc::new(MessageBus::new()),
            db,
        })
    }

    /// Another lock instance on the same row, standing in for a second process
    pub fn competing_lock(&self) -> SyncStatusLock {
        SyncStatusLock::new(&self.db, self.lock.lock_name(), 3600)
    }

    pub fn orchestrator(&self, registry: StrategyRegistry) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(registry),
            Arc::clone(&self.lock),
            self.cursors.clone(),
            self.local.clone(),
            Arc::clone(&self.bus),
        )
    }

    /// Registry holding the given scripted strategies
    pub fn registry(strategies: Vec<Arc<ScriptedStrategy>>) -> SyncResult<StrategyRegistry> {
        let mut registry = StrategyRegistry::new();
        for strategy in strategies {
            registry.register(strategy)?;
        }
        Ok(registry)
    }
}
