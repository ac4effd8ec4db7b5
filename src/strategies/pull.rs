use super::mapper::EntityMapper;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::cursor::CursorKey;
use crate::entity::{EntityRef, EntityType, LocalRecord, RemoteRecord};
use crate::local::LocalStore;
use crate::remote::{FeedPosition, RemoteClient};
use crate::strategy::{
    DirectionSet, StrategyContext, StrategyError, StrategyId, StrategyPolicy, SyncStrategy,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Pulls remote records of one entity type page by page, resuming from the
/// stored scroll cursor and checkpointing after each processed page.
pub struct PullStrategy {
    entity: EntityType,
    remote: Arc<dyn RemoteClient>,
    local: Arc<dyn LocalStore>,
    mapper: Arc<dyn EntityMapper>,
    page_size: usize,
    scope: Option<String>,
    policy: StrategyPolicy,
}

impl PullStrategy {
    pub fn new(
        entity: EntityType,
        remote: Arc<dyn RemoteClient>,
        local: Arc<dyn LocalStore>,
        mapper: Arc<dyn EntityMapper>,
    ) -> Self {
        Self {
            entity,
            remote,
            local,
            mapper,
            page_size: DEFAULT_PAGE_SIZE,
            scope: None,
            policy: StrategyPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Narrow the cursor to one scope partition
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_policy(mut self, policy: StrategyPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn cursor_key(&self) -> CursorKey {
        match &self.scope {
            Some(scope) => CursorKey::scoped(self.entity, scope.clone()),
            None => CursorKey::new(self.entity),
        }
    }

    /// Store one remote record locally; per-entity problems go to `ctx`
    fn apply_one(&self, record: &RemoteRecord, ctx: &mut StrategyContext) {
        let entity_ref = EntityRef::remote(self.entity, record.id.clone());
        let fields = match self.mapper.to_local(self.entity, record) {
            Ok(fields) => fields,
            Err(e) => {
                ctx.skip(entity_ref, e.to_string());
                return;
            }
        };
        let Some(remote_id) = record.id.as_deref() else {
            ctx.skip(entity_ref, "remote record has no identifier");
            return;
        };
        match self.local.upsert_remote(self.entity, remote_id, fields) {
            Ok(_) => ctx.record_synced(),
            Err(e) => ctx.record_failure(entity_ref, e),
        }
    }
}

#[async_trait]
impl SyncStrategy for PullStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::pull(self.entity)
    }

    fn directions(&self) -> DirectionSet {
        DirectionSet::pull_only()
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn sync(&self, ctx: &mut StrategyContext) -> Result<(), StrategyError> {
        let key = self.cursor_key();
        let mut pages = 0usize;

        loop {
            if ctx.is_cancelled() {
                crate::log_strategy_info!("🛑 {} stopping after {} pages", self.id(), pages);
                return Ok(());
            }

            let position = FeedPosition::from_cursor(ctx.cursor(&key)?.as_ref());
            crate::log_strategy_debug!("{} pulling {} from {:?}", self.id(), key, position);
            let page = self
                .remote
                .pull(self.entity, &position, self.page_size)
                .await?;
            pages += 1;
            let failures_before = ctx.outcome().errors.len();

            for record in &page.records {
                if ctx.is_cancelled() {
                    // The page is not checkpointed; it is re-read next run
                    return Ok(());
                }
                self.apply_one(record, ctx);
            }

            let failures = ctx.outcome().errors.len() - failures_before;
            if failures > 0 {
                // The cursor stays before this page so the failed records are pulled again
                return Err(StrategyError::Failed(format!(
                    "{} of {} records on a {} page failed to apply; not advancing {}",
                    failures,
                    page.records.len(),
                    self.entity,
                    key
                )));
            }

            if let Some(next) = &page.next_cursor {
                if position.token() == Some(next.as_str()) && page.has_more {
                    return Err(StrategyError::Failed(format!(
                        "remote cursor for {} did not advance past {}",
                        key, next
                    )));
                }
                ctx.checkpoint(&key, next)?;
            }

            if !page.has_more {
                crate::log_strategy_info!(
                    "✅ [{}] {} reached end of feed after {} pages",
                    ctx.correlation_id,
                    self.id(),
                    pages
                );
                return Ok(());
            }
            if page.next_cursor.is_none() {
                return Err(StrategyError::Failed(format!(
                    "remote reported more {} pages without a cursor",
                    self.entity
                )));
            }
        }
    }

    async fn sync_model(
        &self,
        record: &LocalRecord,
        ctx: &mut StrategyContext,
    ) -> Result<(), StrategyError> {
        let Some(remote_id) = record.remote_id.as_deref() else {
            ctx.skip(record.entity_ref(), "not linked to a remote record");
            return Ok(());
        };
        match self.remote.fetch(self.entity, remote_id).await {
            Ok(Some(remote)) => {
                self.apply_one(&remote, ctx);
                Ok(())
            }
            Ok(None) => {
                ctx.skip(record.entity_ref(), "remote record no longer exists");
                Ok(())
            }
            Err(e) if e.is_run_fatal() => Err(e.into()),
            Err(e) => {
                ctx.record_failure(record.entity_ref(), e);
                Ok(())
            }
        }
    }
}
