use super::mapper::EntityMapper;
use crate::entity::{EntityType, LocalRecord};
use crate::local::LocalStore;
use crate::remote::RemoteClient;
use crate::strategy::{
    DirectionSet, StrategyContext, StrategyError, StrategyId, StrategyPolicy, SyncStrategy,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Pushes locally changed records of one entity type to the remote.
pub struct PushStrategy {
    entity: EntityType,
    remote: Arc<dyn RemoteClient>,
    local: Arc<dyn LocalStore>,
    mapper: Arc<dyn EntityMapper>,
    policy: StrategyPolicy,
}

impl PushStrategy {
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
            policy: StrategyPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StrategyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// One entity-level unit of work. Only run-fatal remote errors escape.
    async fn push_one(
        &self,
        record: &LocalRecord,
        ctx: &mut StrategyContext,
    ) -> Result<(), StrategyError> {
        let entity_ref = record.entity_ref();
        let payload = match self.mapper.to_remote(record) {
            Ok(payload) => payload,
            Err(e) => {
                ctx.skip(entity_ref, e.to_string());
                return Ok(());
            }
        };

        match self.remote.push(self.entity, &payload).await {
            Ok(receipt) => {
                match self
                    .local
                    .mark_pushed(self.entity, &record.id, &receipt.remote_id)
                {
                    Ok(()) => ctx.record_synced(),
                    Err(e) => ctx.record_failure(entity_ref, e),
                }
                Ok(())
            }
            Err(e) if e.is_run_fatal() => Err(e.into()),
            Err(e) if e.is_skippable() => {
                ctx.skip(entity_ref, e.to_string());
                Ok(())
            }
            Err(e) => {
                ctx.record_failure(entity_ref, e);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SyncStrategy for PushStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::push(self.entity)
    }

    fn directions(&self) -> DirectionSet {
        DirectionSet::push_only()
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn sync(&self, ctx: &mut StrategyContext) -> Result<(), StrategyError> {
        let pending = self.local.pending_push(self.entity)?;
        crate::log_strategy_info!(
            "🔄 [{}] {} has {} records to push",
            ctx.correlation_id,
            self.id(),
            pending.len()
        );
        for record in &pending {
            if ctx.is_cancelled() {
                crate::log_strategy_info!("🛑 {} stopping before {}", self.id(), record.entity_ref());
                break;
            }
            self.push_one(record, ctx).await?;
        }
        Ok(())
    }

    async fn sync_model(
        &self,
        record: &LocalRecord,
        ctx: &mut StrategyContext,
    ) -> Result<(), StrategyError> {
        self.push_one(record, ctx).await
    }
}
