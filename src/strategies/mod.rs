//! Generic push and pull strategies for the entity catalogue.
//!
//! Field mapping stays behind [`EntityMapper`]; the strategies here only
//! implement paging, cursor checkpoints and per-entity error classification.

pub mod mapper;
pub mod pull;
pub mod push;

pub use mapper::{EntityMapper, MappingError, PassthroughMapper};
pub use pull::PullStrategy;
pub use push::PushStrategy;

use crate::config::SyncConfig;
use crate::entity::EntityType;
use crate::error::SyncResult;
use crate::local::LocalStore;
use crate::remote::RemoteClient;
use crate::strategy::StrategyRegistry;
use std::sync::Arc;

/// Registry with one push strategy per locally owned entity type and one pull
/// strategy per entity type, pushes registered first.
pub fn standard_registry(
    config: &SyncConfig,
    remote: Arc<dyn RemoteClient>,
    local: Arc<dyn LocalStore>,
) -> SyncResult<StrategyRegistry> {
    let mut registry = StrategyRegistry::new().with_aliases(&config.strategy_aliases);
    let mapper_for = |entity: EntityType| -> Arc<dyn EntityMapper> {
        Arc::new(PassthroughMapper::new(
            config.required_fields.get(&entity).cloned().unwrap_or_default(),
        ))
    };

    for entity in EntityType::ALL.into_iter().filter(|e| !e.is_remote_owned()) {
        registry.register(Arc::new(PushStrategy::new(
            entity,
            Arc::clone(&remote),
            Arc::clone(&local),
            mapper_for(entity),
        )))?;
    }
    for entity in EntityType::ALL {
        registry.register(Arc::new(
            PullStrategy::new(entity, Arc::clone(&remote), Arc::clone(&local), mapper_for(entity))
                .with_page_size(config.page_size),
        ))?;
    }

    registry.set_defaults(config.default_strategies.clone());
    Ok(registry)
}
