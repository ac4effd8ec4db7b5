//! Strategy registration and name resolution.

use super::{StrategyId, SyncStrategy};
use crate::entity::EntityType;
use crate::error::{SyncError, SyncResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Requested strategy names for one invocation. Empty means the configured
/// default set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyFilter {
    names: Vec<String>,
}

impl StrategyFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Use the configured defaults
    pub fn defaults() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Maps strategy identities to implementations, and names to identities.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn SyncStrategy>>,
    index: HashMap<StrategyId, usize>,
    aliases: BTreeMap<String, StrategyId>,
    defaults: Vec<String>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Empty registry with the built-in `push-<entity>` / `pull-<entity>` aliases
    pub fn new() -> Self {
        let aliases = StrategyId::all()
            .into_iter()
            .map(|id| (id.short_name(), id))
            .collect();
        Self {
            strategies: Vec::new(),
            index: HashMap::new(),
            aliases,
            defaults: Vec::new(),
        }
    }

    /// Register a strategy under its identity. Registration order is run order
    /// when no explicit selection is made.
    pub fn register(&mut self, strategy: Arc<dyn SyncStrategy>) -> SyncResult<()> {
        let id = strategy.id();
        if self.index.contains_key(&id) {
            return Err(SyncError::Configuration(format!(
                "Strategy {} is registered twice",
                id
            )));
        }
        crate::log_strategy_debug!(
            "Registered {} ({})",
            id,
            strategy.directions()
        );
        self.index.insert(id, self.strategies.len());
        self.strategies.push(strategy);
        Ok(())
    }

    /// Add or override a name → identity mapping
    pub fn alias(&mut self, name: impl Into<String>, id: StrategyId) {
        self.aliases.insert(name.into(), id);
    }

    pub fn with_aliases(mut self, aliases: &BTreeMap<String, StrategyId>) -> Self {
        for (name, id) in aliases {
            self.alias(name.clone(), *id);
        }
        self
    }

    /// Names run when the filter is empty. An empty list means every
    /// registered strategy.
    pub fn set_defaults(&mut self, names: Vec<String>) {
        self.defaults = names;
    }

    pub fn get(&self, id: StrategyId) -> Option<Arc<dyn SyncStrategy>> {
        self.index.get(&id).map(|i| Arc::clone(&self.strategies[*i]))
    }

    /// Registered identities in registration order
    pub fn ids(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Names accepted by [`resolve`](Self::resolve) that point at a
    /// registered strategy
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, id)| self.index.contains_key(id))
            .map(|(name, _)| name.clone())
            .chain(self.ids().into_iter().map(|id| id.qualified_name()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn resolve_name(&self, name: &str) -> SyncResult<StrategyId> {
        let trimmed = name.trim();
        let id = StrategyId::from_qualified(trimmed).or_else(|| self.aliases.get(trimmed).copied());
        match id {
            Some(id) if self.index.contains_key(&id) => Ok(id),
            _ => Err(SyncError::UnknownStrategy {
                name: name.to_string(),
                known: self.known_names().join(", "),
            }),
        }
    }

    /// Resolve a filter to the ordered, de-duplicated strategies to run.
    ///
    /// Every name is validated before anything is returned, so one unknown
    /// name rejects the whole invocation.
    pub fn resolve(&self, filter: &StrategyFilter) -> SyncResult<Vec<Arc<dyn SyncStrategy>>> {
        let ids: Vec<StrategyId> = if !filter.is_empty() {
            filter
                .names()
                .iter()
                .map(|name| self.resolve_name(name))
                .collect::<SyncResult<_>>()?
        } else if !self.defaults.is_empty() {
            self.defaults
                .iter()
                .map(|name| self.resolve_name(name))
                .collect::<SyncResult<_>>()?
        } else {
            self.ids()
        };

        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.get(id))
            .collect())
    }

    /// Registered strategies that can run single-entity mode for `entity`
    pub fn for_model(&self, entity: EntityType) -> Vec<Arc<dyn SyncStrategy>> {
        self.strategies
            .iter()
            .filter(|s| s.supports_model(entity))
            .cloned()
            .collect()
    }
}
