//! Engine pool configuration.

use rustc_hash::FxHashMap;

use crate::actors::{DEFAULT_POOL, PoolSpec};
use crate::graph::NodeCategory;

/// Maps node-processor categories to named event-loop pools and sizes
/// them. The defaults give model, data and general work their own pools so
/// long-running model invocations never starve bookkeeping messages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pools: Vec<PoolSpec>,
    categories: FxHashMap<NodeCategory, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut categories = FxHashMap::default();
        categories.insert(NodeCategory::Model, "model".to_string());
        categories.insert(NodeCategory::Data, "data".to_string());
        categories.insert(NodeCategory::General, "general".to_string());
        categories.insert(NodeCategory::ChildJob, "general".to_string());
        Self {
            pools: vec![
                PoolSpec::new("model", 2),
                PoolSpec::new("data", 2),
                PoolSpec::new("general", 2),
            ],
            categories,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool a category dispatches to, adding the pool spec if
    /// it is not declared yet.
    #[must_use]
    pub fn with_category_pool(mut self, category: NodeCategory, spec: PoolSpec) -> Self {
        self.categories.insert(category, spec.name.clone());
        if !self.pools.iter().any(|existing| existing.name == spec.name) {
            self.pools.push(spec);
        }
        self
    }

    /// Pool the given category's node processors run on.
    #[must_use]
    pub fn pool_for(&self, category: NodeCategory) -> &str {
        self.categories
            .get(&category)
            .map(String::as_str)
            .unwrap_or(DEFAULT_POOL)
    }

    /// Pool specs the hosting actor system must be started with.
    #[must_use]
    pub fn pool_specs(&self) -> Vec<PoolSpec> {
        self.pools.clone()
    }
}
