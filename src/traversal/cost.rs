/// Cost model: numeric cost of entering a node and of moving inside it
///
/// Cost of traversing a node:
/// - interior: `multiplier(node) * distance_mm`
/// - step onto it: `entry_cost(to.tag) + to.penalty`
///
/// Distances are in millimeters so accumulated costs stay integral across
/// long paths. Multipliers below 1.0 make a distance-based heuristic
/// inadmissible unless the search scales its heuristic down to match; that is
/// the caller's responsibility and is not checked here.

use std::fmt;
use std::sync::Arc;

use crate::config::{cost, tags};
use crate::error::ConfigError;
use crate::graph::GraphNode;

/// Full custom cost override. Hooks default to the free functions below,
/// so providers usually adjust the default instead of replacing it.
pub trait CostProvider: Send + Sync {
    fn multiplier_for(&self, costs: &CostModel, node: &dyn GraphNode) -> f32 {
        default_multiplier(costs, node)
    }

    fn connection_cost_for(&self, costs: &CostModel, from: &dyn GraphNode, to: &dyn GraphNode) -> u32 {
        default_connection_cost(costs, from, to)
    }
}

/// Per-tag multiplier, ignoring any provider
#[inline]
pub fn default_multiplier(costs: &CostModel, node: &dyn GraphNode) -> f32 {
    match &costs.tag_multipliers {
        Some(multipliers) => multipliers[node.tag().slot()],
        None => cost::DEFAULT_MULTIPLIER,
    }
}

/// Per-tag entry cost plus node penalty, ignoring any provider
#[inline]
pub fn default_connection_cost(costs: &CostModel, _from: &dyn GraphNode, to: &dyn GraphNode) -> u32 {
    let entry = match &costs.tag_entry_costs {
        Some(entry_costs) => entry_costs[to.tag().slot()],
        None => 0,
    };
    entry.saturating_add(to.penalty())
}

#[derive(Clone, Default)]
pub struct CostModel {
    tag_entry_costs: Option<Box<[u32; tags::COUNT]>>,
    tag_multipliers: Option<Box<[f32; tags::COUNT]>>,
    provider: Option<Arc<dyn CostProvider>>,
}

impl fmt::Debug for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CostModel")
            .field("tag_entry_costs", &self.tag_entry_costs)
            .field("tag_multipliers", &self.tag_multipliers)
            .field("provider", &self.provider.as_ref().map(|_| ".."))
            .finish()
    }
}

impl CostModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-tag entry costs. Must have exactly 32 entries.
    pub fn set_tag_entry_costs(&mut self, entry_costs: &[u32]) -> Result<(), ConfigError> {
        let array: [u32; tags::COUNT] =
            entry_costs
                .try_into()
                .map_err(|_| ConfigError::TagArrayLength {
                    field: "tag_entry_costs",
                    expected: tags::COUNT,
                    actual: entry_costs.len(),
                })?;
        self.tag_entry_costs = Some(Box::new(array));
        Ok(())
    }

    /// Set per-tag multipliers. Must have exactly 32 finite, non-negative entries.
    pub fn set_tag_multipliers(&mut self, multipliers: &[f32]) -> Result<(), ConfigError> {
        let array: [f32; tags::COUNT] =
            multipliers
                .try_into()
                .map_err(|_| ConfigError::TagArrayLength {
                    field: "tag_multipliers",
                    expected: tags::COUNT,
                    actual: multipliers.len(),
                })?;

        if let Some((tag, &value)) = array
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(ConfigError::InvalidMultiplier { tag, value });
        }

        self.tag_multipliers = Some(Box::new(array));
        Ok(())
    }

    pub fn clear_tag_entry_costs(&mut self) {
        self.tag_entry_costs = None;
    }

    pub fn clear_tag_multipliers(&mut self) {
        self.tag_multipliers = None;
    }

    pub fn set_provider(&mut self, provider: Arc<dyn CostProvider>) {
        self.provider = Some(provider);
    }

    pub fn clear_provider(&mut self) {
        self.provider = None;
    }

    pub fn with_tag_entry_costs(mut self, entry_costs: &[u32]) -> Result<Self, ConfigError> {
        self.set_tag_entry_costs(entry_costs)?;
        Ok(self)
    }

    pub fn with_tag_multipliers(mut self, multipliers: &[f32]) -> Result<Self, ConfigError> {
        self.set_tag_multipliers(multipliers)?;
        Ok(self)
    }

    pub fn with_provider(mut self, provider: Arc<dyn CostProvider>) -> Self {
        self.set_provider(provider);
        self
    }

    pub fn tag_entry_costs(&self) -> Option<&[u32; tags::COUNT]> {
        self.tag_entry_costs.as_deref()
    }

    pub fn tag_multipliers(&self) -> Option<&[f32; tags::COUNT]> {
        self.tag_multipliers.as_deref()
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    #[inline]
    pub fn multiplier_for(&self, node: &dyn GraphNode) -> f32 {
        match &self.provider {
            Some(provider) => provider.multiplier_for(self, node),
            None => default_multiplier(self, node),
        }
    }

    #[inline]
    pub fn connection_cost_for(&self, from: &dyn GraphNode, to: &dyn GraphNode) -> u32 {
        match &self.provider {
            Some(provider) => provider.connection_cost_for(self, from, to),
            None => default_connection_cost(self, from, to),
        }
    }

    /// Cost of travelling `distance_mm` inside `node`
    #[inline]
    pub fn interior_cost(&self, node: &dyn GraphNode, distance_mm: u32) -> u32 {
        let scaled = (self.multiplier_for(node) * distance_mm as f32).round();
        if scaled >= u32::MAX as f32 {
            u32::MAX
        } else {
            scaled.max(0.0) as u32
        }
    }

    /// Full cost of moving from `from` onto `to` across `distance_mm`
    #[inline]
    pub fn step_cost(&self, from: &dyn GraphNode, to: &dyn GraphNode, distance_mm: u32) -> u32 {
        self.interior_cost(to, distance_mm)
            .saturating_add(self.connection_cost_for(from, to))
    }
}
