/// Node interface consumed from the search layer
///
/// The graph representation itself (grids, navmeshes, point graphs) lives
/// outside this crate. Traversal and cost rules only need to read a handful of
/// per-node attributes, so every graph exposes its nodes through `GraphNode`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::tags;
use crate::error::ConfigError;

/// Stable index of a node inside its graph
pub type NodeIndex = u32;

/// Tag slot of a node (0-31)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tag(u8);

impl Tag {
    pub const DEFAULT: Tag = Tag(0);

    pub fn new(value: u8) -> Result<Self, ConfigError> {
        if tags::is_valid(value) {
            Ok(Tag(value))
        } else {
            Err(ConfigError::InvalidTag(value))
        }
    }

    #[inline]
    pub fn value(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn slot(self) -> usize {
        self.0 as usize
    }

    /// Single-bit mask for this tag
    #[inline]
    pub fn bit(self) -> u32 {
        1u32 << self.0
    }
}

impl TryFrom<u8> for Tag {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tag::new(value)
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        tag.0
    }
}

bitflags! {
    /// Set of graph indices a search may enter (bit i = graph i)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GraphMask: u32 {
        const NONE = 0;
        const ALL = u32::MAX;
    }
}

impl Default for GraphMask {
    fn default() -> Self {
        GraphMask::ALL
    }
}

impl GraphMask {
    /// Mask containing only one graph
    #[inline]
    pub fn from_graph_index(graph_index: u8) -> Self {
        GraphMask::from_bits_retain(1u32 << (graph_index & 31))
    }

    #[inline]
    pub fn contains_graph(self, graph_index: u8) -> bool {
        graph_index < 32 && self.bits() & (1u32 << graph_index) != 0
    }
}

/// 3D world position (world units)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ZERO: Position = Position { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn distance_squared_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance in millimeters, the unit costs are accumulated in
    pub fn distance_mm_to(&self, other: &Position) -> u32 {
        (self.distance_to(other) * crate::config::cost::MM_PER_UNIT as f32).round() as u32
    }
}

/// Per-node attributes read by traversal and cost rules.
///
/// Implementations are read concurrently from several worker threads and must
/// not change while a search is running.
pub trait GraphNode: Send + Sync {
    fn index(&self) -> NodeIndex;

    /// Intrinsic walkability, independent of any policy
    fn is_walkable(&self) -> bool;

    fn tag(&self) -> Tag;

    /// Extra cost for stepping onto this node
    fn penalty(&self) -> u32;

    /// Connected-component id
    fn area(&self) -> i32;

    /// Index of the graph that owns this node
    fn graph_index(&self) -> u8;

    fn position(&self) -> Position;
}
