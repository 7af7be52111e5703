//! Core identifier types shared across the harrier crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a store entity. Allocated monotonically by the
/// entity store and never reused, including after the entity is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Interned label token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u32);

/// Interned property-key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKeyId(pub u32);

/// Unique identifier for a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u64);

/// Admission sequence number for a captured delta. Assigned by the delta
/// buffer under its lock, so per-entity order matches commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct DeltaSeq(pub u64);

impl DeltaSeq {
    pub const ZERO: DeltaSeq = DeltaSeq(0);

    pub fn next(self) -> DeltaSeq {
        DeltaSeq(self.0 + 1)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label:{}", self.0)
    }
}

impl fmt::Display for PropertyKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prop:{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index:{}", self.0)
    }
}

impl fmt::Display for DeltaSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Lifecycle state of an index population.
///
/// Owned by the population coordinator; everyone else only reads it. `Online`
/// is reachable solely through a clean flip, `Failed` is terminal and the
/// index must be dropped and recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PopulationState {
    Creating,
    Populating,
    Online,
    Failed,
}

impl PopulationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PopulationState::Online | PopulationState::Failed)
    }
}

impl fmt::Display for PopulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PopulationState::Creating => "creating",
            PopulationState::Populating => "populating",
            PopulationState::Online => "online",
            PopulationState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
