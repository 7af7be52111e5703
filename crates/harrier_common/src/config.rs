//! Configuration sections.

use serde::{Deserialize, Serialize};

/// Tuning for an index population run.
///
/// All sizes are clamped to at least 1 at the point of use, so a zeroed-out
/// config degrades to tiny batches rather than a stalled population.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Scan entries applied to the accessor between delta drains.
    pub scan_batch_size: usize,

    /// Maximum captured deltas applied per drain cycle.
    pub drain_batch_size: usize,

    /// Capacity of the captured-delta buffer. Exceeding it fails the
    /// population; deltas are never silently dropped.
    pub capture_capacity: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        PopulationConfig {
            scan_batch_size: 1024,
            drain_batch_size: 1024,
            capture_capacity: 65_536,
        }
    }
}
