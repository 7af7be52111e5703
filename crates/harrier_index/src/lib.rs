//! Online secondary-index population.
//!
//! Builds a queryable non-unique index over entities in a live store while
//! writers keep committing, then atomically flips it online. The moving
//! parts, bottom up:
//!
//! - [`accessor::IndexAccessor`]: the queryable structure itself.
//! - [`delta::DeltaBuffer`]: capture of concurrent mutations, buffered
//!   while populating and applied directly once flipped.
//! - [`scan::IndexScanner`]: streams the committed in-scope entries.
//! - `populate`: the background job driving scan, drains, and the flip.
//! - [`service::IndexingService`]: the lifecycle surface for create, await
//!   online, drop, and query.
//!
//! The correctness spine is a single ordering rule: the capture observer is
//! registered with the store before the population job is scheduled, so no
//! committed mutation can slip between the scanned snapshot and the delta
//! stream. Everything a scan misses, a delta covers; overlaps are resolved
//! by the accessor's replace-on-add semantics plus the populator's
//! delta-wins bookkeeping.

pub mod accessor;
pub mod delta;
pub mod descriptor;
pub mod scan;
pub mod service;

mod populate;
mod state;

pub use accessor::IndexAccessor;
pub use delta::{Delta, DeltaBuffer, DeltaKind};
pub use descriptor::{IndexDescriptor, ScopeKey};
pub use scan::{IndexScanner, StoreScanner};
pub use service::{EntityIdCursor, IndexingService, Readiness};
pub use state::PopulationMetricsSnapshot;

pub use harrier_common::types::PopulationState;
