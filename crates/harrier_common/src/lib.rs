//! Shared vocabulary for the harrier workspace: identifier newtypes, property
//! values and their order-preserving encoding, the error hierarchy, config
//! sections, the stop signal, and the background job scheduler.
//!
//! Nothing in this crate touches the entity store or the index subsystem; it
//! is the bottom of the dependency graph.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod signal;
pub mod types;
pub mod value;

pub use error::{ErrorKind, HarrierError, IndexError, SchedulerError, StoreError};
pub use scheduler::{JobHandle, JobScheduler, SlowScheduler, ThreadScheduler};
pub use signal::StopSignal;
pub use types::{DeltaSeq, EntityId, IndexId, LabelId, PopulationState, PropertyKeyId};
pub use value::{PropertyValue, ValueTuple};
