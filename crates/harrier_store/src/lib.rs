//! In-memory entity store: the collaborator the index subsystem populates
//! against.
//!
//! Entities are label-tagged property maps in a concurrent map. Every
//! committed mutation is dispatched synchronously, while the entity's map
//! entry is still held, to registered change observers whose scope matches.
//! That dispatch discipline is what gives downstream consumers commit order
//! per entity, which the index capture path depends on.

pub mod events;
pub mod store;
pub mod tokens;

pub use events::{ChangeObserver, ChangeScope, ObserverId, PropertyChange};
pub use store::EntityStore;
pub use tokens::TokenRegistry;
