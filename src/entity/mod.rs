//! Tracked entities and the registry that owns them.

pub mod registry;
pub mod types;

pub use registry::{EntityHandle, EntityRegistry, DEFAULT_HISTORY_LIMIT};
pub use types::{clamp_unit, EntityUpdate, MutationKind, MutationRecord, TrackedEntity};
