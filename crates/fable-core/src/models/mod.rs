//! Data models for Fable

mod domain;
mod entity;
mod pending_change;
mod sync_meta;

pub use domain::{Blurb, Chapter, Character, GeneratedStory, Scene, Story};
pub use entity::{EntityId, EntityKind, EntityRecord};
pub use pending_change::{ChangeOp, PendingChange};
pub use sync_meta::SyncMeta;
