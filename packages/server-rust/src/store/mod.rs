//! In-memory collaborators: entity store with transactions, JSON entity
//! codec, settings persistence and an audit log.

pub mod codec;
pub mod memory;
pub mod settings;

pub use codec::JsonEntityCodec;
pub use memory::{AuditLog, MemoryEntityStore, StoredEntity};
pub use settings::MemorySettingsStore;
