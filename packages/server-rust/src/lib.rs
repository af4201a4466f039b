//! Entity version control relay: correlates repository requests with their
//! asynchronous replies over a cluster bus and orchestrates version export
//! and import on top of them.

pub mod config;
pub mod error;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod traits;
pub mod transport;
pub mod worker;

pub use config::VersionControlConfig;
pub use error::VcError;
pub use sync::{Collaborators, VersionControlService};
pub use traits::{
    EntityActionListener, EntityCodec, EntityService, RepositorySettingsStore, TransactionManager,
};
