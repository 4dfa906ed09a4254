//! State management.
//!
//! The state records, per tracked instance, its remote identifier and the
//! attributes last observed from the remote side. Snapshots are persisted by
//! a [`StateStore`] backend; during a run they are shared through a
//! [`StateLedger`].

mod ledger;
mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use ledger::StateLedger;
pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::{open_store, StateStore};
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, ResourceRecord, MAX_HISTORY,
    STATE_VERSION,
};
