//! Log level admission filtering.
//!
//! Each log source has a [`FilterRule`] listing the severity levels it may
//! ship, optionally overridden for some hosts until an expiry. Rules live in
//! the [`RuleStore`], are kept in sync with the shared filter store by the
//! [`ConfigSyncBridge`], and are consulted for every record by the
//! [`AdmissionGate`].

pub mod clock;
pub mod gate;
pub mod persister;
pub mod policy;
pub mod record;
pub mod rule;
pub mod store;
pub mod sync_bridge;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::AdmissionGate;
pub use persister::{PersisterHandle, PersisterService};
pub use record::InputContext;
pub use rule::{FilterRule, FilterRuleMap, HostScope};
pub use store::RuleStore;
pub use sync_bridge::{ConfigSyncBridge, SyncError};
