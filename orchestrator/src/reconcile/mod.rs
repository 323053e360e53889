//! State reconciliation
//!
//! Keeps deployment records in sync with observed instance state: [`status`]
//! interprets raw remote statuses, [`poller`] runs the adaptive watch loop.

pub mod poller;
pub mod status;

pub use poller::{PollerOptions, StatusPoller, WatchTarget};
pub use status::{DeploymentStatus, StatusTransition};
