//! Provisioning engine
//!
//! Converges roles, database, privileges and schema to the desired state
//! and tears them down again:
//! - `planner`: read-only diff of desired vs. actual state
//! - `executor`: `scaffold`, ordered idempotent ensure steps
//! - `reset`: destructive teardown
//! - `age`: graph extension initialisation and status

pub mod age;
pub mod catalog;
pub mod executor;
pub mod planner;
pub mod reset;
pub mod types;

pub use executor::{run_revoke, run_scaffold, ScaffoldOptions};
pub use planner::ProvisioningPlanner;
pub use reset::{run_reset, ResetOptions};
pub use types::DesiredState;
