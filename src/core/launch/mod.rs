pub mod controller;
pub mod preparer;
pub mod task;

pub use controller::{ProcessExit, ServerInstance, ShutdownPolicy, SHUTDOWN_COMMAND};
pub use preparer::{LaunchContext, LaunchPreparer, ProvisioningPreparer, VersionList};
pub use task::LaunchCommand;
