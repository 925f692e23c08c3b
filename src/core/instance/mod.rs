pub mod agreement;
pub mod model;
pub mod store;

pub use model::{InstanceConfig, InstanceState, InstanceSummary};
pub use store::InstanceStore;
