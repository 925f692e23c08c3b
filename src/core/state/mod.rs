pub mod manager;
pub mod registry;
pub mod settings;

pub use manager::ServerManager;
pub use registry::InstanceRegistry;
pub use settings::{default_data_dir, Settings, ShutdownSettings};
