pub mod runtime;

pub use runtime::java_exe;
pub use runtime::runtime_download_url;
pub use runtime::HostPlatform;
pub use runtime::RuntimeProvisioner;
pub use runtime::ADOPTIUM_API_BASE;
