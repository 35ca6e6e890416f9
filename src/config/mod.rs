pub mod env;
pub mod loader;
pub mod types;

pub use loader::{discover_config_file, home_config_dir, load_config};
pub use types::{AuthSettings, Instance, InstanceConfig, LmsctlConfig};
