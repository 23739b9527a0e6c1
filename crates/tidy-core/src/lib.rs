pub mod config;
pub mod paths;

pub use config::{
    dotted_patch, parse_override_value, resolve_global_config_path, ClientConfig, ConfigScope,
    ConfigStore, LoggingConfig, StreamConfig,
};
pub use paths::resolve_state_dir;
