pub mod handle;
pub mod loader;
pub mod schema;

pub use handle::ConfigHandle;
pub use loader::{
    find_config_file, load_config, load_config_from_file, resolve_config, ConfigFormat,
    ResolvedConfig,
};
pub use schema::{GlobalConfig, DEFAULT_MAX_TOKENS};
