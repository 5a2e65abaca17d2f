//! The observable message bus (§4.1), layered runtime configuration, and
//! the persisted-state path layout (§6) shared by every role.

pub mod bus;
pub mod config;
pub mod error;
pub mod storage_paths;

pub use bus::{Bus, DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_TAP_CAPACITY};
pub use config::{
    AppConfig, BusConfig, ConfigStore, ExecutorConfig, GgsConfig, MemoryRuntimeConfig,
    ProviderConfig, ValidatorConfig,
};
pub use error::{BusError, BusResult};
pub use storage_paths::{ensure_agsh_dirs, resolve_agsh_paths, AgshPaths};
