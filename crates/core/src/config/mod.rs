//! Runtime configuration: TOML document, env overrides, validation.
//!
//! Split into focused submodules:
//! - `types`: config structs and their defaults
//! - `loading`: TOML/file/env loading and env overrides
//! - `validation`: consistency checks

mod loading;
mod types;
mod validation;

pub use loading::load_dotenv;
pub use types::{
    AdaptiveConfig, CleanupPolicy, MemoryConfig, PolicyTable, RuntimeConfig, SchedulerConfig,
    StreamingConfig,
};
