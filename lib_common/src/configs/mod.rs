//! # Configuration Modules
//!
//! Typed settings for the relay components. Loading them from the command
//! line, the environment or a config file is the servers' job.

/// Ambassador and store settings with deployment defaults.
pub mod settings;

pub use settings::{local_hostname, AmbassadorSettings, StoreSettings, DEFAULT_EVENT_LOG_PATH};
