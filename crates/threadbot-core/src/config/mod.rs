//! Configuration system: schema, loading, env var overrides and validation.
//!
//! # Usage
//! ```no_run
//! use threadbot_core::config;
//!
//! let cfg = config::load_config(None);
//! cfg.validate().expect("missing credentials");
//! println!("Assistant: {}", cfg.assistant.assistant_id);
//! ```

pub mod error;
pub mod loader;
pub mod schema;

pub use error::ConfigError;
pub use loader::{get_config_path, load_config};
pub use schema::Config;
