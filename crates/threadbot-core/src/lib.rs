//! Threadbot Core: shared types, message bus, configuration and the
//! user → assistant-thread store.

pub mod bus;
pub mod config;
pub mod store;
pub mod utils;

pub use config::Config;
pub use store::{StoreError, ThreadStore};
