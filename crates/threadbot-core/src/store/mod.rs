//! User → assistant-thread store.
//!
//! # Disk format
//!
//! A single pretty-printed JSON object, `user_threads_data.json` by default:
//!
//! ```json
//! {
//!   "183920471234": "thread_abc123",
//!   "559102938475": "thread_def456"
//! }
//! ```
//!
//! No schema version, no checksum. Entries are only ever added; removing one
//! means editing or deleting the file while the bot is stopped.

pub mod error;
pub mod threads;

pub use error::StoreError;
pub use threads::{ThreadLookup, ThreadStore, DEFAULT_STORE_FILE};
