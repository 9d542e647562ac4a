//! Z-Wave gateway state - document persistence
//!
//! This crate provides the key/value JSON document store the gateway persists
//! its scenes through.
//!
//! ## Components
//!
//! - **store**: the [`DocumentStore`] trait with file-backed and in-memory implementations
//! - **error**: store-specific error types
//!
//! ## Example
//!
//! ```ignore
//! use zwave_state::{DocumentStore, JsonFileStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = JsonFileStore::open("store").await?;
//!     store.put("scenes", &serde_json::json!([])).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod store;

// Re-exports for convenience
pub use error::{Result, StateError};
pub use store::{DocumentStore, JsonFileStore, MemoryStore};
