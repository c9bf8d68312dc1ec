//! Storage implementations for the hyperrag library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory graph and vector storage (always available)
//!
//! Persistent engines implement [`GraphStore`](crate::GraphStore) and
//! [`VectorStore`](crate::VectorStore) outside this crate.

pub mod memory;

pub use memory::MemoryStore;
