//! Memory synchronization core.
//!
//! Keeps an agent's long-term memory in two stores at once:
//! - **Vector store** (SQLite): the source of truth for memory text, searched by similarity
//! - **Graph store** (SQLite property graph): entities, contact details and relationships
//!   extracted from each memory
//!
//! Saves go to the vector store synchronously; extraction and the graph write
//! run on a bounded background queue. Searches prefer the graph and fall back
//! to vector similarity. `MemorySubstrate` bundles everything behind one API.

pub mod config;
pub mod consolidation;
pub mod coordinator;
pub mod embedding;
pub mod extraction;
pub mod generation;
pub mod knowledge;
pub mod migration;
pub mod search;
pub mod semantic;
pub mod sync_queue;
pub mod writer;

mod substrate;
pub use substrate::MemorySubstrate;
