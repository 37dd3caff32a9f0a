//! Core types and collaborator traits for the memsync memory core.
//!
//! This crate defines the shared data model used by the write path, the
//! extraction pipeline, the graph writer and the search path, plus the
//! traits through which the core talks to its external stores. It contains
//! no business logic.

pub mod config;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod graph;
pub mod memory;
pub mod search;
