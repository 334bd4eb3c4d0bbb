// src/core/mod.rs

// Orchestration core: target expansion, the bounded worker pool, the
// per-target stage pipeline, progress tracking and result aggregation.
// External tools stay behind the adapter contract; persistence stays behind
// the store trait.

pub mod adapters;
pub mod aggregate;
pub mod error;
pub mod export;
pub mod importers;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod targets;
