//! Orchestration layer for layer releases
//!
//! This module provides the high-level components that drive the build
//! stage and the region × variant publish matrix.

pub mod publish_orchestrator;
pub mod release_pipeline;
pub mod summary;

// Re-export main types for convenience
pub use publish_orchestrator::{
    LayerArchive, PairOutcome, PublishBatch, PublishOptions, PublishOrchestrator, PublishRecord,
    parse_version_identifier, statement_id,
};
pub use release_pipeline::ReleasePipeline;
pub use summary::{RunReport, RunStatus};
