//! Storage layer: the on-disk assessment cache that gates re-assessment.

mod cache;
mod error;

pub use cache::{AssessmentCache, CacheArtifact};
pub use error::StoreError;
