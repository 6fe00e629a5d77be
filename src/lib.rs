//! Perceptual image deduplication engine.
//!
//! Scans a directory tree for visually duplicate images, clusters them into
//! groups by perceptual-hash distance, scores each copy on resolution, file
//! size, and sharpness, and lets a caller delete redundant copies while the
//! highest-quality member of each group is always preserved.

pub mod core;
pub mod services;

pub use crate::core::fingerprint::Fingerprint;
pub use crate::core::grouping::{DuplicateGroup, SimilarityGrouper};
pub use crate::core::hash::{DecodeError, HashCodec};
pub use crate::core::image::ImageRecord;
pub use crate::core::scoring::{QualityBreakdown, QualityConfig, QualityScorer, QualityWeights};
pub use crate::services::scanner::{
    ScanError, ScanOptions, ScanProgress, ScanReport, ScanSession, SessionState,
};
pub use crate::services::state::{
    DeleteOutcome, GroupState, ScanSummary, StateError, StateSnapshot,
};
