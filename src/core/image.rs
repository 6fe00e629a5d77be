use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::fingerprint::Fingerprint;

/// One physical image file observed during a scan.
///
/// Files that failed to decode keep their record (so they show up in the
/// scan's error summary) but carry no fingerprint, dimensions, or score and
/// are excluded from grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub file_size: u64,
    pub dimensions: Option<(u32, u32)>,
    pub fingerprint: Option<Fingerprint>,
    pub quality_score: Option<f64>,
}

impl ImageRecord {
    /// Record for a file that could not be decoded.
    pub fn failed(path: PathBuf, file_size: u64) -> Self {
        Self {
            path,
            file_size,
            dimensions: None,
            fingerprint: None,
            quality_score: None,
        }
    }
}
