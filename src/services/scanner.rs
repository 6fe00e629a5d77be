use chrono::Utc;
use image::GenericImageView;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::core::grouping::SimilarityGrouper;
use crate::core::hash::HashCodec;
use crate::core::image::ImageRecord;
use crate::core::scoring::QualityScorer;
use crate::services::state::{GroupState, ScanSummary};

/// Extensions accepted as scan candidates.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "ico",
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("cannot enumerate {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("scan cancelled")]
    Cancelled,

    #[error(
        "hash size {hash_size} out of range ({min}..={max})",
        min = HashCodec::MIN_HASH_SIZE,
        max = HashCodec::MAX_HASH_SIZE
    )]
    InvalidHashSize { hash_size: u32 },

    #[error("similarity threshold {threshold} must be in (0, 1]")]
    InvalidThreshold { threshold: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub recursive: bool,
    pub hash_size: u32,
    pub similarity_threshold: f64,
}

impl ScanOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            hash_size: HashCodec::DEFAULT_HASH_SIZE,
            similarity_threshold: 0.95,
        }
    }

    fn validate(&self) -> Result<(), ScanError> {
        if !(HashCodec::MIN_HASH_SIZE..=HashCodec::MAX_HASH_SIZE).contains(&self.hash_size) {
            return Err(ScanError::InvalidHashSize {
                hash_size: self.hash_size,
            });
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ScanError::InvalidThreshold {
                threshold: self.similarity_threshold,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Discovery,
    Hashing,
    Grouping,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub files_discovered: usize,
    pub files_processed: usize,
    pub current_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub timestamp: String,
    pub files_discovered: usize,
    pub files_processed: usize,
    pub failures: Vec<ScanFailure>,
    pub summary: ScanSummary,
}

/// Drives one end-to-end scan and owns the resulting group state.
///
/// At most one scan runs at a time: a second `scan` call while one is in
/// flight fails fast with `AlreadyScanning` instead of queuing. Progress is
/// observable mid-scan through the atomic counters and, optionally, a
/// progress channel.
pub struct ScanSession {
    state: Mutex<SessionState>,
    files_discovered: AtomicUsize,
    files_processed: AtomicUsize,
    cancel: AtomicBool,
    groups: GroupState,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            files_discovered: AtomicUsize::new(0),
            files_processed: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
            groups: GroupState::new(),
            progress_sender: None,
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn groups(&self) -> &GroupState {
        &self.groups
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Files processed over files discovered, as a percentage. Reads the
    /// counters mid-scan, so callers can poll while a scan runs.
    pub fn progress_percent(&self) -> f64 {
        if self.state() == SessionState::Completed {
            return 100.0;
        }
        let discovered = self.files_discovered.load(Ordering::Relaxed);
        if discovered == 0 {
            return 0.0;
        }
        let processed = self.files_processed.load(Ordering::Relaxed);
        processed as f64 / discovered as f64 * 100.0
    }

    /// Ask an in-flight scan to stop at the next checkpoint. The session
    /// reverts to `Idle` and the previous group state is left untouched.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Run a full scan: walk, decode/hash/score each file, cluster, and
    /// replace the group state with the result.
    pub fn scan(&self, options: &ScanOptions) -> Result<ScanReport, ScanError> {
        options.validate()?;
        self.try_begin()?;

        match self.run_scan(options) {
            Ok(report) => {
                self.set_state(SessionState::Completed);
                self.send_progress(ScanPhase::Complete, String::new());
                Ok(report)
            }
            Err(ScanError::Cancelled) => {
                self.set_state(SessionState::Idle);
                Err(ScanError::Cancelled)
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn run_scan(&self, options: &ScanOptions) -> Result<ScanReport, ScanError> {
        let root = fs::canonicalize(&options.root).map_err(|source| ScanError::Directory {
            path: options.root.display().to_string(),
            source,
        })?;
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: root.display().to_string(),
            });
        }
        // Probe readability up front so an unreadable root fails the scan
        // instead of silently yielding zero files.
        fs::read_dir(&root).map_err(|source| ScanError::Directory {
            path: root.display().to_string(),
            source,
        })?;

        log::info!(
            "scanning {} (recursive: {}, hash size: {}, threshold: {})",
            root.display(),
            options.recursive,
            options.hash_size,
            options.similarity_threshold
        );

        let candidates = self.discover_files(&root, options.recursive);
        self.checkpoint()?;
        log::info!("discovered {} image files", candidates.len());

        let codec = HashCodec::new(options.hash_size);
        let scorer = QualityScorer::default();

        let processed: Vec<Option<ProcessedFile>> = candidates
            .par_iter()
            .map(|path| {
                if self.cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let outcome = process_file(path, &codec, &scorer);
                self.files_processed.fetch_add(1, Ordering::Relaxed);
                self.send_progress(ScanPhase::Hashing, path.display().to_string());
                Some(outcome)
            })
            .collect();
        self.checkpoint()?;

        let mut records = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for outcome in processed.into_iter().flatten() {
            if let Some(reason) = outcome.error {
                failures.push(ScanFailure {
                    path: outcome.record.path.clone(),
                    reason,
                });
            }
            records.push(outcome.record);
        }

        self.send_progress(ScanPhase::Grouping, String::new());
        let grouper = SimilarityGrouper::new(options.similarity_threshold);
        let groups = grouper.group(records);
        log::info!(
            "found {} duplicate groups ({} files failed)",
            groups.len(),
            failures.len()
        );

        self.groups.install(groups, root);
        let summary = self.groups.summary();

        Ok(ScanReport {
            timestamp: Utc::now().to_rfc3339(),
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            failures,
            summary,
        })
    }

    fn discover_files(&self, root: &Path, recursive: bool) -> Vec<PathBuf> {
        let mut walker = WalkDir::new(root).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut candidates = Vec::new();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !is_supported(path) {
                continue;
            }
            candidates.push(path.to_path_buf());
            self.files_discovered.fetch_add(1, Ordering::Relaxed);
            self.send_progress(ScanPhase::Discovery, path.display().to_string());
        }
        candidates
    }

    fn try_begin(&self) -> Result<(), ScanError> {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Scanning {
            return Err(ScanError::AlreadyScanning);
        }
        *state = SessionState::Scanning;
        self.files_discovered.store(0, Ordering::Relaxed);
        self.files_processed.store(0, Ordering::Relaxed);
        self.cancel.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), ScanError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap() = next;
    }

    fn send_progress(&self, phase: ScanPhase, current_file: String) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(ScanProgress {
                phase,
                files_discovered: self.files_discovered.load(Ordering::Relaxed),
                files_processed: self.files_processed.load(Ordering::Relaxed),
                current_file,
            });
        }
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

struct ProcessedFile {
    record: ImageRecord,
    error: Option<String>,
}

fn process_file(path: &Path, codec: &HashCodec, scorer: &QualityScorer) -> ProcessedFile {
    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    match HashCodec::decode(path) {
        Ok(image) => {
            let fingerprint = codec.compute(&image);
            let quality = scorer.score(&image, file_size);
            let dimensions = image.dimensions();
            ProcessedFile {
                record: ImageRecord {
                    path: path.to_path_buf(),
                    file_size,
                    dimensions: Some(dimensions),
                    fingerprint: Some(fingerprint),
                    quality_score: Some(quality.overall),
                },
                error: None,
            }
        }
        Err(e) => {
            log::warn!("skipping {}: {}", path.display(), e);
            ProcessedFile {
                record: ImageRecord::failed(path.to_path_buf(), file_size),
                error: Some(e.to_string()),
            }
        }
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    fn split_image(size: u32, vertical: bool) -> DynamicImage {
        let img = RgbImage::from_fn(size, size, |x, y| {
            let coord = if vertical { x } else { y };
            if coord < size / 2 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn write_duplicate_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let a = dir.join("a.png");
        let b = dir.join("b.png");
        split_image(256, true).save(&a).unwrap();
        fs::copy(&a, &b).unwrap();
        (a, b)
    }

    #[test]
    fn scan_groups_identical_files_and_reports_corrupt_ones() {
        let dir = TempDir::new().unwrap();
        write_duplicate_pair(dir.path());
        split_image(256, false).save(dir.path().join("c.png")).unwrap();
        fs::write(dir.path().join("broken.jpg"), b"not an image").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let session = ScanSession::new();
        let report = session.scan(&ScanOptions::new(dir.path())).unwrap();

        assert_eq!(report.files_discovered, 4);
        assert_eq!(report.files_processed, 4);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("broken.jpg"));
        assert_eq!(report.summary.total_groups, 1);
        assert_eq!(report.summary.total_images, 2);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.progress_percent(), 100.0);
    }

    #[test]
    fn rescan_of_unchanged_directory_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_duplicate_pair(dir.path());

        let options = ScanOptions::new(dir.path());
        let session = ScanSession::new();

        let first = session.scan(&options).unwrap();
        let first_keys: Vec<String> = session.groups().snapshot().groups.into_keys().collect();

        let second = session.scan(&options).unwrap();
        let second_keys: Vec<String> = session.groups().snapshot().groups.into_keys().collect();

        assert_eq!(first_keys, second_keys);
        assert_eq!(first.summary, second.summary);
    }

    #[test]
    fn representative_is_highest_quality_member() {
        let dir = TempDir::new().unwrap();
        // Same structure at two resolutions: the larger copy scores higher.
        let big = dir.path().join("big.png");
        let small = dir.path().join("small.png");
        split_image(512, true).save(&big).unwrap();
        split_image(128, true).save(&small).unwrap();

        let mut options = ScanOptions::new(dir.path());
        options.similarity_threshold = 0.9;
        let session = ScanSession::new();
        let report = session.scan(&options).unwrap();
        assert_eq!(report.summary.total_groups, 1);

        let snapshot = session.groups().snapshot();
        let detail = snapshot.groups.values().next().unwrap();
        assert!(detail.members[0].is_representative);
        assert!(detail.members[0].path.ends_with("big.png"));
    }

    #[test]
    fn non_recursive_scan_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        write_duplicate_pair(dir.path());
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        split_image(256, true).save(sub.join("d.png")).unwrap();

        let mut options = ScanOptions::new(dir.path());
        options.recursive = false;
        let session = ScanSession::new();
        let report = session.scan(&options).unwrap();

        assert_eq!(report.files_discovered, 2);
        assert_eq!(report.summary.total_images, 2);
    }

    #[test]
    fn second_scan_while_scanning_is_rejected() {
        let session = ScanSession::new();
        session.try_begin().unwrap();
        assert!(matches!(session.try_begin(), Err(ScanError::AlreadyScanning)));

        // A finished session accepts the next scan.
        session.set_state(SessionState::Completed);
        assert!(session.try_begin().is_ok());
    }

    #[test]
    fn missing_root_fails_the_session() {
        let session = ScanSession::new();
        let options = ScanOptions::new("/definitely/not/a/real/dir");
        assert!(matches!(
            session.scan(&options),
            Err(ScanError::Directory { .. })
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn invalid_options_are_rejected_before_any_state_change() {
        let dir = TempDir::new().unwrap();
        let session = ScanSession::new();

        let mut options = ScanOptions::new(dir.path());
        options.hash_size = 1;
        assert!(matches!(
            session.scan(&options),
            Err(ScanError::InvalidHashSize { .. })
        ));

        let mut options = ScanOptions::new(dir.path());
        options.similarity_threshold = 1.5;
        assert!(matches!(
            session.scan(&options),
            Err(ScanError::InvalidThreshold { .. })
        ));

        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn cancellation_checkpoint_reverts_to_idle() {
        let session = ScanSession::new();
        session.try_begin().unwrap();
        session.cancel();
        assert!(matches!(session.checkpoint(), Err(ScanError::Cancelled)));
    }

    #[test]
    fn full_cleanup_leaves_nothing_to_group() {
        let dir = TempDir::new().unwrap();
        write_duplicate_pair(dir.path());
        split_image(256, false).save(dir.path().join("c.png")).unwrap();

        let options = ScanOptions::new(dir.path());
        let session = ScanSession::new();
        session.scan(&options).unwrap();

        let outcome = session.groups().delete_all();
        assert!(outcome.failures.is_empty());
        assert_eq!(session.groups().group_count(), 0);

        // Survivors are pairwise distinct, so a re-scan finds no groups.
        let report = session.scan(&options).unwrap();
        assert_eq!(report.summary.total_groups, 0);
    }
}
