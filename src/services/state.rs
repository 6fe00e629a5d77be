use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::core::grouping::DuplicateGroup;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("group not found: {key}")]
    GroupNotFound { key: String },
}

/// Aggregate numbers for the current group map. Recomputed under the state
/// lock whenever membership changes, so readers never see a group with a
/// removed member next to stale totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_images: usize,
    pub total_groups: usize,
    pub estimated_space_saved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub group_key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub files_deleted: usize,
    pub space_saved: u64,
    pub failures: Vec<DeleteFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub file_size: u64,
    pub dimensions: Option<(u32, u32)>,
    pub quality_score: Option<f64>,
    pub is_representative: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupDetail {
    pub key: String,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub groups: BTreeMap<String, GroupDetail>,
    pub summary: ScanSummary,
}

/// Registry of the current duplicate groups.
///
/// Populated wholesale when a scan completes, then mutated only by the
/// delete operations. A single lock serializes installs and deletes and
/// keeps the summary consistent with membership.
#[derive(Default)]
pub struct GroupState {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    groups: BTreeMap<String, DuplicateGroup>,
    summary: ScanSummary,
    /// Canonical root of the scan that produced the current groups. Delete
    /// targets must stay inside it.
    root: Option<PathBuf>,
}

impl GroupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire group map with the results of a completed scan.
    pub(crate) fn install(&self, groups: Vec<DuplicateGroup>, root: PathBuf) {
        let mut inner = self.inner.lock().unwrap();
        inner.groups = groups
            .into_iter()
            .map(|group| (group.group_key.clone(), group))
            .collect();
        inner.root = Some(root);
        inner.summary = compute_summary(&inner.groups);
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.clear();
        inner.root = None;
        inner.summary = ScanSummary::default();
    }

    pub fn summary(&self) -> ScanSummary {
        self.inner.lock().unwrap().summary
    }

    pub fn group_count(&self) -> usize {
        self.inner.lock().unwrap().groups.len()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap();
        let groups = inner
            .groups
            .iter()
            .map(|(key, group)| (key.clone(), detail_of(group)))
            .collect();
        StateSnapshot {
            groups,
            summary: inner.summary,
        }
    }

    pub fn get_group(&self, key: &str) -> Result<GroupDetail, StateError> {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(key)
            .map(detail_of)
            .ok_or_else(|| StateError::GroupNotFound {
                key: key.to_string(),
            })
    }

    /// Delete every non-representative member of the named groups.
    ///
    /// Unknown keys become per-key failures; a file already missing on disk
    /// counts as resolved, not failed. Groups whose membership would drop
    /// below two are removed from the active map.
    pub fn delete_selected(&self, keys: &[String]) -> DeleteOutcome {
        let mut inner = self.inner.lock().unwrap();
        let root = inner.root.clone();
        let mut outcome = DeleteOutcome::default();

        for key in keys {
            let Some(group) = inner.groups.get_mut(key) else {
                outcome.failures.push(DeleteFailure {
                    group_key: key.clone(),
                    reason: StateError::GroupNotFound { key: key.clone() }.to_string(),
                });
                continue;
            };

            let representative_index = group.representative_index;
            let members = std::mem::take(&mut group.members);
            let mut kept = Vec::with_capacity(1);

            for (idx, member) in members.into_iter().enumerate() {
                if idx == representative_index {
                    kept.push(member);
                    continue;
                }

                let inside_root = root
                    .as_ref()
                    .map(|root| member.path.starts_with(root))
                    .unwrap_or(false);
                if !inside_root {
                    outcome.failures.push(DeleteFailure {
                        group_key: key.clone(),
                        reason: format!(
                            "refusing to delete {}: outside the scanned root",
                            member.path.display()
                        ),
                    });
                    kept.push(member);
                    continue;
                }

                match fs::remove_file(&member.path) {
                    Ok(()) => {
                        outcome.files_deleted += 1;
                        outcome.space_saved += member.file_size;
                        log::info!("deleted duplicate {}", member.path.display());
                    }
                    // Already gone: the desired end state holds.
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        outcome.failures.push(DeleteFailure {
                            group_key: key.clone(),
                            reason: format!("{}: {}", member.path.display(), e),
                        });
                        kept.push(member);
                    }
                }
            }

            group.members = kept;
            group.representative_index = 0;
            if group.members.len() < 2 {
                inner.groups.remove(key);
            }
        }

        inner.summary = compute_summary(&inner.groups);
        outcome
    }

    /// Delete the redundant members of every current group.
    pub fn delete_all(&self) -> DeleteOutcome {
        let keys: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner.groups.keys().cloned().collect()
        };
        self.delete_selected(&keys)
    }
}

fn detail_of(group: &DuplicateGroup) -> GroupDetail {
    GroupDetail {
        key: group.group_key.clone(),
        members: group
            .members
            .iter()
            .enumerate()
            .map(|(idx, member)| GroupMember {
                path: member.path.clone(),
                file_size: member.file_size,
                dimensions: member.dimensions,
                quality_score: member.quality_score,
                is_representative: idx == group.representative_index,
            })
            .collect(),
    }
}

fn compute_summary(groups: &BTreeMap<String, DuplicateGroup>) -> ScanSummary {
    ScanSummary {
        total_images: groups.values().map(|g| g.members.len()).sum(),
        total_groups: groups.len(),
        estimated_space_saved: groups.values().map(|g| g.redundant_bytes()).sum(),
    }
}
