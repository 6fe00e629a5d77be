use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use crate::core::image::ImageRecord;

/// A connected set of at least two images judged visually similar.
///
/// Members are ordered quality-descending (ties broken by ascending path),
/// so `representative_index` is always 0 at creation and the representative
/// is the copy worth keeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_key: String,
    pub members: Vec<ImageRecord>,
    pub representative_index: usize,
}

impl DuplicateGroup {
    pub fn representative(&self) -> &ImageRecord {
        &self.members[self.representative_index]
    }

    /// Bytes reclaimable by deleting every non-representative member.
    pub fn redundant_bytes(&self) -> u64 {
        self.members
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != self.representative_index)
            .map(|(_, member)| member.file_size)
            .sum()
    }
}

/// Clusters fingerprinted records into duplicate groups.
///
/// Similarity is not transitive, so groups are the connected components of
/// the graph whose edges join every pair within the distance bound; a plain
/// union-find over the full pairwise comparison realizes that definition.
pub struct SimilarityGrouper {
    threshold: f64,
}

impl SimilarityGrouper {
    /// `threshold` is a similarity fraction in (0, 1]: two images match when
    /// their normalized Hamming distance is at most `1 - threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn group(&self, records: Vec<ImageRecord>) -> Vec<DuplicateGroup> {
        let hashed: Vec<ImageRecord> = records
            .into_iter()
            .filter(|record| record.fingerprint.is_some())
            .collect();

        let max_distance = 1.0 - self.threshold;
        let mut components = DisjointSet::new(hashed.len());

        for i in 0..hashed.len() {
            for j in (i + 1)..hashed.len() {
                let (Some(a), Some(b)) = (&hashed[i].fingerprint, &hashed[j].fingerprint) else {
                    continue;
                };
                if a.normalized_distance(b) <= max_distance {
                    components.union(i, j);
                }
            }
        }

        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..hashed.len() {
            by_root.entry(components.find(idx)).or_default().push(idx);
        }

        let mut slots: Vec<Option<ImageRecord>> = hashed.into_iter().map(Some).collect();
        let mut groups = Vec::new();

        for indices in by_root.into_values() {
            // Components without edges are unique images, not duplicates.
            if indices.len() < 2 {
                continue;
            }

            let mut members: Vec<ImageRecord> = indices
                .into_iter()
                .filter_map(|idx| slots[idx].take())
                .collect();

            members.sort_by(|a, b| {
                let score_a = a.quality_score.unwrap_or(0.0);
                let score_b = b.quality_score.unwrap_or(0.0);
                score_b
                    .partial_cmp(&score_a)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.path.cmp(&b.path))
            });

            let group_key = derive_group_key(members.iter().map(|m| m.path.as_path()));
            groups.push(DuplicateGroup {
                group_key,
                members,
                representative_index: 0,
            });
        }

        groups.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        groups
    }
}

/// Stable group identity: SHA-256 over the sorted member paths. Member order
/// (and therefore later re-ranking) never changes the key; only the path set
/// does. The key is fixed at group creation and never recomputed.
pub fn derive_group_key<'a>(paths: impl Iterator<Item = &'a Path>) -> String {
    let mut sorted: Vec<String> = paths.map(|p| p.to_string_lossy().into_owned()).collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in &sorted {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }

    let digest = format!("{:x}", hasher.finalize());
    format!("grp_{}", &digest[..16])
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            self.parent[root_b] = root_a;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::Fingerprint;
    use std::path::PathBuf;

    /// 256-bit fingerprint with the first `set_bits` bits set.
    fn fingerprint_with_bits(set_bits: u32) -> Fingerprint {
        let mut bytes = vec![0u8; 32];
        for bit in 0..set_bits {
            bytes[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        Fingerprint::from_bytes(256, bytes)
    }

    fn record(path: &str, fingerprint: Option<Fingerprint>, score: f64) -> ImageRecord {
        ImageRecord {
            path: PathBuf::from(path),
            file_size: 1024,
            dimensions: Some((100, 100)),
            fingerprint,
            quality_score: Some(score),
        }
    }

    #[test]
    fn near_identical_pair_groups_distant_image_does_not() {
        // Distances from `a`: 0, 2, and 40 bits out of 256. At threshold
        // 0.95 the bound is 12.8 bits, so only the first pair matches.
        let records = vec![
            record("a.png", Some(fingerprint_with_bits(0)), 0.5),
            record("b.png", Some(fingerprint_with_bits(2)), 0.5),
            record("c.png", Some(fingerprint_with_bits(40)), 0.5),
        ];

        let groups = SimilarityGrouper::new(0.95).group(records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        let paths: Vec<_> = groups[0]
            .members
            .iter()
            .map(|m| m.path.to_string_lossy().into_owned())
            .collect();
        assert!(paths.contains(&"a.png".to_string()));
        assert!(paths.contains(&"b.png".to_string()));
    }

    #[test]
    fn chains_connect_transitively() {
        // a-b and b-c are each 6 bits apart, a-c is 12; with a 6-bit bound
        // all three still land in one component through b.
        let records = vec![
            record("a.png", Some(fingerprint_with_bits(0)), 0.5),
            record("b.png", Some(fingerprint_with_bits(6)), 0.5),
            record("c.png", Some(fingerprint_with_bits(12)), 0.5),
        ];

        let threshold = 1.0 - 6.0 / 256.0;
        let groups = SimilarityGrouper::new(threshold).group(records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
    }

    #[test]
    fn members_sorted_by_score_then_path() {
        let fp = fingerprint_with_bits(0);
        let records = vec![
            record("a.png", Some(fp.clone()), 0.3),
            record("d.png", Some(fp.clone()), 0.9),
            record("c.png", Some(fp.clone()), 0.5),
            record("b.png", Some(fp), 0.9),
        ];

        let groups = SimilarityGrouper::new(1.0).group(records);
        assert_eq!(groups.len(), 1);
        let order: Vec<_> = groups[0]
            .members
            .iter()
            .map(|m| m.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(order, vec!["b.png", "d.png", "c.png", "a.png"]);
        assert_eq!(groups[0].representative_index, 0);
        assert_eq!(groups[0].representative().path, PathBuf::from("b.png"));
    }

    #[test]
    fn group_key_ignores_input_order() {
        let fp = fingerprint_with_bits(0);
        let forward = vec![
            record("a.png", Some(fp.clone()), 0.9),
            record("b.png", Some(fp.clone()), 0.1),
        ];
        let reversed = vec![
            record("b.png", Some(fp.clone()), 0.1),
            record("a.png", Some(fp), 0.9),
        ];

        let grouper = SimilarityGrouper::new(1.0);
        let key_a = grouper.group(forward)[0].group_key.clone();
        let key_b = grouper.group(reversed)[0].group_key.clone();
        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("grp_"));
    }

    #[test]
    fn records_without_fingerprints_are_excluded() {
        let fp = fingerprint_with_bits(0);
        let records = vec![
            record("a.png", Some(fp.clone()), 0.5),
            record("b.png", Some(fp), 0.5),
            record("broken.png", None, 0.0),
        ];

        let groups = SimilarityGrouper::new(1.0).group(records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn all_unique_yields_no_groups() {
        let records = vec![
            record("a.png", Some(fingerprint_with_bits(0)), 0.5),
            record("b.png", Some(fingerprint_with_bits(100)), 0.5),
            record("c.png", Some(fingerprint_with_bits(200)), 0.5),
        ];
        assert!(SimilarityGrouper::new(0.95).group(records).is_empty());
    }

    #[test]
    fn redundant_bytes_exclude_representative() {
        let fp = fingerprint_with_bits(0);
        let records = vec![
            record("a.png", Some(fp.clone()), 0.9),
            record("b.png", Some(fp.clone()), 0.5),
            record("c.png", Some(fp), 0.1),
        ];
        let groups = SimilarityGrouper::new(1.0).group(records);
        assert_eq!(groups[0].redundant_bytes(), 2048);
    }
}
