//! Image and container inventory types shared by all three phases.
//!
//! Identity rules:
//! - An image is keyed by its content digest. Its references (repo:tag, then
//!   repo@digest aliases) are secondary identifiers.
//! - A running container pins every identifier it reports (image spec and
//!   resolved image ref); an image is running if its digest or any of its
//!   references is pinned.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// An image as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Content digest (`sha256:...`), the removal handle of record.
    pub digest: String,
    /// Known repository references, in the order the runtime reported them.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Image size in bytes when the runtime reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Image {
    pub fn new(digest: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            digest: digest.into(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            size: None,
        }
    }

    /// Digest followed by every reference.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.digest.as_str()).chain(self.tags.iter().map(String::as_str))
    }
}

/// Lifecycle state of a runtime container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

/// A runtime container and the image identifiers it was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    /// Image as requested in the container spec (reference or digest).
    pub image: String,
    /// Image as resolved by the runtime, usually a digest. May be empty.
    #[serde(default)]
    pub image_ref: String,
    pub state: ContainerState,
}

impl Container {
    pub fn running(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            image_ref: String::new(),
            state: ContainerState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

// ──────────────────── image index ────────────────────

/// Digest → references mapping built from a runtime inventory.
///
/// Duplicate digests (runtimes may report one image more than once) are merged
/// by union of references, first-seen order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageIndex {
    images: BTreeMap<String, Image>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_images<'a>(images: impl IntoIterator<Item = &'a Image>) -> Self {
        let mut index = Self::new();
        for image in images {
            index.insert(image);
        }
        index
    }

    pub fn insert(&mut self, image: &Image) {
        if image.digest.is_empty() {
            return;
        }
        let entry = self
            .images
            .entry(image.digest.clone())
            .or_insert_with(|| Image {
                digest: image.digest.clone(),
                tags: Vec::new(),
                size: None,
            });
        for tag in &image.tags {
            if !tag.is_empty() && !entry.tags.contains(tag) {
                entry.tags.push(tag.clone());
            }
        }
        if entry.size.is_none() {
            entry.size = image.size;
        }
    }

    pub fn get(&self, digest: &str) -> Option<&Image> {
        self.images.get(digest)
    }

    /// Resolve a digest or any reference to the indexed image.
    pub fn resolve(&self, identifier: &str) -> Option<&Image> {
        self.images.get(identifier).or_else(|| {
            self.images
                .values()
                .find(|img| img.tags.iter().any(|t| t == identifier))
        })
    }

    /// Images in digest order.
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

// ──────────────────── running set ────────────────────

/// Every image identifier pinned by a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningSet {
    identifiers: HashSet<String>,
}

impl RunningSet {
    /// Build from a container snapshot; non-running containers are ignored.
    pub fn from_containers(containers: &[Container]) -> Self {
        let identifiers = containers
            .iter()
            .filter(|c| c.is_running())
            .flat_map(|c| [c.image.as_str(), c.image_ref.as_str()])
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Self { identifiers }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    /// Digest first, then each reference.
    pub fn pins(&self, image: &Image) -> bool {
        image.identifiers().any(|id| self.contains(id))
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

// ──────────────────── candidate set ────────────────────

/// Images present on a node that are neither running nor excluded.
///
/// Stored in shared state as a JSON array sorted by digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Image>", into = "Vec<Image>")]
pub struct CandidateSet {
    images: BTreeMap<String, Image>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: Image) {
        match self.images.get_mut(&image.digest) {
            Some(existing) => {
                for tag in image.tags {
                    if !existing.tags.contains(&tag) {
                        existing.tags.push(tag);
                    }
                }
                if existing.size.is_none() {
                    existing.size = image.size;
                }
            }
            None => {
                self.images.insert(image.digest.clone(), image);
            }
        }
    }

    /// Union with another node's contribution.
    pub fn merge(&mut self, other: &Self) {
        for image in other.images.values() {
            self.insert(image.clone());
        }
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.images.contains_key(digest)
    }

    pub fn get(&self, digest: &str) -> Option<&Image> {
        self.images.get(digest)
    }

    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    /// Images in digest order.
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl From<Vec<Image>> for CandidateSet {
    fn from(images: Vec<Image>) -> Self {
        let mut set = Self::new();
        for image in images {
            set.insert(image);
        }
        set
    }
}

impl From<CandidateSet> for Vec<Image> {
    fn from(set: CandidateSet) -> Self {
        set.images.into_values().collect()
    }
}

impl FromIterator<Image> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Image>>(iter: T) -> Self {
        let mut set = Self::new();
        for image in iter {
            set.insert(image);
        }
        set
    }
}

// ──────────────────── verdicts and reports ────────────────────

/// Scanner classification of one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Vulnerable,
    /// The verification capability itself errored.
    Failed { reason: String },
}

/// A candidate whose verification errored, as recorded in `status.failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedImage {
    pub digest: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub reason: String,
}

/// Why the eraser left an image in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Excluded,
    Running,
    DryRun,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Excluded => "excluded",
            Self::Running => "running",
            Self::DryRun => "dry run",
        })
    }
}

/// Result of one removal attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    /// `handle` is the digest or reference the runtime accepted.
    Removed { handle: String },
    /// Already gone; idempotent success.
    NotFound,
    Skipped { reason: SkipReason, detail: String },
    Failed { error_code: String, error: String },
}

/// Per-node eraser report, digest → outcome.
///
/// `entries` is stored as an array sorted by digest so that a merge-patch
/// publishing a new report replaces the previous attempt wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub node: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, with = "entry_list")]
    pub entries: BTreeMap<String, RemovalOutcome>,
}

mod entry_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::RemovalOutcome;

    #[derive(Serialize)]
    struct EntryRef<'a> {
        digest: &'a str,
        #[serde(flatten)]
        outcome: &'a RemovalOutcome,
    }

    #[derive(Deserialize)]
    struct Entry {
        digest: String,
        #[serde(flatten)]
        outcome: RemovalOutcome,
    }

    pub fn serialize<S: Serializer>(
        entries: &BTreeMap<String, RemovalOutcome>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            entries
                .iter()
                .map(|(digest, outcome)| EntryRef { digest, outcome }),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, RemovalOutcome>, D::Error> {
        let list = Vec::<Entry>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.digest, e.outcome)).collect())
    }
}

impl RemovalReport {
    pub fn new(node: impl Into<String>, dry_run: bool) -> Self {
        Self {
            node: node.into(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn record(&mut self, digest: impl Into<String>, outcome: RemovalOutcome) {
        self.entries.insert(digest.into(), outcome);
    }

    pub fn outcome(&self, digest: &str) -> Option<&RemovalOutcome> {
        self.entries.get(digest)
    }

    /// `(digest, handle)` for every removed image, in digest order.
    pub fn removed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(digest, outcome)| match outcome {
            RemovalOutcome::Removed { handle } => Some((digest.as_str(), handle.as_str())),
            _ => None,
        })
    }

    pub fn removed_count(&self) -> usize {
        self.removed().count()
    }

    pub fn not_found_count(&self) -> usize {
        self.count_where(|o| matches!(o, RemovalOutcome::NotFound))
    }

    pub fn skipped_count(&self) -> usize {
        self.count_where(|o| matches!(o, RemovalOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count_where(|o| matches!(o, RemovalOutcome::Failed { .. }))
    }

    fn count_where(&self, pred: impl Fn(&RemovalOutcome) -> bool) -> usize {
        self.entries.values().filter(|o| pred(o)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_merges_duplicate_digests() {
        let images = vec![
            Image::new("sha256:aaa", &["img:v1"]),
            Image::new("sha256:aaa", &["img:latest", "img:v1"]),
            Image::new("sha256:bbb", &[]),
        ];
        let index = ImageIndex::from_images(&images);
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("sha256:aaa").unwrap().tags,
            vec!["img:v1".to_string(), "img:latest".to_string()]
        );
        assert!(index.get("sha256:bbb").unwrap().tags.is_empty());
    }

    #[test]
    fn index_skips_empty_digest() {
        let index = ImageIndex::from_images(&[Image::new("", &["orphan:1"])]);
        assert!(index.is_empty());
    }

    #[test]
    fn index_keeps_first_reported_size() {
        let mut first = Image::new("sha256:aaa", &[]);
        first.size = Some(10);
        let mut second = Image::new("sha256:aaa", &[]);
        second.size = Some(20);
        let index = ImageIndex::from_images(&[first, second]);
        assert_eq!(index.get("sha256:aaa").unwrap().size, Some(10));
    }

    #[test]
    fn index_resolves_by_reference() {
        let index = ImageIndex::from_images(&[Image::new("sha256:aaa", &["img:v1"])]);
        assert_eq!(index.resolve("img:v1").unwrap().digest, "sha256:aaa");
        assert_eq!(index.resolve("sha256:aaa").unwrap().digest, "sha256:aaa");
        assert!(index.resolve("img:v2").is_none());
    }

    #[test]
    fn running_set_ignores_stopped_containers() {
        let containers = vec![
            Container::running("c1", "sha256:aaa"),
            Container {
                id: "c2".to_string(),
                image: "sha256:bbb".to_string(),
                image_ref: String::new(),
                state: ContainerState::Exited,
            },
        ];
        let running = RunningSet::from_containers(&containers);
        assert!(running.contains("sha256:aaa"));
        assert!(!running.contains("sha256:bbb"));
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn running_set_records_spec_and_resolved_ref() {
        let containers = vec![Container {
            id: "c1".to_string(),
            image: "nginx:1.25".to_string(),
            image_ref: "sha256:ccc".to_string(),
            state: ContainerState::Running,
        }];
        let running = RunningSet::from_containers(&containers);
        assert!(running.pins(&Image::new("sha256:ccc", &[])));
        assert!(running.pins(&Image::new("sha256:other", &["nginx:1.25"])));
        assert!(!running.pins(&Image::new("sha256:zzz", &["nginx:1.24"])));
    }

    #[test]
    fn candidate_set_serializes_sorted_by_digest() {
        let set: CandidateSet = vec![
            Image::new("sha256:bbb", &["b:1"]),
            Image::new("sha256:aaa", &["a:1"]),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json[0]["digest"], "sha256:aaa");
        assert_eq!(json[1]["digest"], "sha256:bbb");

        let back: CandidateSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn candidate_set_merge_unions_tags() {
        let mut node_a: CandidateSet = vec![Image::new("sha256:aaa", &["img:v1"])]
            .into_iter()
            .collect();
        let node_b: CandidateSet = vec![
            Image::new("sha256:aaa", &["registry.local/img:v1"]),
            Image::new("sha256:bbb", &[]),
        ]
        .into_iter()
        .collect();
        node_a.merge(&node_b);
        assert_eq!(node_a.len(), 2);
        assert_eq!(node_a.get("sha256:aaa").unwrap().tags.len(), 2);
    }

    #[test]
    fn removal_report_counts_by_outcome() {
        let mut report = RemovalReport::new("node-a", false);
        report.record(
            "sha256:aaa",
            RemovalOutcome::Removed {
                handle: "sha256:aaa".to_string(),
            },
        );
        report.record("sha256:bbb", RemovalOutcome::NotFound);
        report.record(
            "sha256:ccc",
            RemovalOutcome::Skipped {
                reason: SkipReason::Running,
                detail: "pinned by c1".to_string(),
            },
        );
        report.record(
            "sha256:ddd",
            RemovalOutcome::Failed {
                error_code: "ERA-2002".to_string(),
                error: "busy".to_string(),
            },
        );
        assert_eq!(report.removed_count(), 1);
        assert_eq!(report.not_found_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.removed().collect::<Vec<_>>(),
            vec![("sha256:aaa", "sha256:aaa")]
        );
    }

    #[test]
    fn removal_outcome_serializes_with_tag() {
        let json = serde_json::to_value(RemovalOutcome::Skipped {
            reason: SkipReason::DryRun,
            detail: String::new(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "dry_run");
        let json = serde_json::to_value(RemovalOutcome::NotFound).unwrap();
        assert_eq!(json["outcome"], "not_found");
    }

    #[test]
    fn removal_report_entries_serialize_as_sorted_array() {
        let mut report = RemovalReport::new("node-a", false);
        report.record("sha256:bbb", RemovalOutcome::NotFound);
        report.record(
            "sha256:aaa",
            RemovalOutcome::Removed {
                handle: "app:v1".to_string(),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["entries"],
            serde_json::json!([
                {"digest": "sha256:aaa", "outcome": "removed", "handle": "app:v1"},
                {"digest": "sha256:bbb", "outcome": "not_found"},
            ])
        );
        let back: RemovalReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
