//! Image set reconciliation: inventory minus running minus excluded.
//!
//! Pure; no runtime or state access. A digest survives iff none of its
//! identifiers (digest or any reference) is pinned by a running container and
//! none matches an exclusion rule.

#![allow(missing_docs)]

use crate::core::model::{CandidateSet, Container, Image, ImageIndex, RunningSet};
use crate::exclusion::matcher::ExclusionMatcher;

/// Candidates plus what was filtered out and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub candidates: CandidateSet,
    /// Digests pinned by a running container.
    pub running: Vec<String>,
    /// `(digest, reason)` for excluded images.
    pub excluded: Vec<(String, String)>,
    /// Distinct digests in the inventory.
    pub inventory: usize,
}

/// Candidate set for one node, sorted by digest.
pub fn reconcile(
    images: &[Image],
    containers: &[Container],
    matcher: &ExclusionMatcher,
) -> CandidateSet {
    reconcile_detailed(images, containers, matcher).candidates
}

pub fn reconcile_detailed(
    images: &[Image],
    containers: &[Container],
    matcher: &ExclusionMatcher,
) -> Reconciliation {
    let index = ImageIndex::from_images(images);
    let running = RunningSet::from_containers(containers);

    let mut out = Reconciliation {
        inventory: index.len(),
        ..Reconciliation::default()
    };
    for image in index.iter() {
        if running.pins(image) {
            out.running.push(image.digest.clone());
        } else if let Some(reason) = matcher.exclusion_reason(image) {
            out.excluded.push((image.digest.clone(), reason));
        } else {
            out.candidates.insert(image.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ContainerState;
    use proptest::prelude::*;

    fn no_rules() -> ExclusionMatcher {
        ExclusionMatcher::empty()
    }

    #[test]
    fn unused_image_becomes_candidate() {
        let images = vec![Image::new("sha256:aaa", &["registry.local/app:v1"])];
        let set = reconcile(&images, &[], &no_rules());
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("sha256:aaa").unwrap().tags,
            vec!["registry.local/app:v1".to_string()]
        );
    }

    #[test]
    fn running_image_is_protected_by_digest() {
        let images = vec![
            Image::new("sha256:aaa", &["app:v1"]),
            Image::new("sha256:bbb", &["app:v2"]),
        ];
        let containers = vec![Container::running("c1", "sha256:aaa")];
        let out = reconcile_detailed(&images, &containers, &no_rules());
        assert!(!out.candidates.contains("sha256:aaa"));
        assert!(out.candidates.contains("sha256:bbb"));
        assert_eq!(out.running, vec!["sha256:aaa".to_string()]);
    }

    #[test]
    fn running_image_is_protected_by_reference() {
        let images = vec![Image::new("sha256:aaa", &["nginx:1.25"])];
        let containers = vec![Container::running("c1", "nginx:1.25")];
        assert!(reconcile(&images, &containers, &no_rules()).is_empty());
    }

    #[test]
    fn exited_container_does_not_protect() {
        let images = vec![Image::new("sha256:aaa", &[])];
        let containers = vec![Container {
            id: "c1".to_string(),
            image: "sha256:aaa".to_string(),
            image_ref: String::new(),
            state: ContainerState::Exited,
        }];
        assert_eq!(reconcile(&images, &containers, &no_rules()).len(), 1);
    }

    #[test]
    fn wildcard_exclusion_protects_every_tag() {
        let images = vec![
            Image::new("sha256:aaa", &["docker.io/library/alpine:3.18"]),
            Image::new("sha256:bbb", &["docker.io/library/alpine2:3.18"]),
        ];
        let matcher = ExclusionMatcher::compile(&["docker.io/library/alpine:*"]).unwrap();
        let out = reconcile_detailed(&images, &[], &matcher);
        assert!(!out.candidates.contains("sha256:aaa"));
        assert!(out.candidates.contains("sha256:bbb"));
        assert_eq!(out.excluded.len(), 1);
        assert!(out.excluded[0].1.contains("alpine:*"));
    }

    #[test]
    fn duplicate_digests_merge_references() {
        let images = vec![
            Image::new("sha256:aaa", &["app:v1"]),
            Image::new("sha256:aaa", &["app:latest"]),
        ];
        let out = reconcile_detailed(&images, &[], &no_rules());
        assert_eq!(out.inventory, 1);
        assert_eq!(out.candidates.get("sha256:aaa").unwrap().tags.len(), 2);
    }

    #[test]
    fn duplicate_digest_pinned_through_second_alias() {
        let images = vec![
            Image::new("sha256:aaa", &["app:v1"]),
            Image::new("sha256:aaa", &["app:latest"]),
        ];
        let containers = vec![Container::running("c1", "app:latest")];
        assert!(reconcile(&images, &containers, &no_rules()).is_empty());
    }

    #[test]
    fn output_is_sorted_by_digest() {
        let images = vec![
            Image::new("sha256:ccc", &[]),
            Image::new("sha256:aaa", &[]),
            Image::new("sha256:bbb", &[]),
        ];
        let set = reconcile(&images, &[], &no_rules());
        let digests: Vec<&str> = set.digests().collect();
        assert_eq!(digests, vec!["sha256:aaa", "sha256:bbb", "sha256:ccc"]);
    }

    // ──────────────────── properties ────────────────────

    fn arb_image() -> impl Strategy<Value = Image> {
        (
            0_u8..12,
            prop::collection::vec((0_u8..6, 0_u8..4), 0..3),
        )
            .prop_map(|(d, tags)| Image {
                digest: format!("sha256:{d:02x}"),
                tags: tags
                    .into_iter()
                    .map(|(repo, tag)| format!("registry.local/app{repo}:v{tag}"))
                    .collect(),
                size: None,
            })
    }

    fn arb_container() -> impl Strategy<Value = Container> {
        (0_u8..12, 0_u8..6, 0_u8..4, any::<bool>(), any::<bool>()).prop_map(
            |(d, repo, tag, by_digest, running)| Container {
                id: format!("c{d}{repo}{tag}"),
                image: if by_digest {
                    format!("sha256:{d:02x}")
                } else {
                    format!("registry.local/app{repo}:v{tag}")
                },
                image_ref: String::new(),
                state: if running {
                    ContainerState::Running
                } else {
                    ContainerState::Exited
                },
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn no_candidate_has_a_running_identifier(
            images in prop::collection::vec(arb_image(), 0..20),
            containers in prop::collection::vec(arb_container(), 0..10),
        ) {
            let running = RunningSet::from_containers(&containers);
            let set = reconcile(&images, &containers, &ExclusionMatcher::empty());
            for candidate in set.iter() {
                prop_assert!(!running.pins(candidate));
            }
        }

        #[test]
        fn no_candidate_matches_an_exclusion_rule(
            images in prop::collection::vec(arb_image(), 0..20),
            repo in 0_u8..6,
        ) {
            let pattern = format!("registry.local/app{repo}:*");
            let matcher = ExclusionMatcher::compile(&[pattern.as_str()]).unwrap();
            let set = reconcile(&images, &[], &matcher);
            for candidate in set.iter() {
                let excluded_prefix = format!("registry.local/app{repo}:");
                for tag in &candidate.tags {
                    prop_assert!(!tag.starts_with(&excluded_prefix));
                }
            }
        }

        #[test]
        fn tag_and_digest_pins_are_equivalent(
            images in prop::collection::vec(arb_image(), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let index = ImageIndex::from_images(&images);
            let all: Vec<&Image> = index.iter().collect();
            let target = all[pick.index(all.len())];
            prop_assume!(!target.tags.is_empty());

            let by_digest = reconcile(&images, &[Container::running("c1", target.digest.clone())], &ExclusionMatcher::empty());
            let by_tag = reconcile(&images, &[Container::running("c1", target.tags[0].clone())], &ExclusionMatcher::empty());
            prop_assert!(!by_digest.contains(&target.digest));
            prop_assert!(!by_tag.contains(&target.digest));
        }

        #[test]
        fn every_unprotected_digest_is_a_candidate(
            images in prop::collection::vec(arb_image(), 0..20),
        ) {
            let index = ImageIndex::from_images(&images);
            let set = reconcile(&images, &[], &ExclusionMatcher::empty());
            prop_assert_eq!(set.len(), index.len());
        }
    }
}
