//! Release planning for unexpected reservations.

use std::collections::HashSet;

use crate::ids::{PersistenceId, ResourceId};
use crate::offer::{Offer, Resource};
use crate::operation::Recommendation;

/// Plans the operations that return unexpected reservations to the cluster.
///
/// Agents can disappear long enough for their tasks to be relocated and
/// then come back, offering reservations nobody wants anymore. The cleaner
/// compares offered reservations against the set the caller still expects
/// and emits the release operations for everything else.
pub struct ResourceCleaner {
    expected_resource_ids: HashSet<ResourceId>,
    expected_persistence_ids: HashSet<PersistenceId>,
}

impl ResourceCleaner {
    /// Creates a cleaner which releases everything not present in
    /// `expected`.
    pub fn new<'a, I>(expected: I) -> Self
    where
        I: IntoIterator<Item = &'a Resource>,
    {
        let mut expected_resource_ids = HashSet::new();
        let mut expected_persistence_ids = HashSet::new();
        for resource in expected {
            if let Some(id) = resource.resource_id() {
                expected_resource_ids.insert(id.clone());
            }
            if let Some(id) = resource.persistence_id() {
                expected_persistence_ids.insert(id.clone());
            }
        }
        Self {
            expected_resource_ids,
            expected_persistence_ids,
        }
    }

    /// A cleaner with an empty expected set: every reservation offered is
    /// unexpected.
    #[must_use]
    pub fn release_all() -> Self {
        Self::new(std::iter::empty::<&Resource>())
    }

    /// Returns the release operations for the provided offers.
    ///
    /// The resource lifecycle is RESERVE -> CREATE -> DESTROY -> UNRESERVE,
    /// so every DESTROY must precede every UNRESERVE in the returned
    /// sequence. Two passes over the input enforce that: first unexpected
    /// persistent volumes are destroyed, then unexpected reservations
    /// (volumes included) are unreserved. Within a pass, offers are visited
    /// in input order and each offer's candidates in canonical record
    /// order.
    #[must_use]
    pub fn evaluate(&self, offers: &[Offer]) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        for offer in offers {
            for volume in self.volumes_to_destroy(offer) {
                recommendations.push(Recommendation::destroy(offer, volume));
            }
        }

        for offer in offers {
            for resource in self.reservations_to_unreserve(offer) {
                recommendations.push(Recommendation::unreserve(offer, resource));
            }
        }

        recommendations
    }

    fn volumes_to_destroy(&self, offer: &Offer) -> Vec<Resource> {
        let mut unexpected: Vec<Resource> = offer
            .resources
            .iter()
            .filter(|r| match r.persistence_id() {
                Some(id) => !self.expected_persistence_ids.contains(id),
                None => false,
            })
            .cloned()
            .collect();
        sort_canonical(&mut unexpected);
        unexpected
    }

    fn reservations_to_unreserve(&self, offer: &Offer) -> Vec<Resource> {
        let mut unexpected: Vec<Resource> = offer
            .resources
            .iter()
            .filter(|r| match r.resource_id() {
                Some(id) => !self.expected_resource_ids.contains(id),
                None => false,
            })
            .cloned()
            .collect();
        sort_canonical(&mut unexpected);
        unexpected
    }
}

/// Canonical record order within one offer: by resource name, then by
/// reservation id. Keeps release sequences stable regardless of how the
/// resource manager happened to order the records.
fn sort_canonical(resources: &mut [Resource]) {
    resources.sort_by(|a, b| {
        (a.name.as_str(), a.resource_id())
            .cmp(&(b.name.as_str(), b.resource_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;

    fn pv(rid: &str, pid: &str) -> Resource {
        Resource::persistent_volume(
            1000.0,
            "role",
            "principal",
            Some("svc".to_string()),
            rid,
            pid,
            None,
        )
    }

    fn reserved_cpus(rid: &str) -> Resource {
        Resource::reserved("cpus", 1.0, "role", "principal", Some("svc".to_string()), rid)
    }

    fn reserved_ports(rid: &str) -> Resource {
        Resource::reserved("ports", 2.0, "role", "principal", Some("svc".to_string()), rid)
    }

    fn kinds(recs: &[Recommendation]) -> Vec<&'static str> {
        recs.iter().map(|r| r.operation.kind()).collect()
    }

    fn released_id(rec: &Recommendation) -> &str {
        match &rec.operation {
            Operation::Destroy { volume } => volume.resource_id().unwrap().as_str(),
            Operation::Unreserve { resource } => resource.resource_id().unwrap().as_str(),
            other => panic!("unexpected operation {}", other.kind()),
        }
    }

    #[test]
    fn no_offers_no_recommendations() {
        assert!(ResourceCleaner::release_all().evaluate(&[]).is_empty());
        let populated = ResourceCleaner::new([reserved_cpus("r1")].iter());
        assert!(populated.evaluate(&[]).is_empty());
    }

    #[test]
    fn orphan_volume_destroyed_then_unreserved() {
        let offer = Offer::new("o1", "a1").with_resources(vec![pv("r1", "r1")]);
        let recs = ResourceCleaner::release_all().evaluate(&[offer]);
        assert_eq!(kinds(&recs), vec!["DESTROY", "UNRESERVE"]);
        assert_eq!(released_id(&recs[0]), "r1");
        assert_eq!(released_id(&recs[1]), "r1");
    }

    #[test]
    fn mixed_offers_destroys_precede_unreserves() {
        let offers = vec![
            Offer::new("o1", "a1").with_resources(vec![pv("r1", "r1")]),
            Offer::new("o2", "a1").with_resources(vec![reserved_cpus("r2")]),
            Offer::new("o3", "a2").with_resources(vec![pv("r3", "r3")]),
        ];
        let recs = ResourceCleaner::release_all().evaluate(&offers);
        assert_eq!(
            kinds(&recs),
            vec!["DESTROY", "DESTROY", "UNRESERVE", "UNRESERVE", "UNRESERVE"]
        );
        let ids: Vec<_> = recs.iter().map(released_id).collect();
        assert_eq!(ids, vec!["r1", "r3", "r1", "r2", "r3"]);
    }

    #[test]
    fn partial_expectation_single_offer() {
        // Expected: ports r1 and volume r2. Unexpected: volume u1, cpus u2.
        let expected = [reserved_ports("r1"), pv("r2", "r2")];
        let cleaner = ResourceCleaner::new(expected.iter());

        let offer = Offer::new("o1", "a1").with_resources(vec![
            reserved_ports("r1"),
            pv("r2", "r2"),
            pv("u1", "u1"),
            reserved_cpus("u2"),
        ]);
        let recs = cleaner.evaluate(&[offer]);

        // The unreserve pass visits cpus before disk: canonical record
        // order within the offer.
        assert_eq!(kinds(&recs), vec!["DESTROY", "UNRESERVE", "UNRESERVE"]);
        let ids: Vec<_> = recs.iter().map(released_id).collect();
        assert_eq!(ids, vec!["u1", "u2", "u1"]);
    }

    #[test]
    fn all_expected_nothing_released() {
        let expected = [reserved_ports("r1"), pv("r2", "r2")];
        let cleaner = ResourceCleaner::new(expected.iter());
        let offer =
            Offer::new("o1", "a1").with_resources(vec![reserved_ports("r1"), pv("r2", "r2")]);
        assert!(cleaner.evaluate(&[offer]).is_empty());
    }

    #[test]
    fn unreserved_records_ignored() {
        let offer = Offer::new("o1", "a1").with_resources(vec![
            Resource::unreserved("cpus", 8.0),
            Resource::unreserved("mem", 2048.0),
        ]);
        assert!(ResourceCleaner::release_all().evaluate(&[offer]).is_empty());
    }
}
