//! Reservation inventory: sorts the reserved resources found on a set of
//! offers by the service that owns them.

use std::collections::BTreeMap;

use crate::offer::{Offer, Resource};

/// The reserved resources of a single offer, as relevant to one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferResources {
    pub offer: Offer,
    pub resources: Vec<Resource>,
}

impl OfferResources {
    fn new(offer: &Offer) -> Self {
        Self {
            offer: offer.clone(),
            resources: Vec::new(),
        }
    }

    /// Returns an offer envelope carrying only this bucket's resources.
    #[must_use]
    pub fn to_offer(&self) -> Offer {
        self.offer.subset(self.resources.clone())
    }
}

/// Classification of the reserved resources across a set of offers.
///
/// Reserved records carrying a service label are grouped per service, then
/// per offer, preserving input order within each bucket. Reserved records
/// with no service label land in `malformed`. Plain unreserved records are
/// dropped: they carry no claim that could leak.
#[derive(Debug, Default)]
pub struct ReservationInventory {
    /// serviceName -> offerId -> that service's resources on that offer.
    pub by_service: BTreeMap<String, Vec<OfferResources>>,
    /// Reserved resources with no owner label, keyed by offer.
    pub malformed: Vec<OfferResources>,
}

impl ReservationInventory {
    /// Walks each offer's resources once and buckets every reserved record.
    #[must_use]
    pub fn classify(offers: &[Offer]) -> Self {
        let mut inventory = ReservationInventory::default();
        for offer in offers {
            for resource in &offer.resources {
                match resource.service_name() {
                    Some(service) => {
                        let bucket = inventory.by_service.entry(service.to_string()).or_default();
                        push_resource(bucket, offer, resource);
                    }
                    None if resource.is_reserved() => {
                        push_resource(&mut inventory.malformed, offer, resource);
                    }
                    None => {
                        // Unreserved. Nothing to reclaim.
                    }
                }
            }
        }
        inventory
    }

    /// Total count of malformed resources, for logging.
    #[must_use]
    pub fn malformed_resource_count(&self) -> usize {
        self.malformed.iter().map(|or| or.resources.len()).sum()
    }
}

fn push_resource(bucket: &mut Vec<OfferResources>, offer: &Offer, resource: &Resource) {
    match bucket.iter_mut().find(|or| or.offer.id == offer.id) {
        Some(entry) => entry.resources.push(resource.clone()),
        None => {
            let mut entry = OfferResources::new(offer);
            entry.resources.push(resource.clone());
            bucket.push(entry);
        }
    }
}
