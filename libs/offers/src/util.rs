//! Offer bookkeeping helpers shared by the processor and the router.

use std::collections::HashSet;

use crate::ids::OfferId;
use crate::offer::Offer;
use crate::operation::Recommendation;

/// Returns the offers not consumed by any of the provided recommendations,
/// preserving the relative order of the survivors.
#[must_use]
pub fn filter_out_accepted(offers: &[Offer], recommendations: &[Recommendation]) -> Vec<Offer> {
    let accepted: HashSet<&OfferId> = recommendations.iter().map(|r| &r.offer_id).collect();
    offers
        .iter()
        .filter(|o| !accepted.contains(&o.id))
        .cloned()
        .collect()
}

/// The distinct offer ids named by the provided recommendations, in first
/// appearance order.
#[must_use]
pub fn distinct_offer_ids(recommendations: &[Recommendation]) -> Vec<OfferId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for rec in recommendations {
        if seen.insert(&rec.offer_id) {
            ids.push(rec.offer_id.clone());
        }
    }
    ids
}
