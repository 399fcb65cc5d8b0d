//! Submission of accepted offers to the resource manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use flotilla_offers::{util::distinct_offer_ids, AgentId, Operation, Recommendation};

use crate::driver::{Driver, DriverError, ACCEPT_REFUSE_SECONDS};

/// Extracts the operations from recommendations and accepts offers with
/// them, one accept call per agent.
pub struct OfferAccepter {
    driver: Arc<dyn Driver>,
}

impl OfferAccepter {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Submits all recommendations, grouped per agent.
    ///
    /// The resource manager requires that one accept call target a single
    /// agent. The resource lifecycle is RESERVE -> CREATE -> DESTROY ->
    /// UNRESERVE, so the recommendation order within each agent group is
    /// preserved on submission.
    pub async fn accept(&self, recommendations: &[Recommendation]) -> Result<(), DriverError> {
        if recommendations.is_empty() {
            info!("No recommendations, nothing to do");
            return Ok(());
        }

        for (agent_id, agent_recs) in group_by_agent(recommendations) {
            let operations: Vec<Operation> =
                agent_recs.iter().map(|r| r.operation.clone()).collect();
            let offer_ids = distinct_offer_ids(&agent_recs);
            info!(
                agent = %agent_id,
                operations = operations.len(),
                offers = offer_ids.len(),
                "Sending operations for agent"
            );
            for operation in &operations {
                info!("  {}", operation.kind());
            }
            self.driver
                .accept_offers(&offer_ids, &operations, ACCEPT_REFUSE_SECONDS)
                .await?;
        }
        Ok(())
    }
}

/// Groups recommendations by agent while preserving their existing order.
/// A sorted map keeps the per-agent submission order consistent between
/// passes, which also keeps test output stable.
fn group_by_agent(
    recommendations: &[Recommendation],
) -> BTreeMap<AgentId, Vec<Recommendation>> {
    let mut by_agent: BTreeMap<AgentId, Vec<Recommendation>> = BTreeMap::new();
    for recommendation in recommendations {
        by_agent
            .entry(recommendation.agent_id.clone())
            .or_default()
            .push(recommendation.clone());
    }
    by_agent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use flotilla_offers::{Offer, Resource};

    fn reserve_rec(offer: &Offer, rid: &str) -> Recommendation {
        Recommendation::new(
            offer,
            Operation::Reserve {
                resources: vec![Resource::reserved(
                    "cpus",
                    1.0,
                    "role",
                    "principal",
                    Some("svc".to_string()),
                    rid,
                )],
            },
        )
    }

    fn unreserve_rec(offer: &Offer, rid: &str) -> Recommendation {
        Recommendation::unreserve(
            offer,
            Resource::reserved("cpus", 1.0, "role", "principal", Some("svc".to_string()), rid),
        )
    }

    #[tokio::test]
    async fn groups_by_agent_preserving_order() {
        let driver = Arc::new(MockDriver::new());
        let accepter = OfferAccepter::new(driver.clone());

        let o1 = Offer::new("o1", "agent-b");
        let o2 = Offer::new("o2", "agent-a");
        let o3 = Offer::new("o3", "agent-b");

        accepter
            .accept(&[
                reserve_rec(&o1, "r1"),
                reserve_rec(&o2, "r2"),
                unreserve_rec(&o3, "r3"),
                unreserve_rec(&o1, "r4"),
            ])
            .await
            .unwrap();

        let accepts = driver.accepts().await;
        assert_eq!(accepts.len(), 2);

        // Sorted agent order: agent-a first.
        assert_eq!(accepts[0].offer_ids.len(), 1);
        assert_eq!(accepts[0].offer_ids[0].as_str(), "o2");
        assert_eq!(accepts[0].refuse_seconds, ACCEPT_REFUSE_SECONDS);

        // agent-b keeps the original intra-group order: o1, o3, o1.
        let ids: Vec<_> = accepts[1]
            .offer_ids
            .iter()
            .map(|i| i.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["o1", "o3"]);
        let kinds: Vec<_> = accepts[1].operations.iter().map(|op| op.kind()).collect();
        assert_eq!(kinds, vec!["RESERVE", "UNRESERVE", "UNRESERVE"]);
    }

    #[tokio::test]
    async fn empty_recommendations_is_noop() {
        let driver = Arc::new(MockDriver::new());
        OfferAccepter::new(driver.clone()).accept(&[]).await.unwrap();
        assert!(driver.accepts().await.is_empty());
    }
}
