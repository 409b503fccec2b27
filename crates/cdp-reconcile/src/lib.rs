//! Duplicate-avoidance reconciliation against existing account commitments.
//!
//! Grouped arbitrage: for each reconciliation key, `adjusted = max(0,
//! recommended - existing)`, with the reduction distributed from the last
//! recommendation in the group first (PRD §4.5, Open Question 3). Pure —
//! no I/O; the orchestrator is responsible for fetching `existing` and for
//! treating a fetch failure as non-fatal (PRD §7 `ReconcileError`).

#![forbid(unsafe_code)]

use cdp_model::{Commitment, PaymentOption, Recommendation, ServiceDetails, Term};
use std::collections::HashMap;

/// The full key PRD §4.5 describes for grouping *recommendations*:
/// `(resourceType, term, paymentOption, serviceDetails-variant-fields)`.
pub type ReconciliationKey = (String, Term, PaymentOption, Vec<(String, String)>);

pub fn reconciliation_key(rec: &Recommendation) -> ReconciliationKey {
    (
        rec.resource_type.clone(),
        rec.term,
        rec.payment_option,
        service_details_fields(&rec.service_details),
    )
}

/// The service-details-specific fields folded into the reconciliation key:
/// engine+azMode for RDS, platform+tenancy+scope for EC2, planType for
/// Savings Plans, engine alone for ElastiCache, nothing for Generic.
fn service_details_fields(details: &ServiceDetails) -> Vec<(String, String)> {
    match details {
        ServiceDetails::Rds { engine, az_mode } => vec![
            ("engine".to_string(), engine.to_lowercase()),
            ("az_mode".to_string(), format!("{az_mode:?}")),
        ],
        ServiceDetails::ElastiCache { engine } => vec![("engine".to_string(), engine.to_lowercase())],
        ServiceDetails::Ec2 { platform, tenancy, scope } => vec![
            ("platform".to_string(), format!("{platform:?}")),
            ("tenancy".to_string(), format!("{tenancy:?}")),
            ("scope".to_string(), format!("{scope:?}")),
        ],
        ServiceDetails::SavingsPlanDetails { plan_type } => vec![("plan_type".to_string(), plan_type.clone())],
        ServiceDetails::Generic => Vec::new(),
    }
}

/// `Commitment` (PRD §3) carries no `paymentOption` — an existing holding
/// offsets a recommendation regardless of the payment option chosen for the
/// *next* purchase. Matching therefore projects out payment option; grouping
/// of recommendations for the purpose of this reduction uses the same
/// projection so a group's `existing_total` is well defined.
type MatchKey = (String, Term, Vec<(String, String)>);

fn match_key(resource_type: &str, term: Term, details: &ServiceDetails) -> MatchKey {
    (resource_type.to_string(), term, service_details_fields(details))
}

/// Summary of one reconciliation pass, for the orchestrator's logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub before_instances: u32,
    pub after_instances: u32,
    pub groups_dropped: u32,
}

/// Reconciles `batch` in place against `existing` commitments (PRD §4.5).
pub fn reconcile(batch: &mut Vec<Recommendation>, existing: &[Commitment]) -> ReconcileReport {
    let before_instances: u32 = batch.iter().map(|r| r.count).sum();

    let mut existing_by_key: HashMap<MatchKey, u32> = HashMap::new();
    for c in existing {
        *existing_by_key.entry(match_key(&c.resource_type, c.term, &c.service_details)).or_insert(0) += c.count;
    }

    let mut groups: HashMap<MatchKey, Vec<usize>> = HashMap::new();
    for (idx, rec) in batch.iter().enumerate() {
        groups
            .entry(match_key(&rec.resource_type, rec.term, &rec.service_details))
            .or_default()
            .push(idx);
    }

    let mut keep = vec![true; batch.len()];
    let mut groups_dropped = 0u32;

    for (key, indices) in &groups {
        let recommended_total: u32 = indices.iter().map(|&i| batch[i].count).sum();
        let existing_total = existing_by_key.get(key).copied().unwrap_or(0);
        let adjusted = recommended_total.saturating_sub(existing_total);

        if adjusted == 0 {
            groups_dropped += 1;
            for &i in indices {
                keep[i] = false;
            }
            continue;
        }

        let mut to_cut = recommended_total - adjusted;
        // Reduce from the last recommendation in the group first (Open Question 3).
        for &i in indices.iter().rev() {
            if to_cut == 0 {
                break;
            }
            let cut_here = to_cut.min(batch[i].count);
            batch[i].count -= cut_here;
            to_cut -= cut_here;
            if batch[i].count == 0 {
                keep[i] = false;
            }
        }
    }

    let mut idx = 0;
    batch.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });

    let after_instances: u32 = batch.iter().map(|r| r.count).sum();

    ReconcileReport {
        before_instances,
        after_instances,
        groups_dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_model::{CloudProviderId, CommitmentType, Platform, Scope, Service, Tenancy};
    use chrono::Utc;

    fn ec2_rec(resource_type: &str, count: u32) -> Recommendation {
        Recommendation::new(
            CloudProviderId::Aws,
            Service::Compute,
            "123456789012".to_string(),
            "prod".to_string(),
            "us-east-1".to_string(),
            resource_type.to_string(),
            count,
            Term::OneYear,
            PaymentOption::NoUpfront,
            CommitmentType::ReservedInstance,
            0.0,
            10.0,
            20.0,
            10.0,
            50.0,
            ServiceDetails::Ec2 {
                platform: Platform::Linux,
                tenancy: Tenancy::Default,
                scope: Scope::Regional,
            },
            "Linux/UNIX".to_string(),
            Utc::now(),
        )
        .expect("valid recommendation")
    }

    fn ec2_commitment(resource_type: &str, count: u32) -> Commitment {
        Commitment {
            provider: CloudProviderId::Aws,
            service: Service::Compute,
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            resource_type: resource_type.to_string(),
            count,
            term: Term::OneYear,
            expires_at: Utc::now(),
            commitment_id: "ri-existing-1".to_string(),
            service_details: ServiceDetails::Ec2 {
                platform: Platform::Linux,
                tenancy: Tenancy::Default,
                scope: Scope::Regional,
            },
        }
    }

    // ─── S2: duplicate avoidance ─────────────────────────────────────────

    #[test]
    fn s2_subtracts_existing_count() {
        let mut batch = vec![ec2_rec("m5.large", 10)];
        let existing = vec![ec2_commitment("m5.large", 4)];
        let report = reconcile(&mut batch, &existing);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].count, 6);
        assert_eq!(report.before_instances, 10);
        assert_eq!(report.after_instances, 6);
    }

    #[test]
    fn s2_drops_fully_covered_recommendation() {
        let mut batch = vec![ec2_rec("m5.large", 10)];
        let existing = vec![ec2_commitment("m5.large", 10)];
        let report = reconcile(&mut batch, &existing);
        assert!(batch.is_empty());
        assert_eq!(report.groups_dropped, 1);
        assert_eq!(report.after_instances, 0);
    }

    #[test]
    fn s2_existing_beyond_recommended_still_drops_cleanly() {
        let mut batch = vec![ec2_rec("m5.large", 4)];
        let existing = vec![ec2_commitment("m5.large", 10)];
        reconcile(&mut batch, &existing);
        assert!(batch.is_empty());
    }

    // ─── Invariant 3 ─────────────────────────────────────────────────────

    #[test]
    fn invariant_3_adjusted_equals_max_0_recommended_minus_existing() {
        let mut batch = vec![ec2_rec("m5.large", 10)];
        let existing = vec![ec2_commitment("m5.large", 3)];
        reconcile(&mut batch, &existing);
        let adjusted: u32 = batch.iter().map(|r| r.count).sum();
        assert_eq!(adjusted, (10u32).saturating_sub(3));
    }

    #[test]
    fn no_existing_commitments_is_a_no_op() {
        let mut batch = vec![ec2_rec("m5.large", 10)];
        reconcile(&mut batch, &[]);
        assert_eq!(batch[0].count, 10);
    }

    // ─── Trailing-entry-first reduction (Open Question 3) ─────────────────

    #[test]
    fn reduction_distributes_from_last_entry_first() {
        let mut batch = vec![ec2_rec("m5.large", 5), ec2_rec("m5.large", 5)];
        let existing = vec![ec2_commitment("m5.large", 7)];
        reconcile(&mut batch, &existing);
        // recommended_total=10, existing=7, adjusted=3. Cut 7 starting from
        // the last entry: cut 5 from index 1 (now 0, dropped), cut 2 from
        // index 0 (now 3).
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].count, 3);
    }

    #[test]
    fn different_resource_types_are_independent_groups() {
        let mut batch = vec![ec2_rec("m5.large", 10), ec2_rec("c5.large", 10)];
        let existing = vec![ec2_commitment("m5.large", 10)];
        let report = reconcile(&mut batch, &existing);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].resource_type, "c5.large");
        assert_eq!(report.groups_dropped, 1);
    }
}
