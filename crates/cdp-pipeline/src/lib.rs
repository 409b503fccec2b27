//! Filter / coverage / count-override / instance-cap selection pipeline.
//!
//! Reduces the recommendations that survive the engine-version validator
//! (C4) down to the set the orchestrator will actually reconcile and
//! purchase (C5). Every step is a plain function over a `Vec`, composed in
//! the fixed order PRD §4.4 requires; nothing here performs I/O.

#![forbid(unsafe_code)]

use cdp_model::Recommendation;

/// Every knob from the CLI surface (PRD §6) that feeds the pipeline.
///
/// `coverage_pct: None` means "use the caller's context-dependent default" —
/// the CSV-replay special case where coverage defaults to 100% unless the
/// operator explicitly passed `--coverage` is resolved by the caller before
/// `run` is invoked, keeping this crate pure and context-free.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub include_regions: Vec<String>,
    pub exclude_regions: Vec<String>,
    pub include_resource_types: Vec<String>,
    pub exclude_resource_types: Vec<String>,
    pub include_engines: Vec<String>,
    pub exclude_engines: Vec<String>,
    pub include_accounts: Vec<String>,
    pub exclude_accounts: Vec<String>,
    pub coverage_pct: Option<u8>,
    pub count_override: Option<u32>,
    pub max_instances: Option<u32>,
}

/// Runs steps 1–6 of PRD §4.4 (everything up to, but not including, the
/// instance cap). The cap (step 7) is applied separately, after
/// reconciliation, so it binds the set actually purchased rather than the
/// pre-reconciliation recommendation (PRD §8 Invariant 2) — see
/// [`apply_cap`].
pub fn run(recommendations: Vec<Recommendation>, opts: &PipelineOptions) -> Vec<Recommendation> {
    let recs = filter_regions(recommendations, &opts.include_regions, &opts.exclude_regions);
    let recs = filter_resource_types(recs, &opts.include_resource_types, &opts.exclude_resource_types);
    let recs = filter_engines(recs, &opts.include_engines, &opts.exclude_engines);
    let recs = filter_accounts(recs, &opts.include_accounts, &opts.exclude_accounts);
    let recs = apply_coverage(recs, opts.coverage_pct.unwrap_or(100));
    apply_count_override(recs, opts.count_override)
}

/// Step 1 (PRD §4.4): keep only if `includeRegions` is empty or contains
/// the region, and the region is not in `excludeRegions`.
pub fn filter_regions(recs: Vec<Recommendation>, include: &[String], exclude: &[String]) -> Vec<Recommendation> {
    recs.into_iter()
        .filter(|r| (include.is_empty() || include.iter().any(|i| i == &r.region)) && !exclude.iter().any(|e| e == &r.region))
        .collect()
}

/// Step 2 (PRD §4.4): same shape as the region filter, case-sensitive.
pub fn filter_resource_types(recs: Vec<Recommendation>, include: &[String], exclude: &[String]) -> Vec<Recommendation> {
    recs.into_iter()
        .filter(|r| {
            (include.is_empty() || include.iter().any(|i| i == &r.resource_type)) && !exclude.iter().any(|e| e == &r.resource_type)
        })
        .collect()
}

/// Step 3 (PRD §4.4): engine filter, case-insensitive. An absent engine
/// (neither `serviceDetails` nor the description's first token supplies one)
/// is kept iff `includeEngines` is empty — `excludeEngines` has nothing to
/// match against an absent engine, so it never gates this branch.
pub fn filter_engines(recs: Vec<Recommendation>, include: &[String], exclude: &[String]) -> Vec<Recommendation> {
    recs.into_iter()
        .filter(|r| match r.engine() {
            Some(engine) => {
                let engine = engine.to_lowercase();
                let included = include.is_empty() || include.iter().any(|i| i.to_lowercase() == engine);
                let excluded = exclude.iter().any(|e| e.to_lowercase() == engine);
                included && !excluded
            }
            None => include.is_empty(),
        })
        .collect()
}

/// Step 4 (PRD §4.4): account filter on `accountDisplayName`, case-insensitive,
/// matched by exact match OR substring. An empty display name is kept only
/// when both lists are empty.
pub fn filter_accounts(recs: Vec<Recommendation>, include: &[String], exclude: &[String]) -> Vec<Recommendation> {
    recs.into_iter()
        .filter(|r| {
            let name = r.account_display_name.to_lowercase();
            if name.is_empty() {
                return include.is_empty() && exclude.is_empty();
            }
            let matches = |list: &[String]| list.iter().any(|p| {
                let p = p.to_lowercase();
                name == p || name.contains(&p)
            });
            let included = include.is_empty() || matches(include);
            let excluded = matches(exclude);
            included && !excluded
        })
        .collect()
}

/// Step 5 (PRD §4.4): `new_count = ceil(count * pct / 100)`. Recommendations
/// whose scaled count is 0 are dropped — the ceiling is what keeps a
/// count-1 recommendation alive at e.g. 50% coverage (PRD §9 Open Question 2).
pub fn apply_coverage(recs: Vec<Recommendation>, pct: u8) -> Vec<Recommendation> {
    recs.into_iter()
        .filter_map(|r| {
            let scaled = ((r.count as u64 * pct as u64) + 99) / 100;
            if scaled == 0 {
                None
            } else {
                Some(r.with_count(scaled as u32))
            }
        })
        .collect()
}

/// Step 6 (PRD §4.4): replace `count` with a caller-supplied absolute value,
/// when one was given.
pub fn apply_count_override(recs: Vec<Recommendation>, count_override: Option<u32>) -> Vec<Recommendation> {
    match count_override {
        None => recs,
        Some(n) => recs.into_iter().map(|r| r.with_count(n)).collect(),
    }
}

/// Step 7 (PRD §4.4): iterate in order, accumulating `count`; when adding a
/// recommendation would exceed `max_instances`, shrink it to exactly fill the
/// cap and drop everything after it. A reduction to 0 drops that entry too.
/// Applied by the orchestrator *after* reconciliation so the cap binds the
/// set actually purchased, not the pre-reconciliation recommendation.
pub fn apply_cap(recs: Vec<Recommendation>, max_instances: Option<u32>) -> Vec<Recommendation> {
    let Some(cap) = max_instances else { return recs };
    let mut out = Vec::with_capacity(recs.len());
    let mut used: u32 = 0;
    for r in recs {
        if used >= cap {
            break;
        }
        let remaining = cap - used;
        if r.count <= remaining {
            used += r.count;
            out.push(r);
        } else {
            used += remaining;
            out.push(r.with_count(remaining));
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_model::{CloudProviderId, CommitmentType, PaymentOption, Scope, Service, ServiceDetails, Platform, Tenancy, Term};
    use chrono::Utc;

    fn rec(region: &str, resource_type: &str, count: u32, account_name: &str) -> Recommendation {
        Recommendation::new(
            CloudProviderId::Aws,
            Service::Compute,
            "123456789012".to_string(),
            account_name.to_string(),
            region.to_string(),
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
            "Linux/UNIX m5.large".to_string(),
            Utc::now(),
        )
        .expect("valid recommendation")
    }

    // ─── Invariant 1: 0 < count <= inputCount ──────────────────────────────

    #[test]
    fn coverage_never_increases_count() {
        let recs = vec![rec("r1", "m5.large", 10, "prod")];
        let out = apply_coverage(recs, 50);
        assert_eq!(out.len(), 1);
        assert!(out[0].count > 0 && out[0].count <= 10);
    }

    // ─── Invariant 6: coverage idempotence at 100% ─────────────────────────

    #[test]
    fn coverage_at_100_pct_is_identity() {
        let recs = vec![rec("r1", "m5.large", 7, "prod")];
        let out = apply_coverage(recs.clone(), 100);
        assert_eq!(out, recs);
    }

    // ─── Invariant 7: filter monotonicity (idempotent when reapplied) ──────

    #[test]
    fn region_filter_is_idempotent() {
        let recs = vec![rec("r1", "m5.large", 1, "prod"), rec("r2", "m5.large", 1, "prod")];
        let include = vec!["r1".to_string()];
        let once = filter_regions(recs, &include, &[]);
        let twice = filter_regions(once.clone(), &include, &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn coverage_ceiling_keeps_small_counts_alive() {
        // 1 * 50 / 100 = 0.5, ceiling keeps it at 1 instead of dropping to 0.
        let recs = vec![rec("r1", "m5.large", 1, "prod")];
        let out = apply_coverage(recs, 50);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 1);
    }

    #[test]
    fn coverage_drops_recommendations_that_scale_to_zero() {
        let recs = vec![rec("r1", "m5.large", 1, "prod")];
        let out = apply_coverage(recs, 0);
        assert!(out.is_empty());
    }

    // ─── S1: dry run with coverage ──────────────────────────────────────────

    #[test]
    fn s1_coverage_50_pct_applies_ceiling_to_each_recommendation() {
        let recs = vec![rec("r1", "a", 10, "prod"), rec("r1", "b", 5, "prod"), rec("r1", "c", 2, "prod")];
        let out = apply_coverage(recs, 50);
        let counts: Vec<u32> = out.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![5, 3, 1]);
    }

    // ─── S4: cap at pipeline tail ────────────────────────────────────────────

    #[test]
    fn s4_cap_truncates_and_drops_subsequent() {
        let recs = vec![rec("r1", "a", 7, "prod"), rec("r1", "b", 5, "prod"), rec("r1", "c", 4, "prod")];
        let out = apply_cap(recs, Some(10));
        let counts: Vec<u32> = out.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![7, 3]);
    }

    #[test]
    fn cap_total_never_exceeds_max_instances() {
        let recs = vec![rec("r1", "a", 7, "prod"), rec("r1", "b", 5, "prod"), rec("r1", "c", 4, "prod")];
        let out = apply_cap(recs, Some(10));
        let total: u32 = out.iter().map(|r| r.count).sum();
        assert!(total <= 10);
    }

    #[test]
    fn cap_none_is_a_no_op() {
        let recs = vec![rec("r1", "a", 7, "prod")];
        let out = apply_cap(recs.clone(), None);
        assert_eq!(out, recs);
    }

    #[test]
    fn account_filter_matches_by_substring_case_insensitive() {
        let recs = vec![rec("r1", "a", 1, "Production-Team")];
        let out = filter_accounts(recs, &["production".to_string()], &[]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn account_filter_excludes_by_substring() {
        let recs = vec![rec("r1", "a", 1, "sandbox-dev")];
        let out = filter_accounts(recs, &[], &["sandbox".to_string()]);
        assert!(out.is_empty());
    }

    #[test]
    fn engine_filter_is_case_insensitive() {
        let mut r = rec("r1", "db.r5.large", 1, "prod");
        r.service = Service::RelationalDb;
        r.service_details = ServiceDetails::Rds {
            engine: "MySQL".to_string(),
            az_mode: cdp_model::AzMode::SingleAz,
        };
        let out = filter_engines(vec![r], &["mysql".to_string()], &[]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn count_override_replaces_count_when_present() {
        let recs = vec![rec("r1", "a", 7, "prod")];
        let out = apply_count_override(recs, Some(3));
        assert_eq!(out[0].count, 3);
    }

    #[test]
    fn run_composes_all_six_steps_in_order() {
        let recs = vec![rec("r1", "a", 10, "prod"), rec("r2", "b", 4, "prod")];
        let opts = PipelineOptions {
            include_regions: vec!["r1".to_string()],
            coverage_pct: Some(50),
            ..Default::default()
        };
        let out = run(recs, &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].region, "r1");
        assert_eq!(out[0].count, 5);
    }
}
