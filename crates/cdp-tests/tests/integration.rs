//! End-to-end scenario tests (S1-S6), driving the real `cdp-pipeline` /
//! `cdp-reconcile` / `cdp-lifecycle` / `cdp-orchestrator` / `cdp-report`
//! crates together through hand-built test doubles of the provider traits,
//! with no mocking framework.

use async_trait::async_trait;
use cdp_cache::AccountAliasCache;
use cdp_model::{
    AzMode, CloudProviderId, Commitment, CommitmentType, PaymentOption, Platform, Recommendation, Scope,
    Service, ServiceDetails, Tenancy, Term,
};
use cdp_orchestrator::{AlwaysConfirm, Orchestrator, OrchestratorConfig, RunParams};
use cdp_pipeline::PipelineOptions;
use cdp_providers::{
    AccountRef, CloudProvider, OfferingDetails, ProviderError, PurchaseClient, RecommendationParams,
    RecommendationSource, RunningInstanceInfo, SourceError, ValidationError,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn ec2_rec(region: &str, resource_type: &str, count: u32) -> Recommendation {
    Recommendation::new(
        CloudProviderId::Aws,
        Service::Compute,
        "123456789012".to_string(),
        "prod".to_string(),
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
        ServiceDetails::Ec2 { platform: Platform::Linux, tenancy: Tenancy::Default, scope: Scope::Regional },
        "Linux/UNIX".to_string(),
        Utc::now(),
    )
    .expect("valid recommendation")
}

fn rds_rec(region: &str, resource_type: &str, count: u32, engine: &str) -> Recommendation {
    Recommendation::new(
        CloudProviderId::Aws,
        Service::RelationalDb,
        "123456789012".to_string(),
        "prod".to_string(),
        region.to_string(),
        resource_type.to_string(),
        count,
        Term::OneYear,
        PaymentOption::NoUpfront,
        CommitmentType::ReservedInstance,
        0.0,
        120.0,
        200.0,
        80.0,
        40.0,
        ServiceDetails::Rds { engine: engine.to_string(), az_mode: AzMode::SingleAz },
        format!("{engine} instance"),
        Utc::now(),
    )
    .expect("valid recommendation")
}

struct FakeSource {
    recs: Vec<Recommendation>,
}

#[async_trait]
impl RecommendationSource for FakeSource {
    async fn get_recommendations(&self, _params: &RecommendationParams) -> Result<Vec<Recommendation>, SourceError> {
        Ok(self.recs.clone())
    }
}

struct FakeClient {
    existing: Vec<Commitment>,
}

#[async_trait]
impl PurchaseClient for FakeClient {
    async fn list_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["m5.large".to_string(), "db.r5.large".to_string()])
    }

    async fn validate_offering(&self, _rec: &Recommendation) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn get_offering_details(&self, rec: &Recommendation) -> Result<OfferingDetails, ProviderError> {
        Ok(OfferingDetails {
            offering_id: "offer-1".to_string(),
            upfront_cost: rec.upfront_cost,
            recurring_hourly_cost: 0.0,
            currency: "USD".to_string(),
        })
    }

    async fn purchase(&self, rec: &Recommendation, purchase_id: &str) -> cdp_model::PurchaseResult {
        cdp_model::PurchaseResult::new(rec.clone(), true, purchase_id.to_string(), None, "purchased", Some(rec.upfront_cost), Utc::now())
    }

    async fn list_existing_commitments(&self) -> Result<Vec<Commitment>, ProviderError> {
        Ok(self.existing.clone())
    }
}

struct FakeProvider {
    recs: Vec<Recommendation>,
    existing: Vec<Commitment>,
    running_instances: Vec<RunningInstanceInfo>,
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn id(&self) -> CloudProviderId {
        CloudProviderId::Aws
    }
    fn is_configured(&self) -> bool {
        true
    }
    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        Ok(())
    }
    async fn list_accounts(&self) -> Result<Vec<AccountRef>, ProviderError> {
        Ok(vec![AccountRef { account_id: "123456789012".to_string(), display_name: "prod".to_string() }])
    }
    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["r1".to_string()])
    }
    fn supported_services(&self) -> &[Service] {
        &[Service::Compute, Service::RelationalDb]
    }
    fn home_region(&self) -> &str {
        "r1"
    }
    fn recommendations_client(&self) -> Arc<dyn RecommendationSource> {
        Arc::new(FakeSource { recs: self.recs.clone() })
    }
    fn purchase_client(&self, _service: Service, _region: &str) -> Arc<dyn PurchaseClient> {
        Arc::new(FakeClient { existing: self.existing.clone() })
    }
    async fn list_running_instances(&self, _service: Service, _region: &str) -> Result<Vec<RunningInstanceInfo>, ProviderError> {
        Ok(self.running_instances.clone())
    }
}

fn provider(recs: Vec<Recommendation>, existing: Vec<Commitment>, running_instances: Vec<RunningInstanceInfo>) -> Arc<dyn CloudProvider> {
    Arc::new(FakeProvider { recs, existing, running_instances })
}

fn params(pipeline: PipelineOptions) -> RunParams {
    RunParams {
        payment_option: PaymentOption::NoUpfront,
        term: Term::OneYear,
        lookback_days: 14,
        account_filter: None,
        pipeline,
    }
}

// ─── S1: dry run with coverage ──────────────────────────────────────────────

#[tokio::test]
async fn s1_dry_run_with_coverage_ceils_each_count() {
    let recs = vec![ec2_rec("r1", "a", 10), ec2_rec("r1", "b", 5), ec2_rec("r1", "c", 2)];
    let orch = Orchestrator::new(provider(recs, Vec::new(), Vec::new()), OrchestratorConfig::from_env(true));

    let pipeline = PipelineOptions { coverage_pct: Some(50), ..Default::default() };
    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(pipeline), &AlwaysConfirm, &CancellationToken::new())
        .await;

    let mut counts: Vec<u32> = outcome.results.iter().map(|r| r.recommendation.count).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 3, 5]);
    assert!(outcome.results.iter().all(|r| r.success));
    assert!(outcome.results.iter().all(|r| r.purchase_id.starts_with("dryrun-")));
}

// ─── S2: duplicate avoidance ────────────────────────────────────────────────

#[tokio::test]
async fn s2_existing_commitment_reduces_purchased_count() {
    let recs = vec![ec2_rec("r1", "m5.large", 10)];
    let existing = vec![Commitment {
        provider: CloudProviderId::Aws,
        service: Service::Compute,
        account: "123456789012".to_string(),
        region: "r1".to_string(),
        resource_type: "m5.large".to_string(),
        count: 4,
        term: Term::OneYear,
        expires_at: Utc::now(),
        commitment_id: "ri-1".to_string(),
        service_details: ServiceDetails::Ec2 { platform: Platform::Linux, tenancy: Tenancy::Default, scope: Scope::Regional },
    }];
    let orch = Orchestrator::new(provider(recs, existing, Vec::new()), OrchestratorConfig::from_env(true));

    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
        .await;

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].recommendation.count, 6);
}

#[tokio::test]
async fn s2_existing_commitment_fully_covers_recommendation_and_drops_it() {
    let recs = vec![ec2_rec("r1", "m5.large", 10)];
    let existing = vec![Commitment {
        provider: CloudProviderId::Aws,
        service: Service::Compute,
        account: "123456789012".to_string(),
        region: "r1".to_string(),
        resource_type: "m5.large".to_string(),
        count: 10,
        term: Term::OneYear,
        expires_at: Utc::now(),
        commitment_id: "ri-1".to_string(),
        service_details: ServiceDetails::Ec2 { platform: Platform::Linux, tenancy: Tenancy::Default, scope: Scope::Regional },
    }];
    let orch = Orchestrator::new(provider(recs, existing, Vec::new()), OrchestratorConfig::from_env(true));

    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
        .await;

    assert!(outcome.results.is_empty());
}

// ─── S3: extended-support engine exclusion ──────────────────────────────────

#[tokio::test]
async fn s3_extended_support_running_instance_reduces_adjusted_count() {
    let recs = vec![rds_rec("r1", "T", 2, "mysql")];
    let running = vec![
        RunningInstanceInfo { resource_type: "T".to_string(), engine: "mysql".to_string(), engine_version: "5.7.44".to_string() },
        RunningInstanceInfo { resource_type: "T".to_string(), engine: "mysql".to_string(), engine_version: "8.0.35".to_string() },
    ];
    let orch = Orchestrator::new(provider(recs, Vec::new(), running), OrchestratorConfig::from_env(true));

    let (outcome, _) = orch
        .run_service_region(Service::RelationalDb, "r1", &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
        .await;

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].recommendation.count, 1);
}

// ─── S4: cap at pipeline tail ────────────────────────────────────────────────

#[tokio::test]
async fn s4_max_instances_truncates_batch_and_drops_the_rest() {
    let recs = vec![ec2_rec("r1", "a", 7), ec2_rec("r1", "b", 5), ec2_rec("r1", "c", 4)];
    let orch = Orchestrator::new(provider(recs, Vec::new(), Vec::new()), OrchestratorConfig::from_env(true));

    let pipeline = PipelineOptions { max_instances: Some(10), ..Default::default() };
    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(pipeline), &AlwaysConfirm, &CancellationToken::new())
        .await;

    let counts: Vec<u32> = outcome.results.iter().map(|r| r.recommendation.count).collect();
    assert_eq!(counts, vec![7, 3]);
    let total: u32 = counts.iter().sum();
    assert!(total <= 10);
}

// ─── S5: user cancels confirmation ───────────────────────────────────────────

#[tokio::test]
async fn s5_declined_confirmation_cancels_the_whole_batch() {
    let recs = vec![ec2_rec("r1", "a", 3), ec2_rec("r1", "b", 2)];
    let orch = Orchestrator::new(provider(recs, Vec::new(), Vec::new()), OrchestratorConfig::from_env(false));
    let decline = |_: u32, _: f64| false;

    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &decline, &CancellationToken::new())
        .await;

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| !r.success));
}

#[tokio::test]
async fn s5_next_batch_still_prompts_after_a_decline() {
    let orch = Orchestrator::new(provider(vec![ec2_rec("r1", "a", 1)], Vec::new(), Vec::new()), OrchestratorConfig::from_env(false));
    let decline = |_: u32, _: f64| false;

    let (first, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &decline, &CancellationToken::new())
        .await;
    assert!(!first.results[0].success);

    // A fresh batch with AlwaysConfirm still runs the purchase path — the
    // prior decline did not latch a permanent "always cancel" state.
    let (second, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
        .await;
    assert!(second.results[0].success);
}

// ─── S6: CSV replay with region filter ───────────────────────────────────────

#[tokio::test]
async fn s6_csv_replay_keeps_only_included_regions_and_defaults_coverage_to_100() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.csv");

    // Seed a dry-run report covering three regions, as though a live run
    // had already produced it.
    let mut all_results = Vec::new();
    for region in ["r1", "r2", "r3"] {
        let orch = Orchestrator::new(provider(vec![ec2_rec(region, "a", 4)], Vec::new(), Vec::new()), OrchestratorConfig::from_env(true));
        let (outcome, _) = orch
            .run_service_region(Service::Compute, region, &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
            .await;
        all_results.extend(outcome.results);
    }
    cdp_report::write_report(&path, &all_results).expect("write report");

    let alias_cache = AccountAliasCache::new();
    let recs = cdp_report::read_report(&path, &alias_cache).expect("read report");
    assert_eq!(recs.len(), 3);

    let mut groups: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
    for rec in recs {
        groups.entry(rec.region.clone()).or_default().push(rec);
    }

    // Replay re-enters at FILTER with --include-regions r1,r3; coverage was
    // not overridden so it defaults to 100%.
    let pipeline = PipelineOptions {
        include_regions: vec!["r1".to_string(), "r3".to_string()],
        coverage_pct: Some(100),
        ..Default::default()
    };
    let replay_orch = Orchestrator::new(provider(Vec::new(), Vec::new(), Vec::new()), OrchestratorConfig::from_env(true));

    let mut processed_regions = Vec::new();
    for (region, group) in groups {
        let (outcome, _) = replay_orch
            .run_replay_batch(Service::Compute, &region, group, &pipeline, &AlwaysConfirm, &CancellationToken::new())
            .await;
        if !outcome.results.is_empty() {
            processed_regions.push(region);
        }
    }

    processed_regions.sort();
    assert_eq!(processed_regions, vec!["r1".to_string(), "r3".to_string()]);
}

// ─── Cross-crate wiring sanity ────────────────────────────────────────────────

#[tokio::test]
async fn account_aliases_are_primed_before_the_first_batch_runs() {
    let orch = Orchestrator::new(provider(vec![ec2_rec("r1", "a", 1)], Vec::new(), Vec::new()), OrchestratorConfig::from_env(true));
    orch.prime_account_aliases().await;
    let (outcome, _) = orch
        .run_service_region(Service::Compute, "r1", &params(PipelineOptions::default()), &AlwaysConfirm, &CancellationToken::new())
        .await;
    assert_eq!(outcome.results[0].recommendation.account_display_name, "prod");
}

#[tokio::test]
async fn ri_vs_sp_summary_combines_results_across_multiple_batches() {
    let mut ri = ec2_rec("r1", "a", 5);
    ri.estimated_savings = 10.0;
    let mut sp = ri.clone();
    sp.service = Service::SavingsPlan;
    sp.commitment_type = CommitmentType::SavingsPlan;
    sp.service_details = ServiceDetails::SavingsPlanDetails { plan_type: "ComputeSavingsPlans".to_string() };
    sp.estimated_savings = 40.0;

    let now = Utc::now();
    let results = vec![
        cdp_model::PurchaseResult::new(ri, true, "ri-1".to_string(), None, "purchased", None, now),
        cdp_model::PurchaseResult::new(sp, false, "dryrun-1".to_string(), None, "Savings Plan purchase not implemented", None, now),
    ];

    let summary = cdp_orchestrator::summarize(&results).expect("both sides present");
    assert_eq!(summary.recommended, cdp_orchestrator::RecommendedOption::SavingsPlanMixed);
}
