//! Per-`(service, region)` run state machine for the Commitment Discount
//! Planner: `RESOLVED_REGIONS → FETCH → FILTER → COVERAGE → OVERRIDE →
//! ADAPT_CLIENT → RECONCILE → CAP → (DRY_RUN | CONFIRM → PURCHASE_LOOP) →
//! AGGREGATE` (PRD §4.7).
//!
//! A deterministic pipeline driver: a single `Orchestrator` bound to one
//! `CloudProvider`, run once per `(service, region)` pair by the caller's
//! outer loop.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use cdp_cache::AccountAliasCache;
use cdp_lifecycle::{
    adjust_batch, extended_support_counts, gather_running_instances, static_catalogue, utc_to_naive,
    EngineLifecycleCatalogue, LifecycleError, RunningInstance, RunningInstanceLister,
};
use cdp_model::{CommitmentType, PaymentOption, PurchaseResult, Recommendation, Service, Term};
use cdp_pipeline::PipelineOptions;
use cdp_providers::{CloudProvider, RecommendationParams};
use cdp_reconcile::{reconcile, ReconcileReport};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Inputs to one `(service, region)` batch beyond the selection knobs
/// already carried by [`PipelineOptions`] — the recommendation-source
/// parameters PRD §4.2 needs that aren't pipeline filters.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub payment_option: PaymentOption,
    pub term: Term,
    pub lookback_days: u32,
    pub account_filter: Option<String>,
    pub pipeline: PipelineOptions,
}

/// The `confirm(totalInstances, totalCost) -> bool` collaborator (PRD §4.7,
/// §9). A blanket impl over `Fn(u32, f64) -> bool` lets callers pass a plain
/// closure or, in `cdpctl`, a stdin prompt.
pub trait ConfirmCallback: Send + Sync {
    fn confirm(&self, total_instances: u32, total_upfront_cost: f64) -> bool;
}

impl<F> ConfirmCallback for F
where
    F: Fn(u32, f64) -> bool + Send + Sync,
{
    fn confirm(&self, total_instances: u32, total_upfront_cost: f64) -> bool {
        self(total_instances, total_upfront_cost)
    }
}

/// Always approves — used for `--yes` (PRD §6).
pub struct AlwaysConfirm;

impl ConfirmCallback for AlwaysConfirm {
    fn confirm(&self, _total_instances: u32, _total_upfront_cost: f64) -> bool {
        true
    }
}

/// Per-service accumulation across the regions processed so far (PRD §4.7).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStats {
    pub regions_processed: u32,
    pub recs_selected: u32,
    pub instances_processed: u32,
    pub successes: u32,
    pub failures: u32,
    pub estimated_monthly_savings: f64,
}

impl ServiceStats {
    fn accumulate(&mut self, results: &[PurchaseResult]) {
        self.regions_processed += 1;
        self.recs_selected += results.len() as u32;
        for result in results {
            self.instances_processed += result.recommendation.count;
            if result.success {
                self.successes += 1;
                self.estimated_monthly_savings += result.recommendation.estimated_savings;
            } else {
                self.failures += 1;
            }
        }
    }
}

/// The result of driving one `(service, region)` batch through to AGGREGATE.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<PurchaseResult>,
    pub reconcile_report: ReconcileReport,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub dry_run: bool,
    pub inter_purchase_delay: Duration,
}

impl OrchestratorConfig {
    /// Reads `DISABLE_PURCHASE_DELAY` once at construction time.
    pub fn from_env(dry_run: bool) -> Self {
        let disabled = std::env::var("DISABLE_PURCHASE_DELAY")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            dry_run,
            inter_purchase_delay: if disabled { Duration::ZERO } else { Duration::from_secs(2) },
        }
    }
}

/// Bridges a [`CloudProvider`] to the lifecycle crate's provider-agnostic
/// [`RunningInstanceLister`], so `cdp-lifecycle` stays independent of any
/// one provider SDK (PRD §9).
struct ProviderInstanceLister {
    provider: Arc<dyn CloudProvider>,
    service: Service,
}

#[async_trait]
impl RunningInstanceLister for ProviderInstanceLister {
    async fn list_running_instances(&self, region: &str) -> Result<Vec<RunningInstance>, LifecycleError> {
        self.provider
            .list_running_instances(self.service, region)
            .await
            .map(|infos| {
                infos
                    .into_iter()
                    .map(|info| RunningInstance {
                        region: region.to_string(),
                        resource_type: info.resource_type,
                        engine: info.engine,
                        engine_version: info.engine_version,
                    })
                    .collect()
            })
            .map_err(|e| LifecycleError::Unavailable {
                region: region.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Drives the state machine for one cloud provider, one `(service, region)`
/// batch at a time. The outer loop over providers/services/regions belongs
/// to the caller (PRD §5: sequential, so confirmation and pacing stay
/// comprehensible).
pub struct Orchestrator {
    provider: Arc<dyn CloudProvider>,
    config: OrchestratorConfig,
    lifecycle_catalogue: EngineLifecycleCatalogue,
    alias_cache: AccountAliasCache,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn CloudProvider>, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            config,
            lifecycle_catalogue: static_catalogue(),
            alias_cache: AccountAliasCache::new(),
        }
    }

    /// Populates the account-alias cache from the provider's account list.
    /// Best-effort: failure just means recommendations keep whatever
    /// display name the source already attached (PRD §5, read-mostly cache).
    pub async fn prime_account_aliases(&self) {
        match self.provider.list_accounts().await {
            Ok(accounts) => {
                for account in accounts {
                    self.alias_cache.insert(account.account_id, account.display_name);
                }
            }
            Err(e) => warn!(error = %e, "failed to prime account alias cache"),
        }
    }

    /// Drives `RESOLVED_REGIONS → ... → AGGREGATE` for one `(service,
    /// region)` pair (PRD §4.7).
    pub async fn run_service_region(
        &self,
        service: Service,
        region: &str,
        opts: &RunParams,
        confirm: &dyn ConfirmCallback,
        cancel: &CancellationToken,
    ) -> (BatchOutcome, ServiceStats) {
        let mut stats = ServiceStats::default();

        // ── FETCH (C3) ──────────────────────────────────────────────────
        let rec_params = RecommendationParams {
            service,
            region: Some(region.to_string()),
            payment_option: opts.payment_option,
            term: opts.term,
            lookback_days: opts.lookback_days,
            account_filter: opts.account_filter.clone(),
            include_regions: opts.pipeline.include_regions.clone(),
            exclude_regions: opts.pipeline.exclude_regions.clone(),
        };
        let mut batch = match self.provider.recommendations_client().get_recommendations(&rec_params).await {
            Ok(recs) => recs,
            Err(e) => {
                warn!(service = %service, region, error = %e, "recommendation fetch failed, skipping batch");
                stats.accumulate(&[]);
                return (BatchOutcome::default(), stats);
            }
        };

        for rec in &mut batch {
            rec.account_display_name = self.alias_cache.get_or_insert_with(&rec.account, || rec.account_display_name.clone());
        }

        // ── ADJUST (C4) ─────────────────────────────────────────────────
        if service.is_database_like() {
            let lister: Arc<dyn RunningInstanceLister> = Arc::new(ProviderInstanceLister {
                provider: Arc::clone(&self.provider),
                service,
            });
            let instances = gather_running_instances(lister, &[region.to_string()]).await;
            let counts = extended_support_counts(&instances, &self.lifecycle_catalogue, utc_to_naive(Utc::now()));
            batch = adjust_batch(batch, &counts);
        }

        drop(stats); // superseded by select_and_purchase's own accumulation below
        self.select_and_purchase(service, region, batch, &opts.pipeline, confirm, cancel).await
    }

    /// CSV-replay re-entry point (PRD §4.8): `recommendations` were
    /// reconstructed from a previously emitted report, not fetched from a
    /// provider, so this skips FETCH (C3) and ADJUST (C4) and re-enters the
    /// pipeline directly at FILTER (C5).
    pub async fn run_replay_batch(
        &self,
        service: Service,
        region: &str,
        recommendations: Vec<Recommendation>,
        pipeline: &PipelineOptions,
        confirm: &dyn ConfirmCallback,
        cancel: &CancellationToken,
    ) -> (BatchOutcome, ServiceStats) {
        self.select_and_purchase(service, region, recommendations, pipeline, confirm, cancel).await
    }

    /// FILTER → COVERAGE → OVERRIDE → ADAPT_CLIENT → RECONCILE → CAP →
    /// (DRY_RUN | CONFIRM → PURCHASE_LOOP) → AGGREGATE (PRD §4.7), shared
    /// by both a live fetch and CSV replay (PRD §4.8).
    async fn select_and_purchase(
        &self,
        service: Service,
        region: &str,
        batch: Vec<Recommendation>,
        pipeline: &PipelineOptions,
        confirm: &dyn ConfirmCallback,
        cancel: &CancellationToken,
    ) -> (BatchOutcome, ServiceStats) {
        let mut stats = ServiceStats::default();

        // ── FILTER / COVERAGE / OVERRIDE (C5 steps 1-6) ─────────────────
        let mut batch = cdp_pipeline::run(batch, pipeline);

        // ── ADAPT_CLIENT (C7) ────────────────────────────────────────────
        let client = self.provider.purchase_client(service, region);

        // ── RECONCILE (C6) ───────────────────────────────────────────────
        let existing = match client.list_existing_commitments().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(service = %service, region, error = %e, "existing-commitment fetch failed, skipping reconciliation");
                Vec::new()
            }
        };
        let reconcile_report = reconcile(&mut batch, &existing);

        // ── CAP (C5 step 7, applied after reconcile) ────────────────────
        let batch = cdp_pipeline::apply_cap(batch, pipeline.max_instances);

        // ── DRY_RUN | CONFIRM → PURCHASE_LOOP ───────────────────────────
        let now = Utc::now();
        let results = if batch.is_empty() {
            Vec::new()
        } else if service == Service::SavingsPlan {
            // Open Question 1: Savings Plan purchase is not implemented.
            // Recommendations still flow through for the RI/SP comparison.
            batch
                .iter()
                .enumerate()
                .map(|(i, rec)| {
                    let purchase_id = synthesize_purchase_id("dryrun", service, region, rec, now, i as u32 + 1);
                    PurchaseResult::new(
                        rec.clone(),
                        false,
                        purchase_id,
                        None,
                        "Savings Plan purchase not implemented — reported for comparison only",
                        None,
                        now,
                    )
                })
                .collect()
        } else if self.config.dry_run {
            batch
                .iter()
                .enumerate()
                .map(|(i, rec)| {
                    let purchase_id = synthesize_purchase_id("dryrun", service, region, rec, now, i as u32 + 1);
                    PurchaseResult::new(rec.clone(), true, purchase_id, None, "Dry run - no actual purchase", None, now)
                })
                .collect()
        } else {
            let total_instances: u32 = batch.iter().map(|r| r.count).sum();
            let total_upfront: f64 = batch.iter().map(|r| r.upfront_cost).sum();

            if !confirm.confirm(total_instances, total_upfront) {
                batch
                    .iter()
                    .enumerate()
                    .map(|(i, rec)| {
                        let purchase_id = synthesize_purchase_id("ri", service, region, rec, now, i as u32 + 1);
                        PurchaseResult::new(rec.clone(), false, purchase_id, None, "Purchase cancelled by user", None, now)
                    })
                    .collect()
            } else {
                let mut results = Vec::with_capacity(batch.len());
                for (i, rec) in batch.iter().enumerate() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if i > 0 && !self.config.inter_purchase_delay.is_zero() {
                        tokio::time::sleep(self.config.inter_purchase_delay).await;
                    }
                    let purchase_id = synthesize_purchase_id("ri", service, region, rec, Utc::now(), i as u32 + 1);
                    results.push(client.purchase(rec, &purchase_id).await);
                }
                results
            }
        };

        // ── AGGREGATE ─────────────────────────────────────────────────────
        stats.accumulate(&results);

        (BatchOutcome { results, reconcile_report }, stats)
    }
}

fn synthesize_purchase_id(prefix: &str, service: Service, region: &str, rec: &Recommendation, now: DateTime<Utc>, seq: u32) -> String {
    let resource_type_sanitized = rec.resource_type.replace('.', "-");
    let hex: u32 = rand::thread_rng().gen();
    format!(
        "{prefix}-{service}-{region}-{resource_type_sanitized}-{}x-{}-{}-{seq:03}-{hex:08x}",
        rec.count,
        now.format("%Y%m%d"),
        now.format("%H%M%S"),
    )
}

// ─── RI vs SP comparison summary (PRD §4.7 last paragraph) ────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedOption {
    AllReserved,
    SavingsPlanMixed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonSummary {
    pub option_1_all_reserved_savings: f64,
    pub option_2_mixed_savings: f64,
    pub recommended: RecommendedOption,
}

/// Compares all-reserved vs Savings-Plan-covers-compute across every
/// `PurchaseResult` collected over a whole run. Returns `None` when either
/// side is empty — there's nothing to compare (PRD §4.7).
pub fn summarize(results: &[PurchaseResult]) -> Option<ComparisonSummary> {
    let has_ri = results.iter().any(|r| r.recommendation.commitment_type == CommitmentType::ReservedInstance);
    let has_sp = results.iter().any(|r| r.recommendation.commitment_type == CommitmentType::SavingsPlan);
    if !has_ri || !has_sp {
        return None;
    }

    let ri_compute: f64 = results
        .iter()
        .filter(|r| r.recommendation.commitment_type == CommitmentType::ReservedInstance && r.recommendation.service == Service::Compute)
        .map(|r| r.recommendation.estimated_savings)
        .sum();
    let ri_non_compute: f64 = results
        .iter()
        .filter(|r| r.recommendation.commitment_type == CommitmentType::ReservedInstance && r.recommendation.service != Service::Compute)
        .map(|r| r.recommendation.estimated_savings)
        .sum();
    let sp_total: f64 = results
        .iter()
        .filter(|r| r.recommendation.commitment_type == CommitmentType::SavingsPlan)
        .map(|r| r.recommendation.estimated_savings)
        .sum();

    let option_1 = ri_compute + ri_non_compute;
    let option_2 = sp_total + ri_non_compute;
    let recommended = if option_2 > option_1 {
        RecommendedOption::SavingsPlanMixed
    } else {
        RecommendedOption::AllReserved
    };

    Some(ComparisonSummary {
        option_1_all_reserved_savings: option_1,
        option_2_mixed_savings: option_2,
        recommended,
    })
}
