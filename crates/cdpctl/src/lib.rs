//! cdpctl — CLI surface, `RunConfig` assembly, provider wiring, and the
//! top-level run loop for the Commitment Discount Planner.
//!
//! A flat `clap::Parser` struct (no subcommands — the planner has one run
//! mode), a config record built once per process with no on-disk
//! persistence, and a small top-level error enum carrying the exit-code
//! mapping.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use error::CliError;

use cdp_cache::AccountAliasCache;
use cdp_model::{PurchaseResult, Recommendation, Service};
use cdp_orchestrator::{AlwaysConfirm, ConfirmCallback, Orchestrator, OrchestratorConfig, RunParams, ServiceStats};
use cdp_pipeline::PipelineOptions;
use cdp_providers::{AwsProvider, AzureProvider, CloudProvider, GcpProvider, ProviderRegistry};
use config::RunConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The three providers known to this build, by the name `cdp_providers`'s
/// registry keys them under.
const PROVIDER_NAMES: [&str; 3] = ["aws", "azure", "gcp"];

/// Builds every concrete provider twice: once boxed into the registry (for
/// `detect_available`/`resolve_regions`/`services_for`, which only need
/// borrowed access) and once behind an `Arc` (for the orchestrator, which
/// needs to clone its handle into async tasks). Each provider is otherwise
/// stateless beyond its `ProviderConfig`, so constructing it twice from the
/// same config is cheap and side-effect-free.
fn build_providers() -> (ProviderRegistry, HashMap<&'static str, Arc<dyn CloudProvider>>) {
    let aws_cfg = config::provider_config_from_env("aws");
    let azure_cfg = config::provider_config_from_env("azure");
    let gcp_cfg = config::provider_config_from_env("gcp");

    let mut registry = ProviderRegistry::new();
    registry.register(Box::new(AwsProvider::new(aws_cfg.clone())));
    registry.register(Box::new(AzureProvider::new(azure_cfg.clone())));
    registry.register(Box::new(GcpProvider::new(gcp_cfg.clone())));

    let mut arcs: HashMap<&'static str, Arc<dyn CloudProvider>> = HashMap::new();
    arcs.insert("aws", Arc::new(AwsProvider::new(aws_cfg)));
    arcs.insert("azure", Arc::new(AzureProvider::new(azure_cfg)));
    arcs.insert("gcp", Arc::new(GcpProvider::new(gcp_cfg)));

    (registry, arcs)
}

/// Top-level entry point: assemble `RunConfig`, wire providers, drive either
/// a live run or CSV replay, write the report, print the summary.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let run_config = RunConfig::from_cli(&cli)?;

    let (registry, provider_arcs) = build_providers();

    let available: Vec<String> = registry.detect_available().await.into_iter().map(str::to_string).collect();
    if available.is_empty() {
        return Err(CliError::Auth(
            "no configured cloud provider has valid credentials (checked AWS, Azure, GCP)".to_string(),
        ));
    }
    info!(providers = ?available, "detected available providers");

    let mut orchestrators: HashMap<String, Orchestrator> = HashMap::new();
    for name in &available {
        if let Some(arc) = provider_arcs.get(name.as_str()) {
            let orch = Orchestrator::new(Arc::clone(arc), OrchestratorConfig::from_env(!run_config.purchase));
            orch.prime_account_aliases().await;
            orchestrators.insert(name.clone(), orch);
        }
    }

    let cancel = CancellationToken::new();
    let confirm: Box<dyn ConfirmCallback> = if run_config.skip_confirmation {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(StdinConfirm)
    };

    let all_results = if let Some(input_path) = run_config.input_csv.clone() {
        replay_run(&input_path, &run_config, &orchestrators, confirm.as_ref(), &cancel).await?
    } else {
        live_run(&run_config, &registry, &orchestrators, confirm.as_ref(), &cancel).await
    };

    cdp_report::write_report(&run_config.output_csv, &all_results)
        .map_err(|e| CliError::Config(format!("writing report {}: {e}", run_config.output_csv.display())))?;
    info!(path = %run_config.output_csv.display(), count = all_results.len(), "wrote report");

    print_summary(&all_results);

    Ok(())
}

/// Live mode: `RESOLVED_REGIONS → FETCH → ... → AGGREGATE` per `(service,
/// region)` pair. Services run in the order the caller requested them;
/// providers within a service and regions within a provider both run in
/// lexicographic order (PRD §5).
async fn live_run(
    run_config: &RunConfig,
    registry: &ProviderRegistry,
    orchestrators: &HashMap<String, Orchestrator>,
    confirm: &dyn ConfirmCallback,
    cancel: &CancellationToken,
) -> Vec<PurchaseResult> {
    let mut all_results = Vec::new();

    for &service in &run_config.services {
        let mut providers_for_service: Vec<&String> =
            orchestrators.keys().filter(|name| registry.services_for(name).contains(&service)).collect();
        providers_for_service.sort();

        for provider_name in providers_for_service {
            let orch = &orchestrators[provider_name];

            let mut regions = match registry.resolve_regions(provider_name, service, &run_config.regions).await {
                Ok(regions) => regions,
                Err(e) => {
                    warn!(provider = provider_name, service = %service, error = %e, "region discovery failed, skipping provider");
                    continue;
                }
            };
            regions.sort();

            let mut pipeline = run_config.pipeline.clone();
            pipeline.coverage_pct = Some(run_config.live_coverage_pct());
            let params = RunParams {
                payment_option: run_config.payment_option,
                term: run_config.term,
                lookback_days: run_config.lookback_days,
                account_filter: None,
                pipeline,
            };

            for region in &regions {
                info!(provider = provider_name, service = %service, region, "processing batch");
                let (outcome, stats) = orch.run_service_region(service, region, &params, confirm, cancel).await;
                log_batch(provider_name, service, region, &stats);
                let _ = &outcome.reconcile_report;
                all_results.extend(outcome.results);
            }
        }
    }

    all_results
}

/// CSV-replay mode (PRD §4.8): reconstruct recommendations from a
/// previously emitted report and re-enter the pipeline at FILTER, skipping
/// FETCH/ADJUST. Coverage defaults to 100% unless the operator passed
/// `--coverage` explicitly (PRD §4.4 special case).
async fn replay_run(
    input_path: &std::path::Path,
    run_config: &RunConfig,
    orchestrators: &HashMap<String, Orchestrator>,
    confirm: &dyn ConfirmCallback,
    cancel: &CancellationToken,
) -> Result<Vec<PurchaseResult>, CliError> {
    let alias_cache = AccountAliasCache::new();
    let recs = cdp_report::read_report(input_path, &alias_cache)
        .map_err(|e| CliError::Config(format!("reading replay CSV {}: {e}", input_path.display())))?;

    // Grouped by (provider name, service name, region) so iteration order is
    // deterministic and lexicographic without requiring `Ord` on the model
    // enums themselves.
    let mut groups: BTreeMap<(String, String, String), Vec<Recommendation>> = BTreeMap::new();
    for rec in recs {
        let key = (rec.provider.to_string(), rec.service.to_string(), rec.region.clone());
        groups.entry(key).or_default().push(rec);
    }

    let mut pipeline = run_config.pipeline.clone();
    pipeline.coverage_pct = Some(run_config.replay_coverage_pct());

    let mut all_results = Vec::new();
    for ((provider_name, service_name, region), group_recs) in groups {
        let Some(orch) = orchestrators.get(&provider_name) else {
            warn!(provider = %provider_name, "provider from replay CSV is unavailable, skipping batch");
            continue;
        };
        let service = match config::parse_service(&service_name) {
            Ok(service) => service,
            Err(e) => {
                warn!(error = %e, "unrecognized service in replay CSV, skipping batch");
                continue;
            }
        };

        info!(provider = %provider_name, service = %service, region = %region, count = group_recs.len(), "replaying batch");
        let (outcome, stats) = orch.run_replay_batch(service, &region, group_recs, &pipeline, confirm, cancel).await;
        log_batch(&provider_name, service, &region, &stats);
        let _ = &outcome.reconcile_report;
        all_results.extend(outcome.results);
    }

    Ok(all_results)
}

fn log_batch(provider_name: &str, service: Service, region: &str, stats: &ServiceStats) {
    info!(
        provider = provider_name,
        service = %service,
        region,
        instances = stats.instances_processed,
        successes = stats.successes,
        failures = stats.failures,
        "batch complete",
    );
}

/// `confirm(totalInstances, totalCost) -> bool` backed by a stdin prompt
/// (PRD §4.7, §9) — the production implementation of the callback the
/// orchestrator and its tests treat as an injectable collaborator.
struct StdinConfirm;

impl ConfirmCallback for StdinConfirm {
    fn confirm(&self, total_instances: u32, total_upfront_cost: f64) -> bool {
        use std::io::Write;
        print!("About to purchase {total_instances} instance(s), estimated upfront cost ${total_upfront_cost:.2}. Proceed? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Prints the per-service aggregation and, when both reserved-instance and
/// savings-plan recommendations appeared in the run, the RI-vs-SP
/// comparison (PRD §4.7 last paragraph).
fn print_summary(results: &[PurchaseResult]) {
    let mut per_service: HashMap<Service, ServiceStats> = HashMap::new();
    for result in results {
        let stats = per_service.entry(result.recommendation.service).or_default();
        stats.recs_selected += 1;
        stats.instances_processed += result.recommendation.count;
        if result.success {
            stats.successes += 1;
            stats.estimated_monthly_savings += result.recommendation.estimated_savings;
        } else {
            stats.failures += 1;
        }
    }

    let mut services: Vec<&Service> = per_service.keys().collect();
    services.sort_by_key(|s| s.to_string());

    println!();
    println!("=== Commitment Discount Planner summary ===");
    for service in services {
        let stats = &per_service[service];
        println!(
            "{service}: {} recommendation(s), {} instance(s), {} succeeded, {} failed, ${:.2}/mo estimated savings",
            stats.recs_selected, stats.instances_processed, stats.successes, stats.failures, stats.estimated_monthly_savings
        );
    }

    if let Some(summary) = cdp_orchestrator::summarize(results) {
        println!();
        println!("Reserved Instances vs Savings Plans:");
        println!("  Option 1 (all reserved):             ${:.2}/mo", summary.option_1_all_reserved_savings);
        println!("  Option 2 (savings plans + reserved):  ${:.2}/mo", summary.option_2_mixed_savings);
        match summary.recommended {
            cdp_orchestrator::RecommendedOption::AllReserved => println!("  Recommended: Option 1 (all reserved)"),
            cdp_orchestrator::RecommendedOption::SavingsPlanMixed => println!("  Recommended: Option 2 (savings plans + reserved)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_summary_handles_empty_results_without_panicking() {
        print_summary(&[]);
    }
}
