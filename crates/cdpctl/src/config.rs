//! Assembles a [`RunConfig`] from parsed CLI flags (PRD §4.1, §6).
//!
//! No on-disk persistence: `RunConfig` is built once per process from flags
//! and environment variables and never written back out (PRD §1: no
//! persistent state between invocations).

use crate::error::CliError;
use crate::Cli;
use cdp_model::{PaymentOption, Service, Term};
use cdp_pipeline::PipelineOptions;
use cdp_providers::ProviderConfig;

/// Recommendation lookback window. Not exposed as a flag in PRD §6's CLI
/// table; kept at the same default the region-discovery probe already uses
/// (`cdp_providers::registry::resolve_regions`).
pub const DEFAULT_LOOKBACK_DAYS: u32 = 14;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub services: Vec<Service>,
    pub regions: Vec<String>,
    pub payment_option: PaymentOption,
    pub term: Term,
    /// `None` means "use the context-dependent default" — 100% for CSV
    /// replay unless the operator passed `--coverage` explicitly (PRD §4.4
    /// special case).
    pub coverage_pct: Option<u8>,
    pub max_instances: Option<u32>,
    pub pipeline: PipelineOptions,
    pub purchase: bool,
    pub skip_confirmation: bool,
    pub input_csv: Option<std::path::PathBuf>,
    pub output_csv: std::path::PathBuf,
    pub lookback_days: u32,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let services = resolve_services(cli)?;

        if let Some(pct) = cli.coverage {
            if pct > 100 {
                return Err(CliError::Config(format!("--coverage must be 0..=100, got {pct}")));
            }
        }

        let payment_option = parse_payment_option(&cli.payment)?;
        let term = parse_term(cli.term)?;

        let pipeline = PipelineOptions {
            include_regions: cli.include_regions.clone(),
            exclude_regions: cli.exclude_regions.clone(),
            include_resource_types: cli.include_instance_types.clone(),
            exclude_resource_types: cli.exclude_instance_types.clone(),
            include_engines: cli.include_engines.clone(),
            exclude_engines: cli.exclude_engines.clone(),
            include_accounts: cli.include_accounts.clone(),
            exclude_accounts: cli.exclude_accounts.clone(),
            coverage_pct: cli.coverage,
            count_override: cli.override_count,
            max_instances: cli.max_instances,
        };

        let output_csv = cli.output.clone().unwrap_or_else(default_output_path);

        Ok(Self {
            services,
            regions: cli.regions.clone(),
            payment_option,
            term,
            coverage_pct: cli.coverage,
            max_instances: cli.max_instances,
            pipeline,
            purchase: cli.purchase,
            skip_confirmation: cli.yes,
            input_csv: cli.input_csv.clone(),
            output_csv,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        })
    }

    /// Coverage for a live (non-replay) run: the operator's `--coverage`, or
    /// 100% if they didn't pass one.
    pub fn live_coverage_pct(&self) -> u8 {
        self.coverage_pct.unwrap_or(100)
    }

    /// Coverage for a CSV-replay run (PRD §4.4 special case): the
    /// operator's explicit `--coverage`, or 100% if they didn't override it
    /// — the CSV already reflects a chosen coverage.
    pub fn replay_coverage_pct(&self) -> u8 {
        self.coverage_pct.unwrap_or(100)
    }
}

fn default_output_path() -> std::path::PathBuf {
    let now = chrono::Utc::now();
    std::path::PathBuf::from(format!("cdp-report-{}.csv", now.format("%Y%m%d-%H%M%S")))
}

fn resolve_services(cli: &Cli) -> Result<Vec<Service>, CliError> {
    if cli.all_services {
        return Ok(ALL_SERVICES.to_vec());
    }
    if cli.services.is_empty() {
        return Err(CliError::Config("either --services or --all-services is required".to_string()));
    }
    cli.services.iter().map(|s| parse_service(s)).collect()
}

const ALL_SERVICES: &[Service] = &[
    Service::Compute,
    Service::RelationalDb,
    Service::Cache,
    Service::Search,
    Service::DataWarehouse,
    Service::NosqlDb,
    Service::SavingsPlan,
];

pub fn parse_service(s: &str) -> Result<Service, CliError> {
    match s {
        "compute" => Ok(Service::Compute),
        "relational-db" => Ok(Service::RelationalDb),
        "cache" => Ok(Service::Cache),
        "search" => Ok(Service::Search),
        "data-warehouse" => Ok(Service::DataWarehouse),
        "nosql-db" => Ok(Service::NosqlDb),
        "savings-plan" => Ok(Service::SavingsPlan),
        other => Err(CliError::Config(format!("unknown service {other:?}"))),
    }
}

fn parse_payment_option(s: &str) -> Result<PaymentOption, CliError> {
    match s {
        "all-upfront" => Ok(PaymentOption::AllUpfront),
        "partial-upfront" => Ok(PaymentOption::PartialUpfront),
        "no-upfront" => Ok(PaymentOption::NoUpfront),
        other => Err(CliError::Config(format!("--payment must be one of all-upfront, partial-upfront, no-upfront, got {other:?}"))),
    }
}

fn parse_term(years: u8) -> Result<Term, CliError> {
    match years {
        1 => Ok(Term::OneYear),
        3 => Ok(Term::ThreeYear),
        other => Err(CliError::Config(format!("--term must be 1 or 3, got {other}"))),
    }
}

/// Builds the `{profile, region, credentialPath, endpoint}` record PRD
/// §4.1 describes, from environment variables — credential bootstrap is an
/// external collaborator (PRD §1), so this is deliberately thin.
pub fn provider_config_from_env(prefix: &str) -> ProviderConfig {
    let upper = prefix.to_uppercase();
    ProviderConfig {
        profile: std::env::var(format!("{upper}_PROFILE")).ok(),
        region: std::env::var(format!("{upper}_REGION")).ok(),
        credential_path: std::env::var(format!("{upper}_CREDENTIAL_PATH")).ok(),
        endpoint: std::env::var(format!("{upper}_ENDPOINT")).ok(),
    }
}
