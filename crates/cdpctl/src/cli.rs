//! Flag surface (PRD §6): a flat `clap::Parser` derive struct — the planner
//! has one run mode, so there are no subcommands.

use clap::Parser;
use std::path::PathBuf;

/// Commitment Discount Planner: selects and purchases reserved-instance /
/// savings-plan commitments across AWS, Azure, and GCP.
#[derive(Parser, Debug)]
#[command(name = "cdpctl")]
#[command(about = "Multi-cloud commitment discount planner")]
#[command(version)]
pub struct Cli {
    /// Services to process (compute, relational-db, cache, search,
    /// data-warehouse, nosql-db, savings-plan). Mutually exclusive with
    /// --all-services.
    #[arg(long, value_delimiter = ',', conflicts_with = "all_services")]
    pub services: Vec<String>,

    /// Process every supported service.
    #[arg(long, conflicts_with = "services")]
    pub all_services: bool,

    /// Region override; empty means auto-discovery per provider.
    #[arg(long, value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Commitment payment option.
    #[arg(long, default_value = "no-upfront")]
    pub payment: String,

    /// Commitment term, in years (1 or 3).
    #[arg(long, default_value_t = 1)]
    pub term: u8,

    /// Coverage percentage (0..=100) applied to recommended counts.
    #[arg(long)]
    pub coverage: Option<u8>,

    /// Run-wide cap on total purchased instances.
    #[arg(long)]
    pub max_instances: Option<u32>,

    /// Only consider these regions.
    #[arg(long, value_delimiter = ',')]
    pub include_regions: Vec<String>,

    /// Exclude these regions.
    #[arg(long, value_delimiter = ',')]
    pub exclude_regions: Vec<String>,

    /// Only consider these resource types.
    #[arg(long, value_delimiter = ',')]
    pub include_instance_types: Vec<String>,

    /// Exclude these resource types.
    #[arg(long, value_delimiter = ',')]
    pub exclude_instance_types: Vec<String>,

    /// Only consider these engines (case-insensitive).
    #[arg(long, value_delimiter = ',')]
    pub include_engines: Vec<String>,

    /// Exclude these engines (case-insensitive).
    #[arg(long, value_delimiter = ',')]
    pub exclude_engines: Vec<String>,

    /// Only consider accounts whose display name matches (substring,
    /// case-insensitive).
    #[arg(long, value_delimiter = ',')]
    pub include_accounts: Vec<String>,

    /// Exclude accounts whose display name matches.
    #[arg(long, value_delimiter = ',')]
    pub exclude_accounts: Vec<String>,

    /// Replace every selected recommendation's count with this value.
    #[arg(long)]
    pub override_count: Option<u32>,

    /// Leave dry-run mode and perform real purchases.
    #[arg(long)]
    pub purchase: bool,

    /// Skip the purchase confirmation prompt.
    #[arg(long)]
    pub yes: bool,

    /// Enter CSV replay mode, re-selecting from a previously emitted report.
    #[arg(long)]
    pub input_csv: Option<PathBuf>,

    /// CSV report output path; auto-generated if omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
}
