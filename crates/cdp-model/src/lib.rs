//! Provider-neutral data model for the Commitment Discount Planner.
//!
//! Defines the types passed between the source, pipeline, reconciler, and
//! purchase orchestrator: [`Recommendation`], [`Commitment`], and
//! [`PurchaseResult`], plus the enums and the [`ServiceDetails`] tagged
//! variant that keep the core independent of any one cloud's API shape.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Provider & service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderId {
    Aws,
    Azure,
    Gcp,
}

impl std::fmt::Display for CloudProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Azure => write!(f, "azure"),
            Self::Gcp => write!(f, "gcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Compute,
    RelationalDb,
    Cache,
    Search,
    DataWarehouse,
    NosqlDb,
    SavingsPlan,
}

impl Service {
    /// Services whose recommender runs against running database instances
    /// and therefore go through the engine-version validator.
    pub fn is_database_like(&self) -> bool {
        matches!(
            self,
            Self::RelationalDb | Self::Cache | Self::NosqlDb | Self::DataWarehouse
        )
    }

    /// Account-level services are queried once with no region, not once per region.
    pub fn is_account_level(&self) -> bool {
        matches!(self, Self::SavingsPlan)
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::RelationalDb => write!(f, "relational-db"),
            Self::Cache => write!(f, "cache"),
            Self::Search => write!(f, "search"),
            Self::DataWarehouse => write!(f, "data-warehouse"),
            Self::NosqlDb => write!(f, "nosql-db"),
            Self::SavingsPlan => write!(f, "savings-plan"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    OneYear,
    ThreeYear,
}

impl Term {
    /// The provider-side term length, in seconds (PRD §4.6).
    pub fn as_seconds(&self) -> u64 {
        match self {
            Self::OneYear => 31_536_000,
            Self::ThreeYear => 94_608_000,
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneYear => write!(f, "1y"),
            Self::ThreeYear => write!(f, "3y"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentOption {
    AllUpfront,
    PartialUpfront,
    NoUpfront,
}

impl std::fmt::Display for PaymentOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllUpfront => write!(f, "all-upfront"),
            Self::PartialUpfront => write!(f, "partial-upfront"),
            Self::NoUpfront => write!(f, "no-upfront"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentType {
    ReservedInstance,
    SavingsPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AzMode {
    SingleAz,
    MultiAz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tenancy {
    Default,
    Dedicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Regional,
    Zonal,
}

// ─── Service details (tagged variant) ─────────────────────────────────────────

/// Service-specific fields, keyed to the [`Service`] the recommendation is
/// for. Unknown/unmodeled combinations fall back to [`ServiceDetails::Generic`]
/// so they still round-trip through CSV and reach `purchase` (PRD §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceDetails {
    Rds {
        engine: String,
        az_mode: AzMode,
    },
    ElastiCache {
        engine: String,
    },
    Ec2 {
        platform: Platform,
        tenancy: Tenancy,
        scope: Scope,
    },
    SavingsPlanDetails {
        plan_type: String,
    },
    Generic,
}

impl ServiceDetails {
    /// Whether this variant is consistent with the given service, per the
    /// `serviceDetails` variant-must-match-service invariant (PRD §3).
    pub fn matches_service(&self, service: Service) -> bool {
        match (self, service) {
            (Self::Rds { .. }, Service::RelationalDb) => true,
            (Self::ElastiCache { .. }, Service::Cache) => true,
            (Self::Ec2 { .. }, Service::Compute) => true,
            (Self::SavingsPlanDetails { .. }, Service::SavingsPlan) => true,
            (Self::Generic, _) => true,
            _ => false,
        }
    }

    /// The engine name, when this variant carries one (used by the engine
    /// filter and the engine-version validator).
    pub fn engine(&self) -> Option<&str> {
        match self {
            Self::Rds { engine, .. } => Some(engine),
            Self::ElastiCache { engine } => Some(engine),
            _ => None,
        }
    }
}

// ─── Recommendation ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("serviceDetails variant does not match service {0}")]
    ServiceDetailsMismatch(Service),
    #[error("estimatedSavings must be >= 0, got {0}")]
    NegativeSavings(f64),
}

/// A provider-supplied suggestion to commit to `count` units of a resource
/// type in a region, with projected savings. Immutable after construction
/// except for the documented mutations in C4 (engine-version validator) and
/// C6 (duplicate reconciler), which each produce a new, reduced-count value
/// rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub provider: CloudProviderId,
    pub service: Service,
    pub account: String,
    pub account_display_name: String,
    pub region: String,
    pub resource_type: String,
    pub count: u32,
    pub term: Term,
    pub payment_option: PaymentOption,
    pub commitment_type: CommitmentType,
    pub upfront_cost: f64,
    pub recurring_monthly_cost: f64,
    pub estimated_monthly_on_demand: f64,
    pub estimated_savings: f64,
    pub savings_percent: f64,
    pub service_details: ServiceDetails,
    pub description: String,
    pub source_timestamp: DateTime<Utc>,
}

impl Recommendation {
    /// Construct a `Recommendation`, enforcing the invariants from PRD §3.
    /// `count == 0` is allowed at construction (a source may legitimately
    /// report a zero-count suggestion); pipeline steps are what drop it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: CloudProviderId,
        service: Service,
        account: String,
        account_display_name: String,
        region: String,
        resource_type: String,
        count: u32,
        term: Term,
        payment_option: PaymentOption,
        commitment_type: CommitmentType,
        upfront_cost: f64,
        recurring_monthly_cost: f64,
        estimated_monthly_on_demand: f64,
        estimated_savings: f64,
        savings_percent: f64,
        service_details: ServiceDetails,
        description: String,
        source_timestamp: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        if !service_details.matches_service(service) {
            return Err(ModelError::ServiceDetailsMismatch(service));
        }
        if estimated_savings < 0.0 {
            return Err(ModelError::NegativeSavings(estimated_savings));
        }
        Ok(Self {
            provider,
            service,
            account,
            account_display_name,
            region,
            resource_type,
            count,
            term,
            payment_option,
            commitment_type,
            upfront_cost,
            recurring_monthly_cost,
            estimated_monthly_on_demand,
            estimated_savings,
            savings_percent,
            service_details,
            description,
            source_timestamp,
        })
    }

    /// The engine, from `service_details` if present, else the first token
    /// of `description` for services with a structured engine field
    /// (PRD §4.4 step 3).
    pub fn engine(&self) -> Option<String> {
        if let Some(e) = self.service_details.engine() {
            return Some(e.to_string());
        }
        if matches!(self.service, Service::RelationalDb | Service::Cache) {
            return self.description.split_whitespace().next().map(str::to_string);
        }
        None
    }

    /// A copy of this recommendation with `count` replaced.
    pub fn with_count(&self, count: u32) -> Self {
        Self {
            count,
            ..self.clone()
        }
    }
}

// ─── Commitment ────────────────────────────────────────────────────────────────

/// An existing holding in the account, read-only from the core's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub provider: CloudProviderId,
    pub service: Service,
    pub account: String,
    pub region: String,
    pub resource_type: String,
    pub count: u32,
    pub term: Term,
    pub expires_at: DateTime<Utc>,
    pub commitment_id: String,
    pub service_details: ServiceDetails,
}

// ─── Purchase result ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub recommendation: Recommendation,
    pub success: bool,
    pub purchase_id: String,
    pub reservation_id: Option<String>,
    pub message: String,
    pub actual_cost: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PurchaseResult {
    /// Construct a result. `purchase_id` is required and non-empty by
    /// construction (invariant 4, PRD §8) — there is no path that builds a
    /// `PurchaseResult` without one.
    pub fn new(
        recommendation: Recommendation,
        success: bool,
        purchase_id: String,
        reservation_id: Option<String>,
        message: impl Into<String>,
        actual_cost: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        debug_assert!(!purchase_id.is_empty(), "purchase_id must be non-empty");
        Self {
            recommendation,
            success,
            purchase_id,
            reservation_id,
            message: message.into(),
            actual_cost,
            timestamp,
        }
    }
}

// ─── Selection batch ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTotals {
    pub instances: u32,
    pub upfront_cost: f64,
    pub monthly_savings: f64,
}

/// The ordered list of Recommendations surviving the pipeline for one
/// (service, region) pair, plus aggregated totals.
#[derive(Debug, Clone)]
pub struct SelectionBatch {
    pub service: Service,
    pub region: String,
    pub recommendations: Vec<Recommendation>,
}

impl SelectionBatch {
    pub fn new(service: Service, region: impl Into<String>, recommendations: Vec<Recommendation>) -> Self {
        Self {
            service,
            region: region.into(),
            recommendations,
        }
    }

    /// Totals are always recomputed from the current recommendation list,
    /// never cached, so a mutation never leaves stale totals behind.
    pub fn totals(&self) -> BatchTotals {
        self.recommendations.iter().fold(BatchTotals::default(), |mut acc, r| {
            acc.instances += r.count;
            acc.upfront_cost += r.upfront_cost;
            acc.monthly_savings += r.estimated_savings;
            acc
        })
    }
}
