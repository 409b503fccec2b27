//! Multi-cloud recommendation source and purchase-client adapters.
//!
//! Supports AWS, Azure, and GCP. Each provider implements [`CloudProvider`]
//! plus the narrower [`RecommendationSource`] and [`PurchaseClient`]
//! capabilities it hands out, so the core depends on no provider SDK
//! directly (PRD §9).

#![forbid(unsafe_code)]

mod aws;
mod azure;
mod gcp;
mod registry;
mod static_tables;

pub use aws::AwsProvider;
pub use azure::AzureProvider;
pub use gcp::GcpProvider;
pub use registry::ProviderRegistry;
pub use static_tables::static_instance_type_table;

use async_trait::async_trait;
use cdp_model::{CloudProviderId, Commitment, PaymentOption, PurchaseResult, Recommendation, Service, Term};
use std::sync::Arc;
use thiserror::Error;

// ─── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Matches PRD §4.2/§7: retryable (skip region), fatal (stop provider), or
/// malformed (skip, log).
#[derive(Debug, Error, Clone)]
pub enum SourceError {
    #[error("recommendation source unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("malformed recommendation response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone)]
pub enum ValidationError {
    #[error("resource type {0} is not in the provider's current catalogue")]
    UnknownResourceType(String),
}

// ─── Configuration record ──────────────────────────────────────────────────────

/// The configuration a provider factory closes over (PRD §4.1).
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub credential_path: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountRef {
    pub account_id: String,
    pub display_name: String,
}

/// One running database-like instance observed in a region, the raw input
/// to the engine-version validator's step 1 (PRD §4.3). Provider-neutral:
/// just enough to key into a lifecycle catalogue keyed by engine + version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstanceInfo {
    pub resource_type: String,
    pub engine: String,
    pub engine_version: String,
}

// ─── Recommendation source (C3) ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecommendationParams {
    pub service: Service,
    pub region: Option<String>,
    pub payment_option: PaymentOption,
    pub term: Term,
    pub lookback_days: u32,
    pub account_filter: Option<String>,
    pub include_regions: Vec<String>,
    pub exclude_regions: Vec<String>,
}

/// The provider's home region sentinel for account-level services, tagged
/// onto the single neutral-region query's results (PRD §4.2).
pub const ACCOUNT_LEVEL_QUERY_REGION: &str = "global";

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn get_recommendations(&self, params: &RecommendationParams) -> Result<Vec<Recommendation>, SourceError>;
}

// ─── Purchase client adapter (C7) ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OfferingDetails {
    pub offering_id: String,
    pub upfront_cost: f64,
    pub recurring_hourly_cost: f64,
    pub currency: String,
}

#[async_trait]
pub trait PurchaseClient: Send + Sync {
    async fn list_valid_resource_types(&self) -> Result<Vec<String>, ProviderError>;
    async fn validate_offering(&self, rec: &Recommendation) -> Result<(), ValidationError>;
    async fn get_offering_details(&self, rec: &Recommendation) -> Result<OfferingDetails, ProviderError>;
    /// Never returns `Err` for business failures — on any non-success path
    /// this returns `Ok` with `success: false` and a human-readable message
    /// (PRD §4.6). `purchase_id` is generated by the orchestrator and
    /// passed in so ids exist even for a call that later fails outright.
    async fn purchase(&self, rec: &Recommendation, purchase_id: &str) -> PurchaseResult;
    async fn list_existing_commitments(&self) -> Result<Vec<Commitment>, ProviderError>;
}

// ─── Cloud provider capability set (C2) ────────────────────────────────────────

#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn id(&self) -> CloudProviderId;
    fn is_configured(&self) -> bool;
    async fn validate_credentials(&self) -> Result<(), ProviderError>;
    async fn list_accounts(&self) -> Result<Vec<AccountRef>, ProviderError>;
    async fn list_regions(&self) -> Result<Vec<String>, ProviderError>;
    fn supported_services(&self) -> &[Service];
    /// The canonical home region used to tag account-level (Savings Plan)
    /// recommendations (PRD §4.2).
    fn home_region(&self) -> &str;
    fn recommendations_client(&self) -> Arc<dyn RecommendationSource>;
    fn purchase_client(&self, service: Service, region: &str) -> Arc<dyn PurchaseClient>;
    /// Running instances of `service` in `region`, for the engine-version
    /// validator's step 1 (PRD §4.3). Only meaningful for database-like
    /// services; providers that don't support one return an empty list.
    async fn list_running_instances(&self, service: Service, region: &str) -> Result<Vec<RunningInstanceInfo>, ProviderError>;
}

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}

/// Term mapping from PRD §4.6 — shared by every provider's purchase adapter.
pub(crate) fn term_seconds(term: Term) -> u64 {
    term.as_seconds()
}
