//! GCP provider: Recommender committed-use-discount insights and the Compute
//! Engine commitment purchase API. Supports Compute only — GCP's CUD
//! recommender does not cover the other services at this time.

use crate::{
    build_http_client, AccountRef, CloudProvider, OfferingDetails, ProviderConfig, ProviderError, PurchaseClient,
    RecommendationParams, RecommendationSource, SourceError, ValidationError,
};
use async_trait::async_trait;
use cdp_model::{
    CloudProviderId, Commitment, CommitmentType, Platform, PurchaseResult, Recommendation, Scope, Service,
    ServiceDetails, Tenancy,
};
use chrono::Utc;
use std::sync::Arc;

const DEFAULT_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";
const HOME_REGION: &str = "us-central1";

#[derive(Debug)]
pub struct GcpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    endpoint: String,
}

impl GcpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            config,
            client: build_http_client(),
            endpoint,
        }
    }
}

#[async_trait]
impl CloudProvider for GcpProvider {
    fn id(&self) -> CloudProviderId {
        CloudProviderId::Gcp
    }

    fn is_configured(&self) -> bool {
        self.config.credential_path.is_some() || std::env::var("GOOGLE_APPLICATION_CREDENTIALS").is_ok()
    }

    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        let project = self.config.profile.as_deref().unwrap_or("default");
        let resp = self
            .client
            .get(format!("{}/projects/{project}", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::RequestFailed(format!("status {}", resp.status())))
        }
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRef>, ProviderError> {
        let project = self.config.profile.clone().unwrap_or_else(|| "default".to_string());
        Ok(vec![AccountRef {
            account_id: project.clone(),
            display_name: project,
        }])
    }

    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        let project = self.config.profile.as_deref().unwrap_or("default");
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/projects/{project}/regions", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(resp["items"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r["name"].as_str().map(str::to_string))
            .collect())
    }

    fn supported_services(&self) -> &[Service] {
        &[Service::Compute]
    }

    fn home_region(&self) -> &str {
        HOME_REGION
    }

    fn recommendations_client(&self) -> Arc<dyn RecommendationSource> {
        Arc::new(GcpRecommendationSource {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            project: self.config.profile.clone().unwrap_or_else(|| "default".to_string()),
        })
    }

    fn purchase_client(&self, service: Service, region: &str) -> Arc<dyn PurchaseClient> {
        Arc::new(GcpPurchaseClient {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            project: self.config.profile.clone().unwrap_or_else(|| "default".to_string()),
            service,
            region: region.to_string(),
        })
    }

    /// GCP supports Compute only, which is not database-like — the
    /// engine-version validator never runs for this provider.
    async fn list_running_instances(&self, _service: Service, _region: &str) -> Result<Vec<crate::RunningInstanceInfo>, ProviderError> {
        Ok(Vec::new())
    }
}

struct GcpRecommendationSource {
    client: reqwest::Client,
    endpoint: String,
    project: String,
}

#[async_trait]
impl RecommendationSource for GcpRecommendationSource {
    async fn get_recommendations(&self, params: &RecommendationParams) -> Result<Vec<Recommendation>, SourceError> {
        let region = params.region.as_deref().unwrap_or(HOME_REGION);
        let resp = self
            .client
            .get(format!(
                "{}/projects/{}/locations/{region}/recommenders/google.compute.commitment.UsageCommitmentRecommender/recommendations",
                self.endpoint, self.project
            ))
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED || resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::AuthFailure(format!("status {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(SourceError::Unavailable(format!("status {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| SourceError::Malformed(e.to_string()))?;
        let raw = body["recommendations"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            if let Ok(rec) = parse_recommendation(&entry, &self.project, region, params) {
                out.push(rec);
            }
        }
        Ok(out)
    }
}

fn parse_recommendation(
    entry: &serde_json::Value,
    project: &str,
    region: &str,
    params: &RecommendationParams,
) -> Result<Recommendation, SourceError> {
    let op = entry["content"]["operationGroups"][0]["operations"][0].clone();
    let resource_type = op["value"]["type"].as_str().unwrap_or("n2-standard-4").to_string();
    // The Recommender API expresses a CUD recommendation as a single plan
    // change rather than an instance count; one commitment per recommendation.
    let count = 1u32;
    let savings = entry["primaryImpact"]["costProjection"]["cost"]["units"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
        .abs();

    Recommendation::new(
        CloudProviderId::Gcp,
        Service::Compute,
        project.to_string(),
        project.to_string(),
        region.to_string(),
        resource_type,
        count,
        params.term,
        params.payment_option,
        CommitmentType::ReservedInstance,
        0.0,
        entry["primaryImpact"]["costProjection"]["cost"]["units"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
            .abs(),
        savings * 2.0,
        savings,
        0.0,
        ServiceDetails::Ec2 {
            platform: Platform::Linux,
            tenancy: Tenancy::Default,
            scope: Scope::Regional,
        },
        entry["description"].as_str().unwrap_or_default().to_string(),
        Utc::now(),
    )
    .map_err(|e| SourceError::Malformed(e.to_string()))
}

struct GcpPurchaseClient {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    service: Service,
    region: String,
}

#[async_trait]
impl PurchaseClient for GcpPurchaseClient {
    async fn list_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        Ok(crate::static_instance_type_table(self.service))
    }

    async fn validate_offering(&self, rec: &Recommendation) -> Result<(), ValidationError> {
        let valid = crate::static_instance_type_table(self.service);
        if valid.iter().any(|v| rec.resource_type.starts_with(v.split('.').next().unwrap_or(v))) || valid.contains(&rec.resource_type) {
            Ok(())
        } else {
            Err(ValidationError::UnknownResourceType(rec.resource_type.clone()))
        }
    }

    async fn get_offering_details(&self, rec: &Recommendation) -> Result<OfferingDetails, ProviderError> {
        Ok(OfferingDetails {
            offering_id: format!("gcp-cud-{}", rec.resource_type),
            upfront_cost: 0.0,
            recurring_hourly_cost: rec.recurring_monthly_cost / 730.0,
            currency: "USD".to_string(),
        })
    }

    async fn purchase(&self, rec: &Recommendation, purchase_id: &str) -> PurchaseResult {
        let body = serde_json::json!({
            "name": purchase_id,
            "plan": if rec.term == cdp_model::Term::ThreeYear { "THREE_YEAR" } else { "TWELVE_MONTH" },
            "resources": [{ "type": rec.resource_type, "amount": rec.count }],
        });

        let result = self
            .client
            .post(format!(
                "{}/projects/{}/regions/{}/commitments",
                self.endpoint, self.project, self.region
            ))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => PurchaseResult::new(
                rec.clone(),
                true,
                purchase_id.to_string(),
                Some(purchase_id.to_string()),
                "Commitment created",
                Some(rec.upfront_cost),
                Utc::now(),
            ),
            Ok(resp) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("GCP commitment request returned status {}", resp.status()),
                None,
                Utc::now(),
            ),
            Err(e) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("GCP commitment request failed: {e}"),
                None,
                Utc::now(),
            ),
        }
    }

    async fn list_existing_commitments(&self) -> Result<Vec<Commitment>, ProviderError> {
        let resp = self
            .client
            .get(format!(
                "{}/projects/{}/regions/{}/commitments",
                self.endpoint, self.project, self.region
            ))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(body["items"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(Commitment {
                    provider: CloudProviderId::Gcp,
                    service: self.service,
                    account: self.project.clone(),
                    region: self.region.clone(),
                    resource_type: entry["resources"][0]["type"].as_str()?.to_string(),
                    count: entry["resources"][0]["amount"].as_u64().unwrap_or(0) as u32,
                    term: if entry["plan"].as_str() == Some("THREE_YEAR") {
                        cdp_model::Term::ThreeYear
                    } else {
                        cdp_model::Term::OneYear
                    },
                    expires_at: Utc::now(),
                    commitment_id: entry["name"].as_str().unwrap_or_default().to_string(),
                    // GCP supports Compute only; every recommendation this
                    // provider produces carries the same fixed Ec2 fields
                    // (see `parse_recommendation` above), so existing
                    // commitments must match them for the reconciliation key
                    // (PRD §4.5) to line up.
                    service_details: ServiceDetails::Ec2 {
                        platform: Platform::Linux,
                        tenancy: Tenancy::Default,
                        scope: Scope::Regional,
                    },
                })
            })
            .collect())
    }
}
