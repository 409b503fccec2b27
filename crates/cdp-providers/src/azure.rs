//! Azure provider: Advisor reservation recommendations and the Reserved VM
//! Instance / Reserved Capacity purchase APIs.

use crate::{
    build_http_client, AccountRef, CloudProvider, OfferingDetails, ProviderConfig, ProviderError, PurchaseClient,
    RecommendationParams, RecommendationSource, SourceError, ValidationError, ACCOUNT_LEVEL_QUERY_REGION,
};
use async_trait::async_trait;
use cdp_cache::InstanceTypeCache;
use cdp_model::{
    AzMode, CloudProviderId, Commitment, CommitmentType, Platform, PurchaseResult, Recommendation, Scope, Service,
    ServiceDetails, Tenancy,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
const HOME_REGION: &str = "eastus";

pub struct AzureProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    endpoint: String,
    instance_type_cache: Arc<InstanceTypeCache>,
}

impl std::fmt::Debug for AzureProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureProvider").field("endpoint", &self.endpoint).finish()
    }
}

impl AzureProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            config,
            client: build_http_client(),
            endpoint,
            instance_type_cache: Arc::new(InstanceTypeCache::new()),
        }
    }
}

#[async_trait]
impl CloudProvider for AzureProvider {
    fn id(&self) -> CloudProviderId {
        CloudProviderId::Azure
    }

    fn is_configured(&self) -> bool {
        self.config.credential_path.is_some() || std::env::var("AZURE_SUBSCRIPTION_ID").is_ok()
    }

    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        let resp = self
            .client
            .get(format!("{}/subscriptions?api-version=2022-12-01", self.endpoint))
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
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/subscriptions?api-version=2022-12-01", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(resp["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| {
                Some(AccountRef {
                    account_id: s["subscriptionId"].as_str()?.to_string(),
                    display_name: s["displayName"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/locations?api-version=2022-12-01", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(resp["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| l["name"].as_str().map(str::to_string))
            .collect())
    }

    fn supported_services(&self) -> &[Service] {
        &[Service::Compute, Service::RelationalDb, Service::Cache, Service::SavingsPlan]
    }

    fn home_region(&self) -> &str {
        HOME_REGION
    }

    fn recommendations_client(&self) -> Arc<dyn RecommendationSource> {
        Arc::new(AzureRecommendationSource {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
        })
    }

    fn purchase_client(&self, service: Service, region: &str) -> Arc<dyn PurchaseClient> {
        Arc::new(AzurePurchaseClient {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            service,
            region: region.to_string(),
            instance_type_cache: Arc::clone(&self.instance_type_cache),
        })
    }

    async fn list_running_instances(&self, service: Service, region: &str) -> Result<Vec<crate::RunningInstanceInfo>, ProviderError> {
        if !service.is_database_like() {
            return Ok(Vec::new());
        }
        let provider_namespace = match service {
            Service::RelationalDb => "Microsoft.DBforMySQL/servers",
            Service::Cache => "Microsoft.Cache/redis",
            _ => return Ok(Vec::new()),
        };
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/providers/{provider_namespace}?api-version=2022-01-01", self.endpoint))
            .query(&[("region", region)])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(resp["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(crate::RunningInstanceInfo {
                    resource_type: entry["sku"]["name"].as_str().unwrap_or_default().to_string(),
                    engine: entry["properties"]["version"]
                        .as_str()
                        .map(|_| "mysql".to_string())
                        .or_else(|| entry["properties"]["redisVersion"].as_str().map(|_| "redis".to_string()))?,
                    engine_version: entry["properties"]["version"]
                        .as_str()
                        .or_else(|| entry["properties"]["redisVersion"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }
}

struct AzureRecommendationSource {
    client: reqwest::Client,
    endpoint: String,
}

#[async_trait]
impl RecommendationSource for AzureRecommendationSource {
    async fn get_recommendations(&self, params: &RecommendationParams) -> Result<Vec<Recommendation>, SourceError> {
        let query_region = if params.service.is_account_level() {
            ACCOUNT_LEVEL_QUERY_REGION
        } else {
            params.region.as_deref().unwrap_or(HOME_REGION)
        };
        // Account-level recommendations are re-tagged with the provider's
        // canonical home region (PRD §4.2); the query sentinel above is only
        // used to ask the API for the account-level result, never stored.
        let tagged_region = if params.service.is_account_level() { HOME_REGION } else { query_region };

        let resp = self
            .client
            .get(format!(
                "{}/providers/Microsoft.Advisor/recommendations?api-version=2023-01-01",
                self.endpoint
            ))
            .query(&[("region", query_region), ("category", "Cost")])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::AuthFailure(format!("status {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(SourceError::Unavailable(format!("status {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| SourceError::Malformed(e.to_string()))?;
        let raw = body["value"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            match parse_recommendation(&entry, tagged_region, params) {
                Ok(rec) => out.push(rec),
                Err(e) => warn!(error = %e, "skipping malformed Azure recommendation entry"),
            }
        }
        Ok(out)
    }
}

/// Shared between recommendation parsing and existing-commitment parsing so
/// the reconciliation key (PRD §4.5) lines up between the two: a recommendation
/// and the commitment it should be reconciled against must derive the same
/// `ServiceDetails` variant from the same provider response shape.
fn service_details_from_properties(service: Service, properties: &serde_json::Value) -> ServiceDetails {
    match service {
        Service::RelationalDb => ServiceDetails::Rds {
            engine: properties["engine"].as_str().unwrap_or("sqlserver").to_string(),
            az_mode: AzMode::SingleAz,
        },
        Service::Cache => ServiceDetails::ElastiCache {
            engine: properties["engine"].as_str().unwrap_or("redis").to_string(),
        },
        Service::Compute => ServiceDetails::Ec2 {
            platform: Platform::Linux,
            tenancy: Tenancy::Default,
            scope: Scope::Regional,
        },
        Service::SavingsPlan => ServiceDetails::SavingsPlanDetails {
            plan_type: "ComputeSavingsPlan".to_string(),
        },
        _ => ServiceDetails::Generic,
    }
}

fn parse_recommendation(
    entry: &serde_json::Value,
    tagged_region: &str,
    params: &RecommendationParams,
) -> Result<Recommendation, SourceError> {
    let properties = &entry["properties"];
    let account = properties["subscriptionId"]
        .as_str()
        .ok_or_else(|| SourceError::Malformed("missing subscriptionId".to_string()))?
        .to_string();
    let resource_type = properties["skuName"]
        .as_str()
        .ok_or_else(|| SourceError::Malformed("missing skuName".to_string()))?
        .to_string();
    let count = properties["recommendedQuantity"].as_u64().unwrap_or(0) as u32;

    let service_details = service_details_from_properties(params.service, properties);

    Recommendation::new(
        CloudProviderId::Azure,
        params.service,
        account.clone(),
        account,
        tagged_region.to_string(),
        resource_type,
        count,
        params.term,
        params.payment_option,
        CommitmentType::ReservedInstance,
        properties["upfrontCost"].as_f64().unwrap_or(0.0),
        properties["monthlyRecurringCost"].as_f64().unwrap_or(0.0),
        properties["estimatedMonthlyOnDemand"].as_f64().unwrap_or(0.0),
        properties["savingsAmount"].as_f64().unwrap_or(0.0).max(0.0),
        properties["savingsPercentage"].as_f64().unwrap_or(0.0),
        service_details,
        properties["shortDescription"]["solution"].as_str().unwrap_or_default().to_string(),
        Utc::now(),
    )
    .map_err(|e| SourceError::Malformed(e.to_string()))
}

struct AzurePurchaseClient {
    client: reqwest::Client,
    endpoint: String,
    service: Service,
    region: String,
    instance_type_cache: Arc<InstanceTypeCache>,
}

impl AzurePurchaseClient {
    async fn fetch_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/providers/Microsoft.Compute/skus?api-version=2021-07-01", self.endpoint))
            .query(&[("region", self.region.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(body["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v["name"].as_str().map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl PurchaseClient for AzurePurchaseClient {
    /// 24h TTL cache keyed by service (PRD §4.6); falls back to the static
    /// table on any fetch failure rather than propagating the error.
    async fn list_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        let service_key = format!("{}", self.service);
        let now = Utc::now();
        if let Some(cached) = self.instance_type_cache.get("azure", &service_key, now) {
            return Ok(cached);
        }
        match self.fetch_valid_resource_types().await {
            Ok(types) => {
                self.instance_type_cache.insert("azure", &service_key, types.clone(), now);
                Ok(types)
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "SKU fetch failed, falling back to static table");
                Ok(crate::static_instance_type_table(self.service))
            }
        }
    }

    async fn validate_offering(&self, rec: &Recommendation) -> Result<(), ValidationError> {
        let valid = self.list_valid_resource_types().await.unwrap_or_default();
        if valid.is_empty() || valid.contains(&rec.resource_type) {
            Ok(())
        } else {
            Err(ValidationError::UnknownResourceType(rec.resource_type.clone()))
        }
    }

    async fn get_offering_details(&self, rec: &Recommendation) -> Result<OfferingDetails, ProviderError> {
        Ok(OfferingDetails {
            offering_id: format!("{}-{}", self.service, rec.resource_type),
            upfront_cost: rec.upfront_cost,
            recurring_hourly_cost: rec.recurring_monthly_cost / 730.0,
            currency: "USD".to_string(),
        })
    }

    async fn purchase(&self, rec: &Recommendation, purchase_id: &str) -> PurchaseResult {
        let body = serde_json::json!({
            "sku": { "name": rec.resource_type },
            "properties": {
                "reservedResourceType": format!("{}", self.service),
                "quantity": rec.count,
                "term": format!("{}", rec.term),
                "billingScopeId": rec.account,
            },
        });

        let result = self
            .client
            .put(format!(
                "{}/providers/Microsoft.Capacity/reservationOrders/{}?api-version=2022-11-01",
                self.endpoint, purchase_id
            ))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let parsed: serde_json::Value = resp.json().await.unwrap_or_default();
                PurchaseResult::new(
                    rec.clone(),
                    true,
                    purchase_id.to_string(),
                    parsed["id"].as_str().map(str::to_string),
                    "Reservation order created",
                    Some(rec.upfront_cost),
                    Utc::now(),
                )
            }
            Ok(resp) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("Azure purchase request returned status {}", resp.status()),
                None,
                Utc::now(),
            ),
            Err(e) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("Azure purchase request failed: {e}"),
                None,
                Utc::now(),
            ),
        }
    }

    async fn list_existing_commitments(&self) -> Result<Vec<Commitment>, ProviderError> {
        let resp = self
            .client
            .get(format!(
                "{}/providers/Microsoft.Capacity/reservationOrders?api-version=2022-11-01",
                self.endpoint
            ))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(body["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(Commitment {
                    provider: CloudProviderId::Azure,
                    service: self.service,
                    account: entry["properties"]["billingScopeId"].as_str().unwrap_or_default().to_string(),
                    region: self.region.clone(),
                    resource_type: entry["sku"]["name"].as_str()?.to_string(),
                    count: entry["properties"]["quantity"].as_u64().unwrap_or(0) as u32,
                    term: cdp_model::Term::OneYear,
                    expires_at: Utc::now(),
                    commitment_id: entry["id"].as_str().unwrap_or_default().to_string(),
                    service_details: service_details_from_properties(self.service, &entry["properties"]),
                })
            })
            .collect())
    }
}
