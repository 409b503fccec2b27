//! AWS provider: Cost Explorer RI/Savings-Plan recommendations and the EC2/RDS/
//! ElastiCache purchase APIs, behind the neutral [`CloudProvider`] contract.

use crate::{
    build_http_client, term_seconds, AccountRef, CloudProvider, OfferingDetails, ProviderConfig, ProviderError,
    PurchaseClient, RecommendationParams, RecommendationSource, SourceError, ValidationError,
    ACCOUNT_LEVEL_QUERY_REGION,
};
use async_trait::async_trait;
use cdp_cache::InstanceTypeCache;
use cdp_model::{
    AzMode, CloudProviderId, Commitment, CommitmentType, Platform, PurchaseResult, Recommendation, Scope, Service,
    ServiceDetails, Tenancy, Term,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_ENDPOINT: &str = "https://ce.us-east-1.amazonaws.com";
const HOME_REGION: &str = "us-east-1";

pub struct AwsProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    endpoint: String,
    instance_type_cache: Arc<InstanceTypeCache>,
}

impl std::fmt::Debug for AwsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProvider").field("endpoint", &self.endpoint).finish()
    }
}

impl AwsProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            config,
            client: build_http_client(),
            endpoint,
            instance_type_cache: Arc::new(InstanceTypeCache::new()),
        }
    }

    fn credential_path(&self) -> Option<&str> {
        self.config.credential_path.as_deref()
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn id(&self) -> CloudProviderId {
        CloudProviderId::Aws
    }

    fn is_configured(&self) -> bool {
        self.credential_path().is_some() || std::env::var("AWS_PROFILE").is_ok() || std::env::var("AWS_ACCESS_KEY_ID").is_ok()
    }

    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        let resp = self
            .client
            .get(format!("{}/sts/get-caller-identity", self.endpoint))
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
            .get(format!("{}/organizations/list-accounts", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let accounts = resp["Accounts"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                Some(AccountRef {
                    account_id: a["Id"].as_str()?.to_string(),
                    display_name: a["Name"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(accounts)
    }

    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/ec2/describe-regions", self.endpoint))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let regions = resp["Regions"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r["RegionName"].as_str().map(str::to_string))
            .collect();
        Ok(regions)
    }

    fn supported_services(&self) -> &[Service] {
        &[
            Service::Compute,
            Service::RelationalDb,
            Service::Cache,
            Service::Search,
            Service::DataWarehouse,
            Service::NosqlDb,
            Service::SavingsPlan,
        ]
    }

    fn home_region(&self) -> &str {
        HOME_REGION
    }

    fn recommendations_client(&self) -> Arc<dyn RecommendationSource> {
        Arc::new(AwsRecommendationSource {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
        })
    }

    fn purchase_client(&self, service: Service, region: &str) -> Arc<dyn PurchaseClient> {
        Arc::new(AwsPurchaseClient {
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
        let path = match service {
            Service::RelationalDb => "rds/describe-db-instances",
            Service::Cache => "elasticache/describe-cache-clusters",
            _ => return Ok(Vec::new()),
        };
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/{path}", self.endpoint))
            .query(&[("Region", region)])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let raw = resp["DBInstances"]
            .as_array()
            .or_else(|| resp["CacheClusters"].as_array())
            .cloned()
            .unwrap_or_default();

        Ok(raw
            .into_iter()
            .filter_map(|entry| {
                Some(crate::RunningInstanceInfo {
                    resource_type: entry["DBInstanceClass"]
                        .as_str()
                        .or_else(|| entry["CacheNodeType"].as_str())?
                        .to_string(),
                    engine: entry["Engine"].as_str()?.to_string(),
                    engine_version: entry["EngineVersion"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }
}

// ─── Recommendation source ─────────────────────────────────────────────────────

struct AwsRecommendationSource {
    client: reqwest::Client,
    endpoint: String,
}

#[async_trait]
impl RecommendationSource for AwsRecommendationSource {
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

        let path = if params.service == Service::SavingsPlan {
            "cost-explorer/get-savings-plans-purchase-recommendation"
        } else {
            "cost-explorer/get-reservation-purchase-recommendation"
        };

        let resp = self
            .client
            .get(format!("{}/{path}", self.endpoint))
            .query(&[
                ("Service", format!("{}", params.service)),
                ("Region", query_region.to_string()),
                ("TermInYears", if params.term == Term::OneYear { "1".into() } else { "3".into() }),
                ("LookbackDays", params.lookback_days.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED || resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::AuthFailure(format!("status {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(SourceError::Unavailable(format!("status {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        let raw = body["Recommendations"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            match parse_recommendation(&entry, tagged_region, params) {
                Ok(rec) => out.push(rec),
                Err(e) => warn!(error = %e, "skipping malformed AWS recommendation entry"),
            }
        }
        info!(count = out.len(), service = %params.service, region = tagged_region, "fetched AWS recommendations");
        Ok(out)
    }
}

/// Shared between recommendation parsing and existing-commitment parsing so
/// the reconciliation key (PRD §4.5) lines up between the two: a recommendation
/// and the commitment it should be reconciled against must derive the same
/// `ServiceDetails` variant from the same provider response shape.
fn service_details_from_entry(service: Service, entry: &serde_json::Value) -> ServiceDetails {
    match service {
        Service::RelationalDb => ServiceDetails::Rds {
            engine: entry["Engine"].as_str().unwrap_or("mysql").to_string(),
            az_mode: if entry["MultiAZ"].as_bool().unwrap_or(false) {
                AzMode::MultiAz
            } else {
                AzMode::SingleAz
            },
        },
        Service::Cache => ServiceDetails::ElastiCache {
            engine: entry["Engine"].as_str().unwrap_or("redis").to_string(),
        },
        Service::Compute => ServiceDetails::Ec2 {
            platform: if entry["Platform"].as_str() == Some("Windows") {
                Platform::Windows
            } else {
                Platform::Linux
            },
            tenancy: if entry["Tenancy"].as_str() == Some("Dedicated") {
                Tenancy::Dedicated
            } else {
                Tenancy::Default
            },
            scope: if entry["Scope"].as_str() == Some("Zonal") {
                Scope::Zonal
            } else {
                Scope::Regional
            },
        },
        Service::SavingsPlan => ServiceDetails::SavingsPlanDetails {
            plan_type: entry["SavingsPlanType"].as_str().unwrap_or("ComputeSavingsPlans").to_string(),
        },
        _ => ServiceDetails::Generic,
    }
}

fn parse_recommendation(
    entry: &serde_json::Value,
    tagged_region: &str,
    params: &RecommendationParams,
) -> Result<Recommendation, SourceError> {
    let account = entry["AccountId"]
        .as_str()
        .ok_or_else(|| SourceError::Malformed("missing AccountId".to_string()))?
        .to_string();
    let resource_type = entry["InstanceType"]
        .as_str()
        .or_else(|| entry["ResourceType"].as_str())
        .ok_or_else(|| SourceError::Malformed("missing InstanceType".to_string()))?
        .to_string();
    let count = entry["RecommendedNumberOfInstances"].as_u64().unwrap_or(0) as u32;
    let upfront_cost = entry["UpfrontCost"].as_f64().unwrap_or(0.0);
    let recurring_monthly_cost = entry["EstimatedMonthlyRecurringCost"].as_f64().unwrap_or(0.0);
    let on_demand = entry["EstimatedMonthlyOnDemandCost"].as_f64().unwrap_or(0.0);
    let savings = entry["EstimatedMonthlySavingsAmount"].as_f64().unwrap_or(0.0);
    let savings_pct = entry["EstimatedSavingsPercentage"].as_f64().unwrap_or(0.0);
    let description = entry["Description"].as_str().unwrap_or_default().to_string();

    let service_details = service_details_from_entry(params.service, entry);

    let commitment_type = if params.service == Service::SavingsPlan {
        CommitmentType::SavingsPlan
    } else {
        CommitmentType::ReservedInstance
    };

    Recommendation::new(
        CloudProviderId::Aws,
        params.service,
        account.clone(),
        account,
        tagged_region.to_string(),
        resource_type,
        count,
        params.term,
        params.payment_option,
        commitment_type,
        upfront_cost,
        recurring_monthly_cost,
        on_demand,
        savings.max(0.0),
        savings_pct,
        service_details,
        description,
        Utc::now(),
    )
    .map_err(|e| SourceError::Malformed(e.to_string()))
}

// ─── Purchase client ────────────────────────────────────────────────────────────

struct AwsPurchaseClient {
    client: reqwest::Client,
    endpoint: String,
    service: Service,
    region: String,
    instance_type_cache: Arc<InstanceTypeCache>,
}

impl AwsPurchaseClient {
    async fn fetch_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/pricing/list-instance-types", self.endpoint))
            .query(&[("Service", format!("{}", self.service)), ("Region", self.region.clone())])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(body["InstanceTypes"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl PurchaseClient for AwsPurchaseClient {
    /// 24h TTL cache keyed by service (PRD §4.6); falls back to the static
    /// table on any fetch failure rather than propagating the error.
    async fn list_valid_resource_types(&self) -> Result<Vec<String>, ProviderError> {
        let service_key = format!("{}", self.service);
        let now = Utc::now();
        if let Some(cached) = self.instance_type_cache.get("aws", &service_key, now) {
            return Ok(cached);
        }

        let fetched = self.fetch_valid_resource_types().await;
        match fetched {
            Ok(types) => {
                self.instance_type_cache.insert("aws", &service_key, types.clone(), now);
                Ok(types)
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "list-instance-types fetch failed, falling back to static table");
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
        let resp = self
            .client
            .get(format!("{}/pricing/describe-reserved-instances-offerings", self.endpoint))
            .query(&[
                ("InstanceType", rec.resource_type.as_str()),
                ("Region", self.region.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let offering = body["ReservedInstancesOfferings"]
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or_default();
        Ok(OfferingDetails {
            offering_id: offering["ReservedInstancesOfferingId"].as_str().unwrap_or_default().to_string(),
            upfront_cost: offering["FixedPrice"].as_f64().unwrap_or(rec.upfront_cost),
            recurring_hourly_cost: offering["UsagePrice"].as_f64().unwrap_or(0.0),
            currency: offering["CurrencyCode"].as_str().unwrap_or("USD").to_string(),
        })
    }

    async fn purchase(&self, rec: &Recommendation, purchase_id: &str) -> PurchaseResult {
        let body = serde_json::json!({
            "InstanceType": rec.resource_type,
            "InstanceCount": rec.count,
            "Region": self.region,
            "Duration": term_seconds(rec.term),
            "ClientToken": purchase_id,
        });

        let result = self
            .client
            .post(format!("{}/ec2/purchase-reserved-instances-offering", self.endpoint))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let parsed: serde_json::Value = resp.json().await.unwrap_or_default();
                let reservation_id = parsed["ReservedInstancesId"].as_str().map(str::to_string);
                PurchaseResult::new(
                    rec.clone(),
                    true,
                    purchase_id.to_string(),
                    reservation_id,
                    "Purchase succeeded",
                    Some(rec.upfront_cost),
                    Utc::now(),
                )
            }
            Ok(resp) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("AWS purchase request returned status {}", resp.status()),
                None,
                Utc::now(),
            ),
            Err(e) => PurchaseResult::new(
                rec.clone(),
                false,
                purchase_id.to_string(),
                None,
                format!("AWS purchase request failed: {e}"),
                None,
                Utc::now(),
            ),
        }
    }

    async fn list_existing_commitments(&self) -> Result<Vec<Commitment>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/ec2/describe-reserved-instances", self.endpoint))
            .query(&[("Region", self.region.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let commitments = body["ReservedInstances"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(Commitment {
                    provider: CloudProviderId::Aws,
                    service: self.service,
                    account: entry["AccountId"].as_str().unwrap_or_default().to_string(),
                    region: self.region.clone(),
                    resource_type: entry["InstanceType"].as_str()?.to_string(),
                    count: entry["InstanceCount"].as_u64().unwrap_or(0) as u32,
                    term: if entry["Duration"].as_u64().unwrap_or(Term::OneYear.as_seconds()) > Term::OneYear.as_seconds() {
                        Term::ThreeYear
                    } else {
                        Term::OneYear
                    },
                    expires_at: Utc::now(),
                    commitment_id: entry["ReservedInstancesId"].as_str().unwrap_or_default().to_string(),
                    service_details: service_details_from_entry(self.service, &entry),
                })
            })
            .collect();
        Ok(commitments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recommendation_extracts_ec2_fields() {
        let entry = serde_json::json!({
            "AccountId": "123456789012",
            "InstanceType": "m5.large",
            "RecommendedNumberOfInstances": 4,
            "UpfrontCost": 0.0,
            "EstimatedMonthlyRecurringCost": 50.0,
            "EstimatedMonthlyOnDemandCost": 90.0,
            "EstimatedMonthlySavingsAmount": 40.0,
            "EstimatedSavingsPercentage": 44.4,
            "Platform": "Linux",
            "Description": "Linux/UNIX m5.large",
        });
        let params = RecommendationParams {
            service: Service::Compute,
            region: Some("us-east-1".to_string()),
            payment_option: cdp_model::PaymentOption::NoUpfront,
            term: Term::OneYear,
            lookback_days: 14,
            account_filter: None,
            include_regions: vec![],
            exclude_regions: vec![],
        };
        let rec = parse_recommendation(&entry, "us-east-1", &params).expect("parses");
        assert_eq!(rec.count, 4);
        assert_eq!(rec.resource_type, "m5.large");
        assert_eq!(rec.region, "us-east-1");
    }

    #[test]
    fn parse_recommendation_rejects_missing_account() {
        let entry = serde_json::json!({ "InstanceType": "m5.large" });
        let params = RecommendationParams {
            service: Service::Compute,
            region: Some("us-east-1".to_string()),
            payment_option: cdp_model::PaymentOption::NoUpfront,
            term: Term::OneYear,
            lookback_days: 14,
            account_filter: None,
            include_regions: vec![],
            exclude_regions: vec![],
        };
        assert!(parse_recommendation(&entry, "us-east-1", &params).is_err());
    }
}
