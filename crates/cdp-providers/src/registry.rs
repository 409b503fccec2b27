//! Process-wide provider registry: name → capability, resolved once per run.

use crate::{CloudProvider, ProviderError};
use cdp_model::{CloudProviderId, Service};
use futures::future::join_all;
use std::collections::HashMap;
use tracing::{info, warn};

pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider. One-shot per name — registering a name twice
    /// is a programming error (PRD §4.1).
    pub fn register(&mut self, provider: Box<dyn CloudProvider>) {
        let name = provider_name(provider.id());
        if self.providers.contains_key(name) {
            panic!("provider '{name}' is already registered");
        }
        info!(provider = name, "registering provider");
        self.providers.insert(name.to_string(), provider);
    }

    /// Test hook: remove a provider so it can be re-registered.
    pub fn unregister(&mut self, name: &str) {
        self.providers.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&dyn CloudProvider> {
        self.providers.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn services_for(&self, name: &str) -> &[Service] {
        self.providers
            .get(name)
            .map(|p| p.supported_services())
            .unwrap_or(&[])
    }

    /// Providers that are both configured and credential-valid, probed
    /// concurrently (PRD §4.1).
    pub async fn detect_available(&self) -> Vec<&str> {
        let checks = self.providers.iter().map(|(name, provider)| async move {
            if !provider.is_configured() {
                return None;
            }
            match provider.validate_credentials().await {
                Ok(()) => Some(name.as_str()),
                Err(e) => {
                    warn!(provider = name.as_str(), error = %e, "credential validation failed");
                    None
                }
            }
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Region auto-discovery (PRD §4.1): try `list_regions`; on failure,
    /// fall back to a query-once probe over the recommendations source.
    pub async fn resolve_regions(
        &self,
        name: &str,
        service: Service,
        explicit: &[String],
    ) -> Result<Vec<String>, ProviderError> {
        if !explicit.is_empty() {
            return Ok(explicit.to_vec());
        }
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::Unreachable(format!("unknown provider '{name}'")))?;

        if service.is_account_level() {
            return Ok(vec![provider.home_region().to_string()]);
        }

        match provider.list_regions().await {
            Ok(regions) if !regions.is_empty() => Ok(regions),
            _ => {
                warn!(provider = name, service = %service, "list_regions unavailable, probing once");
                let params = crate::RecommendationParams {
                    service,
                    region: None,
                    payment_option: cdp_model::PaymentOption::NoUpfront,
                    term: cdp_model::Term::OneYear,
                    lookback_days: 14,
                    account_filter: None,
                    include_regions: Vec::new(),
                    exclude_regions: Vec::new(),
                };
                let recs = provider
                    .recommendations_client()
                    .get_recommendations(&params)
                    .await
                    .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
                let mut regions: Vec<String> = recs.into_iter().map(|r| r.region).collect();
                regions.sort();
                regions.dedup();
                Ok(regions)
            }
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn provider_name(id: CloudProviderId) -> &'static str {
    match id {
        CloudProviderId::Aws => "aws",
        CloudProviderId::Azure => "azure",
        CloudProviderId::Gcp => "gcp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("aws").is_none());
        assert!(registry.names().is_empty());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn register_panics_on_duplicate_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(crate::AwsProvider::new(crate::ProviderConfig::default())));
        registry.register(Box::new(crate::AwsProvider::new(crate::ProviderConfig::default())));
    }

    #[test]
    fn unregister_allows_reregistration() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(crate::AwsProvider::new(crate::ProviderConfig::default())));
        registry.unregister("aws");
        registry.register(Box::new(crate::AwsProvider::new(crate::ProviderConfig::default())));
        assert!(registry.get("aws").is_some());
    }
}
