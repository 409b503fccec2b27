//! Static fallback tables used when a provider's live catalogue endpoint is
//! unavailable (PRD §1's "static instance-type lookup tables" collaborator,
//! §4.6's fallback-to-static-table rule).

use cdp_model::Service;

/// A conservative, hand-maintained list of resource types per service, used
/// only when the provider's `listValidResourceTypes` call fails.
pub fn static_instance_type_table(service: Service) -> Vec<String> {
    match service {
        Service::Compute => ["m5.large", "m5.xlarge", "c5.large", "r5.large", "t3.medium"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::RelationalDb => ["db.r5.large", "db.r5.xlarge", "db.t3.medium", "db.m5.large"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::Cache => ["cache.r6g.large", "cache.m6g.large", "cache.t3.micro"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::Search => ["r6g.large.search", "m6g.large.search"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::DataWarehouse => ["ra3.xlplus", "ra3.4xlarge"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::NosqlDb => ["standard", "standard-ia"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Service::SavingsPlan => ["compute", "ec2-instance"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}
