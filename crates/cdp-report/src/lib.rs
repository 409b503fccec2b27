//! CSV report writer/reader for the Commitment Discount Planner.
//!
//! The report is both the run's output artifact and, via [`read_report`], a
//! replay input: a previously written CSV re-enters the selection pipeline
//! at the filter stage with its rows turned back into [`Recommendation`]s.

#![forbid(unsafe_code)]

use cdp_cache::AccountAliasCache;
use cdp_model::{
    AzMode, CloudProviderId, CommitmentType, PaymentOption, Platform, PurchaseResult,
    Recommendation, Scope, Service, ServiceDetails, Tenancy, Term,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed row {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
}

/// Run status, serialized as the bare strings `SUCCESS` / `FAILED` rather
/// than csv's default field-renaming rules (PRD §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl From<bool> for Status {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(D::Error::custom(format!("unknown Status value {other:?}"))),
        }
    }
}

/// Wraps `Option<f64>`, serializing `None` as the literal `N/A` (PRD §6)
/// rather than an empty field, since `ActualCost` is the one numeric column
/// the schema gives an explicit absent-value sentinel for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActualCostCell(pub Option<f64>);

impl Serialize for ActualCostCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(cost) => serializer.serialize_str(&cost.to_string()),
            None => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for ActualCostCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() || raw.eq_ignore_ascii_case("n/a") {
            return Ok(Self(None));
        }
        raw.parse::<f64>()
            .map(|v| Self(Some(v)))
            .map_err(|e| D::Error::custom(format!("invalid ActualCost {raw:?}: {e}")))
    }
}

/// One row of the stable CSV schema (PRD §6), column order as declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "Provider")]
    pub provider: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "AccountName")]
    pub account_name: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    #[serde(rename = "Engine")]
    pub engine: String,
    #[serde(rename = "AZConfig")]
    pub az_config: String,
    #[serde(rename = "PaymentOption")]
    pub payment_option: String,
    #[serde(rename = "Term")]
    pub term: String,
    #[serde(rename = "Count")]
    pub count: u32,
    #[serde(rename = "PurchaseID")]
    pub purchase_id: String,
    #[serde(rename = "ReservationID")]
    pub reservation_id: String,
    #[serde(rename = "ActualCost")]
    pub actual_cost: ActualCostCell,
    #[serde(rename = "EstimatedCost")]
    pub estimated_cost: f64,
    #[serde(rename = "SavingsPercent")]
    pub savings_percent: f64,
    #[serde(rename = "UpfrontCost")]
    pub upfront_cost: f64,
    #[serde(rename = "RecurringMonthlyCost")]
    pub recurring_monthly_cost: f64,
    #[serde(rename = "EstimatedMonthlyOnDemand")]
    pub estimated_monthly_on_demand: f64,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Description")]
    pub description: String,
}

/// Encodes the service-specific fields of `ServiceDetails` into the
/// `Engine`/`AZConfig` columns. RDS carries engine + az mode; EC2 has no
/// engine and packs platform/tenancy/scope into `AZConfig` as a `:`-joined
/// triple; Savings Plans put `planType` in `AZConfig`; Generic leaves both
/// columns empty.
fn encode_service_details(details: &ServiceDetails) -> (String, String) {
    match details {
        ServiceDetails::Rds { engine, az_mode } => (engine.clone(), az_mode_str(*az_mode).to_string()),
        ServiceDetails::ElastiCache { engine } => (engine.clone(), String::new()),
        ServiceDetails::Ec2 { platform, tenancy, scope } => (
            String::new(),
            format!("{}:{}:{}", platform_str(*platform), tenancy_str(*tenancy), scope_str(*scope)),
        ),
        ServiceDetails::SavingsPlanDetails { plan_type } => (String::new(), plan_type.clone()),
        ServiceDetails::Generic => (String::new(), String::new()),
    }
}

fn az_mode_str(m: AzMode) -> &'static str {
    match m {
        AzMode::SingleAz => "SingleAz",
        AzMode::MultiAz => "MultiAz",
    }
}

fn platform_str(p: Platform) -> &'static str {
    match p {
        Platform::Linux => "Linux",
        Platform::Windows => "Windows",
    }
}

fn tenancy_str(t: Tenancy) -> &'static str {
    match t {
        Tenancy::Default => "Default",
        Tenancy::Dedicated => "Dedicated",
    }
}

fn scope_str(s: Scope) -> &'static str {
    match s {
        Scope::Regional => "Regional",
        Scope::Zonal => "Zonal",
    }
}

/// Inverse of [`encode_service_details`], keyed by [`Service`] the way
/// `cdp-model`'s `ServiceDetails::matches_service` keys its variants.
fn decode_service_details(service: Service, engine: &str, az_config: &str) -> Result<ServiceDetails, String> {
    match service {
        Service::RelationalDb => {
            let az_mode = match az_config {
                "SingleAz" => AzMode::SingleAz,
                "MultiAz" => AzMode::MultiAz,
                other => return Err(format!("unknown AZConfig {other:?} for relational-db")),
            };
            Ok(ServiceDetails::Rds { engine: engine.to_string(), az_mode })
        }
        Service::Cache => Ok(ServiceDetails::ElastiCache { engine: engine.to_string() }),
        Service::Compute => {
            let parts: Vec<&str> = az_config.split(':').collect();
            let [platform, tenancy, scope]: [&str; 3] =
                parts.try_into().map_err(|_| format!("malformed AZConfig {az_config:?} for compute"))?;
            let platform = match platform {
                "Linux" => Platform::Linux,
                "Windows" => Platform::Windows,
                other => return Err(format!("unknown platform {other:?}")),
            };
            let tenancy = match tenancy {
                "Default" => Tenancy::Default,
                "Dedicated" => Tenancy::Dedicated,
                other => return Err(format!("unknown tenancy {other:?}")),
            };
            let scope = match scope {
                "Regional" => Scope::Regional,
                "Zonal" => Scope::Zonal,
                other => return Err(format!("unknown scope {other:?}")),
            };
            Ok(ServiceDetails::Ec2 { platform, tenancy, scope })
        }
        Service::SavingsPlan => Ok(ServiceDetails::SavingsPlanDetails { plan_type: az_config.to_string() }),
        Service::Search | Service::DataWarehouse | Service::NosqlDb => Ok(ServiceDetails::Generic),
    }
}

fn parse_provider(s: &str) -> Result<CloudProviderId, String> {
    match s {
        "aws" => Ok(CloudProviderId::Aws),
        "azure" => Ok(CloudProviderId::Azure),
        "gcp" => Ok(CloudProviderId::Gcp),
        other => Err(format!("unknown Provider {other:?}")),
    }
}

fn parse_service(s: &str) -> Result<Service, String> {
    match s {
        "compute" => Ok(Service::Compute),
        "relational-db" => Ok(Service::RelationalDb),
        "cache" => Ok(Service::Cache),
        "search" => Ok(Service::Search),
        "data-warehouse" => Ok(Service::DataWarehouse),
        "nosql-db" => Ok(Service::NosqlDb),
        "savings-plan" => Ok(Service::SavingsPlan),
        other => Err(format!("unknown Service {other:?}")),
    }
}

fn parse_term(s: &str) -> Result<Term, String> {
    match s {
        "1y" | "1" => Ok(Term::OneYear),
        "3y" | "3" => Ok(Term::ThreeYear),
        other => Err(format!("unknown Term {other:?}")),
    }
}

fn parse_payment_option(s: &str) -> Result<PaymentOption, String> {
    match s {
        "all-upfront" => Ok(PaymentOption::AllUpfront),
        "partial-upfront" => Ok(PaymentOption::PartialUpfront),
        "no-upfront" => Ok(PaymentOption::NoUpfront),
        other => Err(format!("unknown PaymentOption {other:?}")),
    }
}

/// Writes `results` to `path`, one row per purchase (or per dry-run
/// synthesized outcome). Always writes the file, even when `results` is
/// empty, so a run that selected nothing still leaves a header-only CSV.
pub fn write_report(path: &Path, results: &[PurchaseResult]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for result in results {
        let rec = &result.recommendation;
        let (engine, az_config) = encode_service_details(&rec.service_details);
        let row = ReportRow {
            timestamp: result.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            status: Status::from(result.success),
            provider: rec.provider.to_string(),
            service: rec.service.to_string(),
            account: rec.account.clone(),
            account_name: rec.account_display_name.clone(),
            region: rec.region.clone(),
            resource_type: rec.resource_type.clone(),
            engine,
            az_config,
            payment_option: rec.payment_option.to_string(),
            term: rec.term.to_string(),
            count: rec.count,
            purchase_id: result.purchase_id.clone(),
            reservation_id: result.reservation_id.clone().unwrap_or_default(),
            actual_cost: ActualCostCell(result.actual_cost),
            estimated_cost: rec.estimated_savings,
            savings_percent: rec.savings_percent,
            upfront_cost: rec.upfront_cost,
            recurring_monthly_cost: rec.recurring_monthly_cost,
            estimated_monthly_on_demand: rec.estimated_monthly_on_demand,
            message: result.message.clone(),
            description: rec.description.clone(),
        };
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a previously written report back into [`Recommendation`]s, for
/// replay re-entry at the filter stage (PRD §4.8). Account display names
/// absent from the CSV (or blank) are repopulated from `alias_cache`,
/// exactly as a live fetch would populate them; names present in the CSV
/// are written back into the cache so later lookups stay consistent.
pub fn read_report(path: &Path, alias_cache: &AccountAliasCache) -> Result<Vec<Recommendation>, ReportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut out = Vec::new();

    for (line, row) in reader.deserialize::<ReportRow>().enumerate() {
        let line = line as u64 + 2; // header is line 1
        let row = row?;

        let rec = reconstruct(&row, alias_cache).map_err(|reason| ReportError::MalformedRow { line, reason })?;
        out.push(rec);
    }

    Ok(out)
}

fn reconstruct(row: &ReportRow, alias_cache: &AccountAliasCache) -> Result<Recommendation, String> {
    let provider = parse_provider(&row.provider)?;
    let service = parse_service(&row.service)?;
    let term = parse_term(&row.term)?;
    let payment_option = parse_payment_option(&row.payment_option)?;
    let service_details = decode_service_details(service, &row.engine, &row.az_config)?;

    let commitment_type = if service == Service::SavingsPlan {
        CommitmentType::SavingsPlan
    } else {
        CommitmentType::ReservedInstance
    };

    let account_display_name = if row.account_name.is_empty() {
        alias_cache.get_or_insert_with(&row.account, || row.account.clone())
    } else {
        alias_cache.insert(row.account.clone(), row.account_name.clone());
        row.account_name.clone()
    };

    let source_timestamp = NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid Timestamp {:?}: {e}", row.timestamp))?
        .and_utc();

    Recommendation::new(
        provider,
        service,
        row.account.clone(),
        account_display_name,
        row.region.clone(),
        row.resource_type.clone(),
        row.count,
        term,
        payment_option,
        commitment_type,
        row.upfront_cost,
        row.recurring_monthly_cost,
        row.estimated_monthly_on_demand,
        row.estimated_cost,
        row.savings_percent,
        service_details,
        row.description.clone(),
        source_timestamp,
    )
    .map_err(|e| e.to_string())
}
